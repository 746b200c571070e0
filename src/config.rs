//! System-wide settings
//!
//! Loaded from `/etc/srcpm/config.toml` when present; every field has a
//! default so a missing file yields a working configuration. When the
//! process is not running as root, paths still at their system defaults
//! are swapped for per-user directories.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/srcpm/config.toml";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Recipe repository roots, searched in order.
    pub repo_paths: Vec<PathBuf>,
    /// Distfile cache roots, searched in order.
    pub cache_dirs: Vec<PathBuf>,
    pub binpkg_dir: PathBuf,
    pub sandbox_base: PathBuf,
    pub history_file: PathBuf,
    pub use_conf: PathBuf,
    pub query_cache_dir: PathBuf,
    pub installed_db: PathBuf,
    /// Real installation root packages are promoted beneath.
    pub dest_root: PathBuf,
    /// Remote repository index fetched by `sync`.
    pub repo_url: Option<String>,
    pub jobs: usize,
    pub arch: String,
    pub cache_max_age_days: u64,
    pub cache_max_size_mb: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_paths: vec![PathBuf::from(crate::search::DEFAULT_REPO_PATH)],
            cache_dirs: vec![PathBuf::from(crate::cache::DEFAULT_CACHE_DIR)],
            binpkg_dir: PathBuf::from(crate::binpkg::DEFAULT_BINPKG_DIR),
            sandbox_base: PathBuf::from(crate::sandbox::DEFAULT_SANDBOX_BASE),
            history_file: PathBuf::from(crate::history::DEFAULT_HISTORY_FILE),
            use_conf: PathBuf::from(crate::flags::DEFAULT_USE_CONF),
            query_cache_dir: PathBuf::from(crate::query::DEFAULT_QUERY_CACHE),
            installed_db: PathBuf::from("/var/lib/source/installed.json"),
            dest_root: PathBuf::from("/usr/local"),
            repo_url: None,
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            arch: std::env::consts::ARCH.to_string(),
            cache_max_age_days: 30,
            cache_max_size_mb: 2048,
        }
    }
}

impl Settings {
    /// Load from `$SRCPM_CONFIG` when set, else the default config path.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("SRCPM_CONFIG") {
            return Self::load_from(Path::new(&path));
        }
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load from `path`, treating a missing file as all-defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Invalid(format!("malformed config {}: {e}", path.display())))
    }

    /// Swap system paths still at their defaults for per-user locations
    /// when not running as root. Explicitly configured paths are kept.
    pub fn for_current_user(mut self) -> Self {
        if is_root() {
            return self;
        }
        let defaults = Self::default();
        let cache_base = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("srcpm");
        let data_base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("srcpm");

        if self.cache_dirs == defaults.cache_dirs {
            self.cache_dirs = vec![cache_base.join("distfiles")];
        }
        if self.binpkg_dir == defaults.binpkg_dir {
            self.binpkg_dir = cache_base.join("binpkgs");
        }
        if self.query_cache_dir == defaults.query_cache_dir {
            self.query_cache_dir = cache_base.join("query");
        }
        if self.history_file == defaults.history_file {
            self.history_file = data_base.join("history.json");
        }
        if self.installed_db == defaults.installed_db {
            self.installed_db = data_base.join("installed.json");
        }
        if self.use_conf == defaults.use_conf {
            self.use_conf = data_base.join("use.conf");
        }
        if self.dest_root == defaults.dest_root {
            self.dest_root = data_base.join("prefix");
        }
        self
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    // Safety: geteuid has no failure modes.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}
