//! Staging sandbox
//!
//! A destination-prefixed directory tree (`DESTDIR` style) that receives
//! every file installation before promotion to the real system. The
//! sandbox tracks an installed-file manifest, supports cheap snapshots
//! (manifest copies, never file bytes) with rollback, and preserves file
//! permissions and ownership where the running user is allowed to.

use crate::error::Result;
use crate::utils::fsx::relative_to_anchor;
use crate::utils::output::{print_debug, print_warning};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default parent directory for per-package sandboxes.
pub const DEFAULT_SANDBOX_BASE: &str = "/tmp/source_sandboxes";

static SANDBOX_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Callback dispatched around each staged file copy.
pub type FileHook = Box<dyn Fn(&Path)>;

/// Manifest entry for one staged path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileRecord {
    Symlink {
        symlink: PathBuf,
    },
    File {
        size: u64,
        mtime: i64,
        mode: u32,
    },
}

/// Point-in-time copy of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: String,
    pub files: BTreeMap<PathBuf, FileRecord>,
}

/// Audit projection over the manifest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SandboxAudit {
    pub installed: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
    pub symlinks: Vec<(PathBuf, PathBuf)>,
}

pub struct Sandbox {
    root: PathBuf,
    installed: BTreeMap<PathBuf, FileRecord>,
    snapshots: Vec<Snapshot>,
    pre_install_hooks: Vec<FileHook>,
    post_install_hooks: Vec<FileHook>,
    verbose: bool,
}

impl Sandbox {
    /// Open (creating if needed) a sandbox rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            installed: BTreeMap::new(),
            snapshots: Vec::new(),
            pre_install_hooks: Vec::new(),
            post_install_hooks: Vec::new(),
            verbose: false,
        })
    }

    /// A fresh sandbox for one package under `base`.
    ///
    /// Concurrent builds get disjoint roots: the directory name carries
    /// the process id and a per-process counter.
    pub fn for_package(base: &Path, package: &str) -> Result<Self> {
        let unique = format!(
            "{}_{}.{}",
            package,
            std::process::id(),
            SANDBOX_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        Self::new(base.join(unique))
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn add_pre_install_hook(&mut self, hook: FileHook) {
        self.pre_install_hooks.push(hook);
    }

    pub fn add_post_install_hook(&mut self, hook: FileHook) {
        self.post_install_hooks.push(hook);
    }

    /// Stage files into the sandbox.
    ///
    /// Each source path is reproduced relative to its root anchor under
    /// the sandbox root. Missing sources are logged and skipped; with
    /// `overwrite` unset, already-staged paths are left alone. Returns
    /// the staged destination paths.
    pub fn install_files(&mut self, sources: &[PathBuf], overwrite: bool) -> Result<Vec<PathBuf>> {
        let mut staged = Vec::new();
        for src in sources {
            if !src.exists() {
                print_warning(&format!("source file not found: {}", src.display()));
                continue;
            }
            let dst = self.root.join(relative_to_anchor(src));
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if !overwrite && dst.exists() {
                print_debug(
                    self.verbose,
                    &format!("already staged, skipping: {}", dst.display()),
                );
                continue;
            }

            for hook in &self.pre_install_hooks {
                hook(src);
            }

            std::fs::copy(src, &dst)?;
            self.preserve_permissions(src, &dst)?;
            self.installed.insert(dst.clone(), file_record(&dst)?);

            for hook in &self.post_install_hooks {
                hook(&dst);
            }

            print_debug(self.verbose, &format!("staged {}", dst.display()));
            staged.push(dst);
        }
        Ok(staged)
    }

    /// Copy mode bits and attempt to carry ownership over.
    ///
    /// An unprivileged builder cannot chown; that is downgraded to a
    /// debug log, not an error.
    fn preserve_permissions(&self, src: &Path, dst: &Path) -> Result<()> {
        let meta = src.metadata()?;
        std::fs::set_permissions(dst, meta.permissions())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if let Err(e) = std::os::unix::fs::chown(dst, Some(meta.uid()), Some(meta.gid())) {
                print_debug(
                    self.verbose,
                    &format!("could not change owner of {}: {}", dst.display(), e),
                );
            }
        }
        Ok(())
    }

    /// Create (or replace) a symlink inside the sandbox.
    pub fn create_symlink(&mut self, target: &Path, link_name: &Path) -> Result<PathBuf> {
        let link_path = self.root.join(relative_to_anchor(link_name));
        if let Some(parent) = link_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if link_path.symlink_metadata().is_ok() {
            std::fs::remove_file(&link_path)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, &link_path)?;
        #[cfg(not(unix))]
        std::os::windows::fs::symlink_file(target, &link_path)?;

        self.installed.insert(
            link_path.clone(),
            FileRecord::Symlink {
                symlink: target.to_path_buf(),
            },
        );
        print_debug(
            self.verbose,
            &format!("symlink {} -> {}", link_path.display(), target.display()),
        );
        Ok(link_path)
    }

    /// Manifest paths relative to the sandbox root.
    pub fn list_installed_files(&self) -> Vec<PathBuf> {
        self.installed
            .keys()
            .map(|p| p.strip_prefix(&self.root).unwrap_or(p).to_path_buf())
            .collect()
    }

    /// Compare the manifest against the tree on disk.
    pub fn audit(&self) -> SandboxAudit {
        let mut report = SandboxAudit::default();
        for (path, record) in &self.installed {
            let rel = path.strip_prefix(&self.root).unwrap_or(path).to_path_buf();
            if path.symlink_metadata().is_ok() {
                report.installed.push(rel.clone());
            } else {
                report.missing.push(rel.clone());
            }
            if let FileRecord::Symlink { symlink } = record {
                report.symlinks.push((rel, symlink.clone()));
            }
        }
        report
    }

    /// Record the current manifest. Snapshots are cheap: file bytes are
    /// never copied.
    pub fn snapshot(&mut self) -> &Snapshot {
        self.snapshots.push(Snapshot {
            timestamp: Utc::now().to_rfc3339(),
            files: self.installed.clone(),
        });
        self.snapshots.last().unwrap()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Undo everything staged since the most recent snapshot.
    ///
    /// Consumes (pops) that snapshot: paths present now but absent from
    /// it are deleted from disk, and the manifest reverts to the snapshot
    /// exactly. Entries present in the snapshot are never touched. With
    /// no snapshot available this is a no-op returning `false`.
    pub fn rollback(&mut self) -> Result<bool> {
        let Some(snapshot) = self.snapshots.pop() else {
            print_warning("no snapshot available for rollback");
            return Ok(false);
        };

        let to_remove: Vec<PathBuf> = self
            .installed
            .keys()
            .filter(|p| !snapshot.files.contains_key(*p))
            .cloned()
            .collect();

        for path in &to_remove {
            match path.symlink_metadata() {
                Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path)?,
                Ok(_) => std::fs::remove_file(path)?,
                Err(_) => {}
            }
            print_debug(self.verbose, &format!("rolled back {}", path.display()));
        }

        self.installed = snapshot.files;
        Ok(true)
    }

    /// Remove the sandbox tree and forget all state.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        self.installed.clear();
        self.snapshots.clear();
        print_debug(
            self.verbose,
            &format!("sandbox removed: {}", self.root.display()),
        );
        Ok(())
    }
}

fn file_record(path: &Path) -> Result<FileRecord> {
    let meta = path.metadata()?;
    #[cfg(unix)]
    let (mtime, mode) = {
        use std::os::unix::fs::MetadataExt;
        (meta.mtime(), meta.mode())
    };
    #[cfg(not(unix))]
    let (mtime, mode) = (0, 0);
    Ok(FileRecord::File {
        size: meta.len(),
        mtime,
        mode,
    })
}
