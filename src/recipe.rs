//! Package recipes
//!
//! A recipe is the declarative manifest that tells the builder how to
//! build one package: source location, build system, dependency maps and
//! per-stage hook commands. Recipes are YAML on disk when authored
//! (`recipe.yaml`) and JSON (`recipe.json`) in repository metadata.

use crate::error::{Error, Result};
use crate::history::History;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::Duration;

/// Every hook stage a recipe may attach commands to, in pipeline order.
pub const HOOK_STAGES: [&str; 10] = [
    "pre_fetch",
    "post_fetch",
    "pre_configure",
    "post_configure",
    "pre_build",
    "post_build",
    "pre_install",
    "post_install",
    "pre_remove",
    "post_remove",
];

lazy_static! {
    static ref SHA256_RE: Regex = Regex::new(r"^[0-9a-fA-F]{64}$").unwrap();
}

/// Recognized build backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    Autotools,
    Cmake,
    Meson,
    Ninja,
    Rust,
    Python,
}

impl BuildSystem {
    pub const ALL: [BuildSystem; 6] = [
        BuildSystem::Autotools,
        BuildSystem::Cmake,
        BuildSystem::Meson,
        BuildSystem::Ninja,
        BuildSystem::Rust,
        BuildSystem::Python,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildSystem::Autotools => "autotools",
            BuildSystem::Cmake => "cmake",
            BuildSystem::Meson => "meson",
            BuildSystem::Ninja => "ninja",
            BuildSystem::Rust => "rust",
            BuildSystem::Python => "python",
        }
    }
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildSystem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "autotools" => Ok(BuildSystem::Autotools),
            "cmake" => Ok(BuildSystem::Cmake),
            "meson" => Ok(BuildSystem::Meson),
            "ninja" => Ok(BuildSystem::Ninja),
            "rust" => Ok(BuildSystem::Rust),
            "python" => Ok(BuildSystem::Python),
            other => Err(Error::Invalid(format!("unsupported build system: {other}"))),
        }
    }
}

/// Upstream source of a package: tarball URL plus its expected checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    pub url: String,
    pub sha256: String,
}

/// The recipe manifest.
///
/// Dependency maps associate each dependency with an optional USE-flag
/// gate; a gated dependency only takes part in resolution when its flag
/// is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub source: Source,
    pub build_system: BuildSystem,
    #[serde(default)]
    pub build_deps: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub runtime_deps: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub optional_deps: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub use_flags: Vec<String>,
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<String>>,
    /// Embedded per-file hashes, present after `hash inject`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<String, BTreeMap<String, String>>>,
    /// Local source tree consumed by the builder (unpacked tarball).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<PathBuf>,
}

impl Recipe {
    pub fn new(name: &str, version: &str, build_system: BuildSystem) -> Self {
        let hooks = HOOK_STAGES
            .iter()
            .map(|stage| (stage.to_string(), Vec::new()))
            .collect();
        Self {
            name: name.to_string(),
            version: version.to_string(),
            source: Source::default(),
            build_system,
            build_deps: BTreeMap::new(),
            runtime_deps: BTreeMap::new(),
            optional_deps: BTreeMap::new(),
            use_flags: Vec::new(),
            hooks,
            hashes: None,
            source_dir: None,
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Recipe> {
        let content = std::fs::read_to_string(path)?;
        let recipe: Recipe = serde_yaml::from_str(&content).map_err(|e| {
            Error::Invalid(format!("malformed recipe {}: {}", path.display(), e))
        })?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn from_json_file(path: &Path) -> Result<Recipe> {
        let content = std::fs::read_to_string(path)?;
        let recipe: Recipe = serde_json::from_str(&content).map_err(|e| {
            Error::Invalid(format!("malformed recipe {}: {}", path.display(), e))
        })?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn save_yaml(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Structural invariants: non-empty name and version, well-formed
    /// checksum when one is present.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Invalid("recipe name must not be empty".to_string()));
        }
        if self.version.is_empty() {
            return Err(Error::Invalid(format!(
                "recipe {} has an empty version",
                self.name
            )));
        }
        if !self.source.sha256.is_empty() && !SHA256_RE.is_match(&self.source.sha256) {
            return Err(Error::Invalid(format!(
                "recipe {}: sha256 must be 64 hex characters",
                self.name
            )));
        }
        Ok(())
    }
}

/// Scaffold a new package directory under `base_dir`.
///
/// Creates `<base_dir>/<name>/` with a skeletal `recipe.yaml`, one
/// executable hook stub per stage under `hooks/`, a `README.md`, and a
/// freshly initialized git repository with an initial commit. Returns the
/// path of the written recipe file.
pub fn create_base_recipe(
    base_dir: &Path,
    name: &str,
    version: &str,
    build_system: BuildSystem,
    history: Option<&History>,
) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(Error::Invalid("package name must not be empty".to_string()));
    }

    let package_dir = base_dir.join(name);
    std::fs::create_dir_all(&package_dir)?;

    let recipe = Recipe::new(name, version, build_system);
    let recipe_file = package_dir.join("recipe.yaml");
    recipe.save_yaml(&recipe_file)?;

    create_hook_templates(&package_dir)?;
    create_readme(&package_dir, name)?;
    init_git_repo(&package_dir);

    if let Some(history) = history {
        history.record(
            "create_recipe",
            name,
            json!({ "path": package_dir.display().to_string() }),
            "success",
        )?;
    }

    Ok(recipe_file)
}

fn create_hook_templates(package_dir: &Path) -> Result<()> {
    let hooks_dir = package_dir.join("hooks");
    std::fs::create_dir_all(&hooks_dir)?;
    for stage in HOOK_STAGES {
        let hook_file = hooks_dir.join(format!("{stage}.sh"));
        if hook_file.exists() {
            continue;
        }
        std::fs::write(
            &hook_file,
            format!(
                "#!/bin/sh\n# {stage} hook for {}\n",
                package_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
        )?;
        set_executable(&hook_file)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn create_readme(package_dir: &Path, name: &str) -> Result<()> {
    let readme = package_dir.join("README.md");
    std::fs::write(
        &readme,
        format!(
            "# {name}\n\n\
             Package recipe scaffolded by srcpm.\n\
             Edit `recipe.yaml` and the stage scripts under `hooks/` to\n\
             customize the build.\n"
        ),
    )?;
    Ok(())
}

/// Best effort: a missing `git` binary or a failing commit must not sink
/// the scaffold.
fn init_git_repo(package_dir: &Path) {
    if package_dir.join(".git").exists() {
        return;
    }
    for args in [
        vec!["init"],
        vec!["add", "."],
        vec!["commit", "-m", "Initial package scaffold"],
    ] {
        let status = Command::new("git")
            .args(&args)
            .current_dir(package_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if status.map(|s| !s.success()).unwrap_or(true) {
            return;
        }
    }
}

/// Validate a recipe file for publication.
///
/// Beyond the structural checks, probes `source.url` with a short HEAD
/// request when one is given; any response of 400 or above (or a network
/// failure) rejects the recipe.
pub fn validate_recipe_file(recipe_file: &Path) -> Result<Recipe> {
    let recipe = match recipe_file.extension().and_then(|e| e.to_str()) {
        Some("json") => Recipe::from_json_file(recipe_file)?,
        _ => Recipe::from_yaml_file(recipe_file)?,
    };

    if !recipe.source.url.is_empty() {
        probe_url(&recipe.source.url)?;
    }

    Ok(recipe)
}

fn probe_url(url: &str) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| Error::External(format!("HTTP client: {e}")))?;
    let response = client
        .head(url)
        .send()
        .map_err(|e| Error::External(format!("HEAD {url}: {e}")))?;
    if response.status().as_u16() >= 400 {
        return Err(Error::External(format!(
            "tarball URL unreachable: {url} ({})",
            response.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_system_from_str() {
        assert_eq!(
            "cmake".parse::<BuildSystem>().unwrap(),
            BuildSystem::Cmake
        );
        assert_eq!(
            "RUST".parse::<BuildSystem>().unwrap(),
            BuildSystem::Rust
        );
        assert!("scons".parse::<BuildSystem>().is_err());
    }

    #[test]
    fn test_recipe_yaml_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("recipe.yaml");

        let mut recipe = Recipe::new("zlib", "1.3.1", BuildSystem::Autotools);
        recipe.source.url = "https://example.org/zlib-1.3.1.tar.gz".to_string();
        recipe
            .build_deps
            .insert("make".to_string(), None);
        recipe
            .optional_deps
            .insert("minizip".to_string(), Some("minizip".to_string()));
        recipe.save_yaml(&path).unwrap();

        let loaded = Recipe::from_yaml_file(&path).unwrap();
        assert_eq!(loaded, recipe);
    }

    #[test]
    fn test_validate_rejects_short_sha256() {
        let mut recipe = Recipe::new("zlib", "1.3.1", BuildSystem::Autotools);
        recipe.source.sha256 = "deadbeef".to_string();
        assert!(matches!(recipe.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_validate_accepts_full_sha256() {
        let mut recipe = Recipe::new("zlib", "1.3.1", BuildSystem::Autotools);
        recipe.source.sha256 = "a".repeat(64);
        assert!(recipe.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let recipe = Recipe::new("", "1.0", BuildSystem::Cmake);
        assert!(matches!(recipe.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_malformed_yaml_is_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("recipe.yaml");
        std::fs::write(&path, "name: [unclosed").unwrap();
        assert!(matches!(
            Recipe::from_yaml_file(&path),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_build_system_rejected_on_parse() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("recipe.yaml");
        std::fs::write(&path, "name: foo\nversion: '1.0'\nbuild_system: scons\n").unwrap();
        assert!(matches!(
            Recipe::from_yaml_file(&path),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_create_base_recipe_scaffold() {
        let temp = TempDir::new().unwrap();

        let recipe_file =
            create_base_recipe(temp.path(), "hello", "2.12", BuildSystem::Autotools, None)
                .unwrap();

        assert!(recipe_file.exists());
        let recipe = Recipe::from_yaml_file(&recipe_file).unwrap();
        assert_eq!(recipe.name, "hello");
        assert_eq!(recipe.version, "2.12");
        // one empty hook list per stage
        assert_eq!(recipe.hooks.len(), HOOK_STAGES.len());
        assert!(recipe.hooks.values().all(Vec::is_empty));

        let package_dir = temp.path().join("hello");
        assert!(package_dir.join("README.md").exists());
        for stage in HOOK_STAGES {
            let hook = package_dir.join("hooks").join(format!("{stage}.sh"));
            assert!(hook.exists(), "missing hook stub {stage}");
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = std::fs::metadata(&hook).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o755);
            }
        }
    }

    #[test]
    fn test_create_base_recipe_rejects_empty_name() {
        let temp = TempDir::new().unwrap();
        let result = create_base_recipe(temp.path(), "", "1.0", BuildSystem::Cmake, None);
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_validate_recipe_file_without_url_skips_probe() {
        let temp = TempDir::new().unwrap();
        let recipe_file =
            create_base_recipe(temp.path(), "hello", "2.12", BuildSystem::Meson, None).unwrap();
        let recipe = validate_recipe_file(&recipe_file).unwrap();
        assert_eq!(recipe.build_system, BuildSystem::Meson);
    }
}
