//! Installed-package database
//!
//! The resolver, remover and info views consume an abstract view of what
//! is installed on the system; `InstalledDb` is that seam. `JsonDb` is
//! the JSON-file-backed implementation used by the CLI, and doubles as an
//! in-memory database in tests.

use crate::error::Result;
use crate::recipe::Recipe;
use crate::utils::fsx::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What the pipeline needs to know about installed packages.
pub trait InstalledDb {
    /// The recipe a package was installed from, if the package is known.
    fn recipe(&self, name: &str) -> Option<Recipe>;

    fn is_installed(&self, name: &str) -> bool;

    fn installed_packages(&self) -> Vec<String>;

    /// Paths registered for a package, relative to the installation root.
    fn files(&self, name: &str) -> Vec<PathBuf>;

    /// Drop a package from the database. Removing an unknown package is a
    /// no-op; uninstallation must be idempotent.
    fn remove_package(&mut self, name: &str) -> Result<()>;

    /// Whether any other installed package lists `name` in one of its
    /// dependency maps.
    fn has_dependents(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstalledPackage {
    pub recipe: Recipe,
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// Database format version for backwards compatibility
const DB_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbFile {
    version: u32,
    packages: BTreeMap<String, InstalledPackage>,
}

/// JSON-file-backed installed database.
#[derive(Debug, Clone, Default)]
pub struct JsonDb {
    path: Option<PathBuf>,
    packages: BTreeMap<String, InstalledPackage>,
}

impl JsonDb {
    /// A database that lives only in memory; `save` is a no-op.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`, treating a missing file as an empty database.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path: Some(path.to_path_buf()),
                packages: BTreeMap::new(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let parsed: DbFile = serde_json::from_str(&content)?;
        let packages = if parsed.version == DB_VERSION {
            parsed.packages
        } else {
            // Version mismatch - start empty (will be rebuilt)
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            packages,
        })
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = DbFile {
            version: DB_VERSION,
            packages: self.packages.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        atomic_write(path, content.as_bytes())
    }

    /// Register a package as installed with the files it owns.
    pub fn add_package(&mut self, recipe: Recipe, files: Vec<PathBuf>) -> Result<()> {
        self.packages
            .insert(recipe.name.clone(), InstalledPackage { recipe, files });
        self.save()
    }

    pub fn get(&self, name: &str) -> Option<&InstalledPackage> {
        self.packages.get(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn depends_on(recipe: &Recipe, name: &str) -> bool {
        recipe.build_deps.contains_key(name)
            || recipe.runtime_deps.contains_key(name)
            || recipe.optional_deps.contains_key(name)
    }
}

impl InstalledDb for JsonDb {
    fn recipe(&self, name: &str) -> Option<Recipe> {
        self.packages.get(name).map(|p| p.recipe.clone())
    }

    fn is_installed(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    fn installed_packages(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }

    fn files(&self, name: &str) -> Vec<PathBuf> {
        self.packages
            .get(name)
            .map(|p| p.files.clone())
            .unwrap_or_default()
    }

    fn remove_package(&mut self, name: &str) -> Result<()> {
        self.packages.remove(name);
        self.save()
    }

    fn has_dependents(&self, name: &str) -> bool {
        self.packages
            .iter()
            .any(|(pkg, entry)| pkg != name && Self::depends_on(&entry.recipe, name))
    }
}
