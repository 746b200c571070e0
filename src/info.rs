//! Package information views
//!
//! Status and detail projections for a single package, composed from the
//! installed database, the recipe repositories, the USE-flag store and
//! any hashes embedded in the recipe. Details render in any of the
//! supported output formats.

use crate::cache::CacheManager;
use crate::db::InstalledDb;
use crate::error::Result;
use crate::flags::UseFlags;
use crate::history::History;
use crate::recipe::Recipe;
use crate::search::load_repo_recipe;
use crate::utils::output::print_warning;
use crate::utils::render::{render, RenderFormat};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusInfo {
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

pub struct PackageInfo<'a> {
    db: &'a dyn InstalledDb,
    repo_paths: Vec<PathBuf>,
    cache: Option<&'a CacheManager>,
    flags: Option<&'a UseFlags>,
    history: Option<&'a History>,
}

impl<'a> PackageInfo<'a> {
    pub fn new(db: &'a dyn InstalledDb, repo_paths: Vec<PathBuf>) -> Self {
        Self {
            db,
            repo_paths,
            cache: None,
            flags: None,
            history: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_flags(mut self, flags: &'a UseFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn with_history(mut self, history: &'a History) -> Self {
        self.history = Some(history);
        self
    }

    fn record(&self, action: &str, package: &str, details: Value) {
        let Some(history) = self.history else { return };
        if let Err(e) = history.record(action, package, details, "success") {
            print_warning(&format!("history append failed: {e}"));
        }
    }

    /// Installed state and version of a package.
    pub fn status(&self, package: &str) -> StatusInfo {
        let status = StatusInfo {
            installed: self.db.is_installed(package),
            version: self.db.recipe(package).map(|r| r.version),
        };
        self.record("status", package, serde_json::to_value(&status).unwrap_or(json!({})));
        status
    }

    /// Load the package's recipe from the first repository hit, going
    /// through the distfile cache when one is configured.
    fn load_recipe(&self, package: &str) -> Option<Recipe> {
        if let Some(cache) = self.cache {
            if let Some(cached) = cache.get_file(&format!("{package}.json")) {
                if let Ok(recipe) = Recipe::from_json_file(&cached) {
                    return Some(recipe);
                }
            }
        }
        for repo in &self.repo_paths {
            if let Some(recipe) = load_repo_recipe(&repo.join(package)) {
                return Some(recipe);
            }
        }
        None
    }

    /// Detailed view of a package rendered in `format`.
    ///
    /// Returns `None` when no repository knows the package. USE flags
    /// active for the package and any recipe-embedded hashes are folded
    /// into the result.
    pub fn details(&self, package: &str, format: RenderFormat) -> Result<Option<String>> {
        let Some(recipe) = self.load_recipe(package) else {
            self.record("details", package, json!({ "found": false }));
            return Ok(None);
        };

        let mut info = serde_json::to_value(&recipe)?;
        info["installed"] = json!(self.db.is_installed(package));
        if let Some(flags) = self.flags {
            let active: Vec<String> = flags.active_flags_for(package).into_iter().collect();
            info["use_flags"] = json!(active);
        }
        if let Some(hashes) = &recipe.hashes {
            info["hashes"] = serde_json::to_value(hashes)?;
        }

        self.record("details", package, json!({ "found": true }));
        Ok(Some(render(&info, format)?))
    }
}
