//! Repository search
//!
//! Read-side projections over the recipe repositories: package listing,
//! first-hit lookup (optionally rewritten through the sandbox), recursive
//! file listing and dependency extraction. Every call lands in the audit
//! journal and is bracketed by registered pre/post hooks.

use crate::error::Result;
use crate::history::History;
use crate::recipe::Recipe;
use crate::sandbox::Sandbox;
use crate::utils::fsx::relative_to_anchor;
use crate::utils::output::{print_debug, print_warning};
use crate::utils::render::{render, RenderFormat};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Default repository root.
pub const DEFAULT_REPO_PATH: &str = "/usr/source";

pub type SearchHook = Box<dyn Fn(&str)>;

/// Build/runtime dependency names parsed out of a repository recipe.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DependencyLists {
    pub build: Vec<String>,
    pub runtime: Vec<String>,
}

pub struct PackageSearch<'a> {
    repo_paths: Vec<PathBuf>,
    history: Option<&'a History>,
    sandbox: Option<&'a Sandbox>,
    pre_hooks: Vec<SearchHook>,
    post_hooks: Vec<SearchHook>,
    verbose: bool,
}

impl<'a> PackageSearch<'a> {
    pub fn new(repo_paths: Vec<PathBuf>) -> Self {
        Self {
            repo_paths,
            history: None,
            sandbox: None,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            verbose: false,
        }
    }

    pub fn with_history(mut self, history: &'a History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_sandbox(mut self, sandbox: &'a Sandbox) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn register_pre_hook(&mut self, hook: SearchHook) {
        self.pre_hooks.push(hook);
    }

    pub fn register_post_hook(&mut self, hook: SearchHook) {
        self.post_hooks.push(hook);
    }

    fn run_hooks(hooks: &[SearchHook], package: &str) {
        for hook in hooks {
            hook(package);
        }
    }

    fn record(&self, action: &str, package: &str, details: Value) {
        let Some(history) = self.history else { return };
        if let Err(e) = history.record(action, package, details, "success") {
            print_warning(&format!("history append failed: {e}"));
        }
    }

    /// Union of package directories across every repository root.
    pub fn list_all_packages(&self) -> Result<Vec<String>> {
        let mut packages = BTreeSet::new();
        for repo in &self.repo_paths {
            let Ok(entries) = std::fs::read_dir(repo) else {
                continue;
            };
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    packages.insert(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        let result: Vec<String> = packages.into_iter().collect();
        print_debug(self.verbose, &format!("{} packages found", result.len()));
        self.record("list_all_packages", "system", json!({ "count": result.len() }));
        Ok(result)
    }

    /// First repository root containing the package; with a sandbox
    /// configured the candidate path is rewritten beneath its root.
    pub fn find_package(&self, package: &str) -> Option<PathBuf> {
        Self::run_hooks(&self.pre_hooks, package);
        for repo in &self.repo_paths {
            let mut pkg_path = repo.join(package);
            if let Some(sandbox) = self.sandbox {
                pkg_path = sandbox.root().join(relative_to_anchor(&pkg_path));
            }
            if pkg_path.exists() {
                Self::run_hooks(&self.post_hooks, package);
                self.record(
                    "find_package",
                    package,
                    json!({ "found": true, "path": pkg_path.display().to_string() }),
                );
                return Some(pkg_path);
            }
        }
        Self::run_hooks(&self.post_hooks, package);
        self.record("find_package", package, json!({ "found": false }));
        None
    }

    /// Every file under the package directory, recursively.
    pub fn list_files(&self, package: &str) -> Vec<String> {
        let Some(pkg_path) = self.find_package(package) else {
            return Vec::new();
        };
        let files: Vec<String> = WalkDir::new(&pkg_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        self.record("list_files", package, json!({ "files_count": files.len() }));
        files
    }

    /// Build and runtime dependency names from the package's repository
    /// recipe.
    pub fn list_dependencies(&self, package: &str) -> Result<DependencyLists> {
        let Some(pkg_path) = self.find_package(package) else {
            return Ok(DependencyLists::default());
        };
        let recipe = match load_repo_recipe(&pkg_path) {
            Some(recipe) => recipe,
            None => return Ok(DependencyLists::default()),
        };
        let deps = DependencyLists {
            build: recipe.build_deps.keys().cloned().collect(),
            runtime: recipe.runtime_deps.keys().cloned().collect(),
        };
        self.record(
            "list_dependencies",
            package,
            json!({ "build": deps.build.len(), "runtime": deps.runtime.len() }),
        );
        Ok(deps)
    }

    /// Write search results to a file in the requested format.
    pub fn export(&self, data: &Value, output_file: &Path, format: RenderFormat) -> Result<()> {
        std::fs::write(output_file, render(data, format)?)?;
        Ok(())
    }
}

/// A repository package carries `recipe.json` or `recipe.yaml`.
pub fn load_repo_recipe(pkg_path: &Path) -> Option<Recipe> {
    let json = pkg_path.join("recipe.json");
    if json.exists() {
        return Recipe::from_json_file(&json).ok();
    }
    let yaml = pkg_path.join("recipe.yaml");
    if yaml.exists() {
        return Recipe::from_yaml_file(&yaml).ok();
    }
    None
}
