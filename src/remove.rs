//! Package removal
//!
//! Uninstalls packages from the staged tree, guarded by reverse
//! dependencies. Every removal starts from a sandbox snapshot; any
//! failure between the guard and the database update rolls the sandbox
//! back and records a failure entry instead of propagating.

use crate::db::InstalledDb;
use crate::error::{Error, Result};
use crate::history::History;
use crate::hooks::HookManager;
use crate::resolver::Resolver;
use crate::sandbox::Sandbox;
use crate::utils::output::{print_debug, print_error, print_info};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub struct Remover<'a> {
    db: &'a mut dyn InstalledDb,
    sandbox: &'a mut Sandbox,
    hooks: &'a mut HookManager,
    history: Option<&'a History>,
    verbose: bool,
}

impl<'a> Remover<'a> {
    pub fn new(
        db: &'a mut dyn InstalledDb,
        sandbox: &'a mut Sandbox,
        hooks: &'a mut HookManager,
    ) -> Self {
        Self {
            db,
            sandbox,
            hooks,
            history: None,
            verbose: false,
        }
    }

    pub fn with_history(mut self, history: &'a History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Remove one package from the staged tree.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` on a handled
    /// failure (reverse dependencies present without `force`, or a hook
    /// failure); handled failures roll the sandbox back to the snapshot
    /// taken on entry and leave a failure entry in the journal.
    pub fn remove_package(&mut self, package: &str, force: bool) -> Result<bool> {
        self.sandbox.snapshot();

        match self.remove_inner(package, force) {
            Ok(removed) => {
                self.record(
                    package,
                    json!({ "removed_files": removed, "files": removed }),
                    "success",
                );
                print_info(&format!("{package} removed"));
                Ok(true)
            }
            Err(e) => {
                if let Err(re) = self.sandbox.rollback() {
                    print_error(&format!("sandbox rollback failed: {re}"));
                }
                self.record(package, json!({ "removed_files": [] }), &format!("error: {e}"));
                print_error(&format!("failed to remove {package}: {e}"));
                Ok(false)
            }
        }
    }

    fn remove_inner(&mut self, package: &str, force: bool) -> Result<Vec<PathBuf>> {
        let dependents = Resolver::new(&*self.db).find_reverse_dependencies(package);
        if !dependents.is_empty() && !force {
            return Err(Error::Conflict(format!(
                "dependent packages found: {}",
                dependents.join(", ")
            )));
        }

        self.run_stage_hooks("pre_remove", package)?;
        let removed = self.remove_files(package);
        self.run_stage_hooks("post_remove", package)?;

        self.db.remove_package(package)?;
        Ok(removed)
    }

    /// Delete a package's registered files from the sandbox.
    ///
    /// Per-file failures are logged, never fatal; the returned list holds
    /// only the paths actually removed.
    fn remove_files(&mut self, package: &str) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for file in self.db.files(package) {
            let path = self.sandbox.root().join(&file);
            let meta = match path.symlink_metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let result = if meta.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    print_debug(self.verbose, &format!("removed {}", path.display()));
                    removed.push(file);
                }
                Err(e) => {
                    print_error(&format!("failed to remove {}: {e}", path.display()));
                }
            }
        }
        removed
    }

    fn run_stage_hooks(&mut self, stage: &str, package: &str) -> Result<()> {
        let records = self
            .hooks
            .run_hooks(stage, Some(package), Some(self.sandbox))?;
        if let Some(failed) = records.iter().find(|r| !r.is_success()) {
            return Err(Error::External(format!(
                "{stage} hook failed: {}",
                failed.status
            )));
        }
        Ok(())
    }

    /// Remove several packages, collecting a per-package outcome map
    /// without short-circuiting on individual failures.
    pub fn remove_packages(&mut self, packages: &[String], force: bool) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for package in packages {
            let ok = self.remove_package(package, force).unwrap_or_else(|e| {
                print_error(&format!("failed to remove {package}: {e}"));
                false
            });
            results.insert(package.clone(), ok);
        }
        results
    }

    fn record(&self, package: &str, details: serde_json::Value, status: &str) {
        let Some(history) = self.history else { return };
        if let Err(e) = history.record("remove", package, details, status) {
            print_error(&format!("history append failed: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::JsonDb;
    use crate::history::HistoryFilter;
    use crate::hooks::{Hook, HookAction};
    use crate::recipe::{BuildSystem, Recipe};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn recipe(name: &str, deps: &[&str]) -> Recipe {
        let mut r = Recipe::new(name, "1.0", BuildSystem::Autotools);
        for dep in deps {
            r.runtime_deps.insert(dep.to_string(), None);
        }
        r
    }

    /// Stage a file under the sandbox and register it in the db.
    fn install_fixture(db: &mut JsonDb, sandbox: &Sandbox, name: &str, deps: &[&str]) {
        let rel = PathBuf::from(format!("usr/lib/{name}.so"));
        let staged = sandbox.root().join(&rel);
        std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
        std::fs::write(&staged, name).unwrap();
        db.add_package(recipe(name, deps), vec![rel]).unwrap();
    }

    #[test]
    fn test_remove_guarded_by_reverse_dependencies() {
        let temp = TempDir::new().unwrap();
        let history = History::new(temp.path().join("history.json")).unwrap();
        let mut db = JsonDb::in_memory();
        let mut sandbox = Sandbox::new(temp.path().join("stage")).unwrap();
        let mut hooks = HookManager::new();

        install_fixture(&mut db, &sandbox, "a", &[]);
        install_fixture(&mut db, &sandbox, "b", &["a"]);

        let mut remover = Remover::new(&mut db, &mut sandbox, &mut hooks).with_history(&history);
        assert!(!remover.remove_package("a", false).unwrap());

        // package stayed installed, failure was journaled
        assert!(db.is_installed("a"));
        let entries = history.list(10, &HistoryFilter::default()).unwrap();
        assert!(entries.last().unwrap().status.starts_with("error:"));
    }

    #[test]
    fn test_forced_remove_keeps_dependents() {
        let temp = TempDir::new().unwrap();
        let mut db = JsonDb::in_memory();
        let mut sandbox = Sandbox::new(temp.path().join("stage")).unwrap();
        let mut hooks = HookManager::new();

        install_fixture(&mut db, &sandbox, "a", &[]);
        install_fixture(&mut db, &sandbox, "b", &["a"]);
        let staged_a = sandbox.root().join("usr/lib/a.so");

        let mut remover = Remover::new(&mut db, &mut sandbox, &mut hooks);
        assert!(remover.remove_package("a", true).unwrap());

        assert!(!db.is_installed("a"));
        assert!(!staged_a.exists());
        // b's recipe remains untouched
        assert!(db.is_installed("b"));
    }

    #[test]
    fn test_missing_files_are_tolerated() {
        let temp = TempDir::new().unwrap();
        let mut db = JsonDb::in_memory();
        let mut sandbox = Sandbox::new(temp.path().join("stage")).unwrap();
        let mut hooks = HookManager::new();

        install_fixture(&mut db, &sandbox, "a", &[]);
        // register a package whose file was never staged
        db.add_package(
            recipe("ghost", &[]),
            vec![PathBuf::from("usr/lib/never-staged.so")],
        )
        .unwrap();

        let mut remover = Remover::new(&mut db, &mut sandbox, &mut hooks);
        assert!(remover.remove_package("ghost", false).unwrap());
        assert!(!db.is_installed("ghost"));
    }

    #[test]
    fn test_remove_runs_hook_stages_in_order() {
        let temp = TempDir::new().unwrap();
        let mut db = JsonDb::in_memory();
        let mut sandbox = Sandbox::new(temp.path().join("stage")).unwrap();
        let mut hooks = HookManager::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for stage in ["pre_remove", "post_remove"] {
            let log = log.clone();
            hooks.register_hook(Hook::new(
                stage,
                HookAction::Native(Box::new(move |_| {
                    log.borrow_mut().push(stage);
                    Ok(())
                })),
            ));
        }

        install_fixture(&mut db, &sandbox, "a", &[]);
        let mut remover = Remover::new(&mut db, &mut sandbox, &mut hooks);
        assert!(remover.remove_package("a", false).unwrap());
        assert_eq!(*log.borrow(), vec!["pre_remove", "post_remove"]);
    }

    #[test]
    fn test_failed_hook_rolls_back_and_reports_false() {
        let temp = TempDir::new().unwrap();
        let mut db = JsonDb::in_memory();
        let mut sandbox = Sandbox::new(temp.path().join("stage")).unwrap();
        let mut hooks = HookManager::new();

        hooks.register_hook(Hook::new(
            "pre_remove",
            HookAction::Native(Box::new(|_| Err(Error::External("boom".to_string())))),
        ));

        install_fixture(&mut db, &sandbox, "a", &[]);
        let snapshots_before = sandbox.snapshot_count();

        let mut remover = Remover::new(&mut db, &mut sandbox, &mut hooks);
        assert!(!remover.remove_package("a", false).unwrap());

        // the entry snapshot was consumed by the rollback
        assert_eq!(sandbox.snapshot_count(), snapshots_before);
        assert!(db.is_installed("a"));
        assert!(sandbox.root().join("usr/lib/a.so").exists());
    }

    #[test]
    fn test_remove_packages_does_not_short_circuit() {
        let temp = TempDir::new().unwrap();
        let mut db = JsonDb::in_memory();
        let mut sandbox = Sandbox::new(temp.path().join("stage")).unwrap();
        let mut hooks = HookManager::new();

        install_fixture(&mut db, &sandbox, "a", &[]);
        install_fixture(&mut db, &sandbox, "b", &["a"]);
        install_fixture(&mut db, &sandbox, "c", &[]);

        let mut remover = Remover::new(&mut db, &mut sandbox, &mut hooks);
        let results = remover.remove_packages(
            &["a".to_string(), "c".to_string()],
            false,
        );

        // a is blocked by b, c removes fine
        assert_eq!(results["a"], false);
        assert_eq!(results["c"], true);
        assert!(db.is_installed("a"));
        assert!(!db.is_installed("c"));
    }
}
