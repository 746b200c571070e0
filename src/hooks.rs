//! Hook dispatcher
//!
//! Priority-ordered registry of named-stage hooks. A hook is either a
//! native callback or a sequence of shell commands from a recipe; both go
//! through the same `invoke` path, one hook at a time, lowest priority
//! first. Shell commands run with `DESTDIR` pointing at the sandbox so
//! recipe scripts can stage instead of touching the real system.

use crate::error::{Error, Result};
use crate::recipe::Recipe;
use crate::sandbox::Sandbox;
use crate::utils::output::{print_debug, print_error};
use chrono::Utc;
use serde::Serialize;
use std::process::Command;

/// Default priority for hooks registered without an explicit one.
pub const DEFAULT_PRIORITY: i32 = 10;

pub type NativeHook = Box<dyn Fn(Option<&str>) -> Result<()>>;
pub type RollbackHook = Box<dyn Fn(Option<&str>) -> Result<()>>;
pub type ConditionHook = Box<dyn Fn(Option<&str>) -> bool>;

/// What a hook does when invoked.
pub enum HookAction {
    /// In-process callback.
    Native(NativeHook),
    /// Shell command sequence from a recipe.
    Shell(Vec<String>),
}

pub struct Hook {
    pub stage: String,
    /// When set, the hook only fires for this package.
    pub package: Option<String>,
    pub action: HookAction,
    pub priority: i32,
    pub rollback: Option<RollbackHook>,
    pub condition: Option<ConditionHook>,
}

impl Hook {
    pub fn new(stage: &str, action: HookAction) -> Self {
        Self {
            stage: stage.to_string(),
            package: None,
            action,
            priority: DEFAULT_PRIORITY,
            rollback: None,
            condition: None,
        }
    }

    pub fn with_package(mut self, package: &str) -> Self {
        self.package = Some(package.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rollback(mut self, rollback: RollbackHook) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn with_condition(mut self, condition: ConditionHook) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Outcome of one hook invocation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HookRecord {
    pub timestamp: String,
    pub stage: String,
    pub package: Option<String>,
    pub status: String,
    pub commands_output: String,
}

impl HookRecord {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Default)]
pub struct HookManager {
    hooks: Vec<Hook>,
    history: Vec<HookRecord>,
    verbose: bool,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn register_hook(&mut self, hook: Hook) {
        print_debug(
            self.verbose,
            &format!(
                "hook registered: stage={}, package={:?}, priority={}",
                hook.stage, hook.package, hook.priority
            ),
        );
        self.hooks.push(hook);
    }

    /// Register every non-empty command list a recipe declares, scoped to
    /// that recipe's package.
    pub fn register_recipe_hooks(&mut self, recipe: &Recipe) {
        for (stage, commands) in &recipe.hooks {
            if commands.is_empty() {
                continue;
            }
            self.register_hook(
                Hook::new(stage, HookAction::Shell(commands.clone())).with_package(&recipe.name),
            );
        }
    }

    /// Run all hooks for a stage, one at a time, ascending priority.
    ///
    /// Selection keeps hooks whose package is unset or matches. A hook
    /// whose condition returns false is skipped without a record. A
    /// failing hook has its rollback invoked (rollback failures are only
    /// logged) and is recorded with an error status; later hooks still
    /// run. The records for this invocation are returned so stage owners
    /// can decide whether a failure aborts their stage.
    pub fn run_hooks(
        &mut self,
        stage: &str,
        package: Option<&str>,
        sandbox: Option<&Sandbox>,
    ) -> Result<Vec<HookRecord>> {
        let mut selected: Vec<usize> = self
            .hooks
            .iter()
            .enumerate()
            .filter(|(_, h)| h.stage == stage)
            .filter(|(_, h)| match (&h.package, package) {
                (None, _) => true,
                (Some(own), Some(wanted)) => own == wanted,
                (Some(_), None) => false,
            })
            .map(|(i, _)| i)
            .collect();
        selected.sort_by_key(|&i| self.hooks[i].priority);

        let mut records = Vec::new();
        for index in selected {
            let hook = &self.hooks[index];
            if let Some(condition) = &hook.condition {
                if !condition(package) {
                    print_debug(
                        self.verbose,
                        &format!("hook skipped by condition: stage={stage}"),
                    );
                    continue;
                }
            }

            let timestamp = Utc::now().to_rfc3339();
            let mut output = String::new();
            let outcome = Self::invoke(hook, package, sandbox, &mut output);

            let status = match &outcome {
                Ok(()) => "success".to_string(),
                Err(e) => {
                    print_error(&format!("hook failed: stage={stage}: {e}"));
                    if let Some(rollback) = &hook.rollback {
                        if let Err(re) = rollback(package) {
                            print_error(&format!("hook rollback failed: {re}"));
                        }
                    }
                    format!("error: {e}")
                }
            };

            let record = HookRecord {
                timestamp,
                stage: stage.to_string(),
                package: package.map(str::to_string),
                status,
                commands_output: output,
            };
            self.history.push(record.clone());
            records.push(record);
        }
        Ok(records)
    }

    /// One hook, to completion, commands in order.
    fn invoke(
        hook: &Hook,
        package: Option<&str>,
        sandbox: Option<&Sandbox>,
        output: &mut String,
    ) -> Result<()> {
        match &hook.action {
            HookAction::Native(func) => func(package),
            HookAction::Shell(commands) => {
                for command in commands {
                    let mut cmd = Command::new("sh");
                    cmd.arg("-c").arg(command);
                    if let Some(sandbox) = sandbox {
                        cmd.env("DESTDIR", sandbox.root());
                    }
                    let result = cmd.output()?;
                    output.push_str(&format!(
                        "$ {}\n{}{}\n",
                        command,
                        String::from_utf8_lossy(&result.stdout),
                        String::from_utf8_lossy(&result.stderr)
                    ));
                    if !result.status.success() {
                        return Err(Error::External(format!(
                            "hook command failed: {} (code {})",
                            command,
                            result.status.code().unwrap_or(-1)
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Recorded invocations, optionally filtered.
    pub fn get_history(&self, package: Option<&str>, stage: Option<&str>) -> Vec<&HookRecord> {
        self.history
            .iter()
            .filter(|r| package.map(|p| r.package.as_deref() == Some(p)).unwrap_or(true))
            .filter(|r| stage.map(|s| r.stage == s).unwrap_or(true))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn appender(log: &Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> NativeHook {
        let log = log.clone();
        Box::new(move |_| {
            log.borrow_mut().push(tag);
            Ok(())
        })
    }

    #[test]
    fn test_hooks_run_in_priority_order() {
        let mut hooks = HookManager::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        hooks.register_hook(
            Hook::new("pre_build", HookAction::Native(appender(&log, "B"))).with_priority(20),
        );
        hooks.register_hook(
            Hook::new("pre_build", HookAction::Native(appender(&log, "A"))).with_priority(10),
        );
        hooks.register_hook(
            Hook::new("pre_build", HookAction::Native(appender(&log, "C"))).with_priority(30),
        );

        hooks.run_hooks("pre_build", None, None).unwrap();
        assert_eq!(*log.borrow(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_package_scoping() {
        let mut hooks = HookManager::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        hooks.register_hook(Hook::new(
            "post_install",
            HookAction::Native(appender(&log, "global")),
        ));
        hooks.register_hook(
            Hook::new("post_install", HookAction::Native(appender(&log, "zlib")))
                .with_package("zlib"),
        );

        hooks.run_hooks("post_install", Some("openssl"), None).unwrap();
        assert_eq!(*log.borrow(), vec!["global"]);

        log.borrow_mut().clear();
        hooks.run_hooks("post_install", Some("zlib"), None).unwrap();
        assert_eq!(*log.borrow(), vec!["global", "zlib"]);
    }

    #[test]
    fn test_condition_gates_without_record() {
        let mut hooks = HookManager::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        hooks.register_hook(
            Hook::new("pre_remove", HookAction::Native(appender(&log, "never")))
                .with_condition(Box::new(|_| false)),
        );

        let records = hooks.run_hooks("pre_remove", None, None).unwrap();
        assert!(records.is_empty());
        assert!(log.borrow().is_empty());
        assert!(hooks.get_history(None, Some("pre_remove")).is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn test_shell_hook_sees_destdir() {
        let temp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(temp.path().join("stage")).unwrap();
        let mut hooks = HookManager::new();

        hooks.register_hook(Hook::new(
            "post_install",
            HookAction::Shell(vec!["echo staged > \"$DESTDIR/marker\"".to_string()]),
        ));

        let records = hooks
            .run_hooks("post_install", None, Some(&sandbox))
            .unwrap();
        assert!(records[0].is_success());
        assert!(sandbox.root().join("marker").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_failing_command_aborts_hook_and_runs_rollback() {
        let mut hooks = HookManager::new();
        let rolled_back = Rc::new(RefCell::new(false));
        let flag = rolled_back.clone();

        hooks.register_hook(
            Hook::new(
                "pre_build",
                HookAction::Shell(vec![
                    "false".to_string(),
                    "echo never-reached".to_string(),
                ]),
            )
            .with_rollback(Box::new(move |_| {
                *flag.borrow_mut() = true;
                Ok(())
            })),
        );

        let records = hooks.run_hooks("pre_build", None, None).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].status.starts_with("error:"));
        assert!(!records[0].commands_output.contains("never-reached"));
        assert!(*rolled_back.borrow());
    }

    #[test]
    fn test_failure_does_not_stop_later_hooks() {
        let mut hooks = HookManager::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        hooks.register_hook(
            Hook::new(
                "pre_build",
                HookAction::Native(Box::new(|_| {
                    Err(Error::External("boom".to_string()))
                })),
            )
            .with_priority(1),
        );
        hooks.register_hook(
            Hook::new("pre_build", HookAction::Native(appender(&log, "after"))).with_priority(2),
        );

        let records = hooks.run_hooks("pre_build", None, None).unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].is_success());
        assert!(records[1].is_success());
        assert_eq!(*log.borrow(), vec!["after"]);
    }

    #[test]
    fn test_recipe_hooks_are_scoped_to_the_recipe() {
        use crate::recipe::{BuildSystem, Recipe};

        let mut recipe = Recipe::new("zlib", "1.3.1", BuildSystem::Autotools);
        recipe
            .hooks
            .insert("post_install".to_string(), vec!["true".to_string()]);

        let mut hooks = HookManager::new();
        hooks.register_recipe_hooks(&recipe);

        let other = hooks.run_hooks("post_install", Some("openssl"), None).unwrap();
        assert!(other.is_empty());

        let own = hooks.run_hooks("post_install", Some("zlib"), None).unwrap();
        assert_eq!(own.len(), 1);
        assert!(own[0].is_success());
    }

    #[test]
    fn test_history_filtering() {
        let mut hooks = HookManager::new();
        hooks.register_hook(Hook::new(
            "pre_build",
            HookAction::Native(Box::new(|_| Ok(()))),
        ));

        hooks.run_hooks("pre_build", Some("a"), None).unwrap();
        hooks.run_hooks("pre_build", Some("b"), None).unwrap();

        assert_eq!(hooks.get_history(None, None).len(), 2);
        assert_eq!(hooks.get_history(Some("a"), None).len(), 1);
        assert_eq!(hooks.get_history(None, Some("pre_build")).len(), 2);
        assert!(hooks.get_history(None, Some("post_build")).is_empty());
    }
}
