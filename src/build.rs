//! Build pipeline
//!
//! Drives one recipe through `prepare -> configure -> compile -> install
//! -> promote`, with the stage hooks dispatched in between. Backend
//! selection is a tagged enum over the recognized build systems; each
//! backend contributes command lists, and a single runner executes them
//! with output capture, an optional timeout and dry-run support. All
//! installation is redirected into the sandbox's install prefix; only
//! promotion touches the real destination.

use crate::error::{Error, Result};
use crate::history::History;
use crate::hooks::HookManager;
use crate::recipe::{BuildSystem, Recipe};
use crate::sandbox::Sandbox;
use crate::utils::output::{print_debug, print_info};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Returned by the runner instead of spawning anything in dry-run mode.
pub const DRY_RUN_SENTINEL: &str = "DRY-RUN";

/// Grace period between SIGTERM and SIGKILL on timeout.
const KILL_ESCALATION: Duration = Duration::from_secs(2);

/// One command a backend wants executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl CommandSpec {
    fn new(program: &str, args: Vec<String>, cwd: &Path) -> Self {
        Self {
            program: program.to_string(),
            args,
            cwd: cwd.to_path_buf(),
        }
    }

    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Paths and knobs a backend assembles its commands from.
pub struct BuildContext<'a> {
    pub source_dir: &'a Path,
    pub build_dir: &'a Path,
    pub install_prefix: &'a Path,
    pub jobs: usize,
}

/// Per-build-system command assembly.
pub trait Backend {
    fn configure(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>>;
    fn compile(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>>;
    fn install(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>>;
}

struct AutotoolsBackend;
struct CmakeBackend;
struct MesonBackend;
struct NinjaBackend;
struct CargoBackend;
struct PythonBackend;

impl BuildSystem {
    pub fn backend(&self) -> &'static dyn Backend {
        match self {
            BuildSystem::Autotools => &AutotoolsBackend,
            BuildSystem::Cmake => &CmakeBackend,
            BuildSystem::Meson => &MesonBackend,
            BuildSystem::Ninja => &NinjaBackend,
            BuildSystem::Rust => &CargoBackend,
            BuildSystem::Python => &PythonBackend,
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

impl Backend for AutotoolsBackend {
    fn configure(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            &path_arg(&ctx.source_dir.join("configure")),
            vec![format!("--prefix={}", path_arg(ctx.install_prefix))],
            ctx.source_dir,
        )])
    }

    fn compile(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "make",
            vec![format!("-j{}", ctx.jobs)],
            ctx.source_dir,
        )])
    }

    fn install(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "make",
            vec!["install".to_string()],
            ctx.source_dir,
        )])
    }
}

impl Backend for CmakeBackend {
    fn configure(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "cmake",
            vec![
                path_arg(ctx.source_dir),
                format!("-DCMAKE_INSTALL_PREFIX={}", path_arg(ctx.install_prefix)),
            ],
            ctx.build_dir,
        )])
    }

    fn compile(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "cmake",
            vec![
                "--build".to_string(),
                ".".to_string(),
                format!("-j{}", ctx.jobs),
            ],
            ctx.build_dir,
        )])
    }

    fn install(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "cmake",
            vec!["--install".to_string(), path_arg(ctx.build_dir)],
            ctx.build_dir,
        )])
    }
}

impl Backend for MesonBackend {
    fn configure(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "meson",
            vec![
                "setup".to_string(),
                path_arg(ctx.build_dir),
                path_arg(ctx.source_dir),
                format!("--prefix={}", path_arg(ctx.install_prefix)),
            ],
            ctx.source_dir,
        )])
    }

    fn compile(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "meson",
            vec![
                "compile".to_string(),
                "-C".to_string(),
                path_arg(ctx.build_dir),
                format!("-j{}", ctx.jobs),
            ],
            ctx.source_dir,
        )])
    }

    fn install(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "meson",
            vec![
                "install".to_string(),
                "-C".to_string(),
                path_arg(ctx.build_dir),
            ],
            ctx.source_dir,
        )])
    }
}

impl Backend for NinjaBackend {
    fn configure(&self, _ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(Vec::new())
    }

    fn compile(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "ninja",
            vec![
                "-C".to_string(),
                path_arg(ctx.build_dir),
                format!("-j{}", ctx.jobs),
            ],
            ctx.build_dir,
        )])
    }

    fn install(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "ninja",
            vec![
                "-C".to_string(),
                path_arg(ctx.build_dir),
                "install".to_string(),
            ],
            ctx.build_dir,
        )])
    }
}

impl Backend for CargoBackend {
    fn configure(&self, _ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(Vec::new())
    }

    fn compile(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "cargo",
            vec!["build".to_string(), "--release".to_string()],
            ctx.source_dir,
        )])
    }

    fn install(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new(
            "cargo",
            vec![
                "install".to_string(),
                "--path".to_string(),
                path_arg(ctx.source_dir),
                "--root".to_string(),
                path_arg(ctx.install_prefix),
            ],
            ctx.source_dir,
        )])
    }
}

impl PythonBackend {
    fn has_setup_py(ctx: &BuildContext) -> bool {
        ctx.source_dir.join("setup.py").exists()
    }

    fn pip_install(ctx: &BuildContext) -> CommandSpec {
        CommandSpec::new(
            "pip",
            vec![
                "install".to_string(),
                ".".to_string(),
                "--no-deps".to_string(),
                "--prefix".to_string(),
                path_arg(ctx.install_prefix),
            ],
            ctx.source_dir,
        )
    }
}

impl Backend for PythonBackend {
    fn configure(&self, _ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        Ok(Vec::new())
    }

    // setup.py wins over pip when both are present
    fn compile(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        if Self::has_setup_py(ctx) {
            Ok(vec![CommandSpec::new(
                "python3",
                vec!["setup.py".to_string(), "build".to_string()],
                ctx.source_dir,
            )])
        } else if ctx.source_dir.join("pyproject.toml").exists() {
            Ok(vec![Self::pip_install(ctx)])
        } else {
            Err(Error::Invalid(
                "no setup.py or pyproject.toml found".to_string(),
            ))
        }
    }

    fn install(&self, ctx: &BuildContext) -> Result<Vec<CommandSpec>> {
        if Self::has_setup_py(ctx) {
            Ok(vec![CommandSpec::new(
                "python3",
                vec![
                    "setup.py".to_string(),
                    "install".to_string(),
                    format!("--prefix={}", path_arg(ctx.install_prefix)),
                ],
                ctx.source_dir,
            )])
        } else {
            Ok(vec![Self::pip_install(ctx)])
        }
    }
}

/// Knobs for one build run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub jobs: usize,
    pub verbose: bool,
    pub dry_run: bool,
    pub timeout: Option<Duration>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            verbose: false,
            dry_run: false,
            timeout: None,
        }
    }
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct Builder<'a> {
    recipe: &'a Recipe,
    sandbox: Sandbox,
    dest_path: PathBuf,
    build_dir: PathBuf,
    install_prefix: PathBuf,
    source_in_sandbox: PathBuf,
    hooks: &'a mut HookManager,
    history: Option<&'a History>,
    options: BuildOptions,
}

impl<'a> Builder<'a> {
    pub fn new(
        recipe: &'a Recipe,
        sandbox: Sandbox,
        dest_path: impl Into<PathBuf>,
        hooks: &'a mut HookManager,
        options: BuildOptions,
    ) -> Self {
        let build_dir = sandbox.root().join("build");
        let install_prefix = sandbox.root().join("install");
        let source_in_sandbox = sandbox.root().join("src");
        Self {
            recipe,
            sandbox,
            dest_path: dest_path.into(),
            build_dir,
            install_prefix,
            source_in_sandbox,
            hooks,
            history: None,
            options,
        }
    }

    pub fn with_history(mut self, history: &'a History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Hand the sandbox back to the caller, e.g. for cleanup after a
    /// successful promotion.
    pub fn into_sandbox(self) -> Sandbox {
        self.sandbox
    }

    pub fn install_prefix(&self) -> &Path {
        &self.install_prefix
    }

    fn context(&self) -> BuildContext<'_> {
        BuildContext {
            source_dir: &self.source_in_sandbox,
            build_dir: &self.build_dir,
            install_prefix: &self.install_prefix,
            jobs: self.options.jobs,
        }
    }

    /// Create the sandbox layout and copy the recipe's source tree into
    /// it, wiping any copy left from an earlier attempt.
    pub fn prepare_sandbox(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.build_dir)?;
        std::fs::create_dir_all(&self.install_prefix)?;

        let source = self.recipe.source_dir.as_ref().ok_or_else(|| {
            Error::Invalid(format!("recipe {} has no source directory", self.recipe.name))
        })?;
        if !source.exists() {
            return Err(Error::NotFound(format!(
                "source directory {}",
                source.display()
            )));
        }

        if self.source_in_sandbox.exists() {
            std::fs::remove_dir_all(&self.source_in_sandbox)?;
        }
        copy_dir(source, &self.source_in_sandbox)?;
        print_debug(
            self.options.verbose,
            &format!("sources copied to {}", self.source_in_sandbox.display()),
        );
        Ok(())
    }

    /// Configure and compile: `prepare -> pre_configure hook ->
    /// configure/compile -> post_build hook`.
    pub fn build(&mut self) -> Result<()> {
        let start = Instant::now();
        let result = self.build_inner();
        self.record("build", start, &result);
        result
    }

    fn build_inner(&mut self) -> Result<()> {
        self.prepare_sandbox()?;
        self.run_stage_hooks("pre_configure")?;

        let backend = self.recipe.build_system.backend();
        let commands = {
            let ctx = self.context();
            let mut commands = backend.configure(&ctx)?;
            commands.extend(backend.compile(&ctx)?);
            commands
        };
        for spec in &commands {
            self.run_command(spec)?;
        }

        self.run_stage_hooks("post_build")?;
        Ok(())
    }

    /// Staged install and promotion: `pre_install hook -> install into
    /// prefix -> post_install hook -> promote`.
    pub fn install(&mut self) -> Result<()> {
        let start = Instant::now();
        let result = self.install_inner();
        self.record("install", start, &result);
        result
    }

    fn install_inner(&mut self) -> Result<()> {
        self.run_stage_hooks("pre_install")?;

        let commands = {
            let ctx = self.context();
            self.recipe.build_system.backend().install(&ctx)?
        };
        for spec in &commands {
            self.run_command(spec)?;
        }

        self.run_stage_hooks("post_install")?;
        self.promote()?;
        Ok(())
    }

    /// Replace the real destination with the staged install prefix.
    ///
    /// A failed build never reaches this point, so the destination only
    /// ever sees complete trees.
    fn promote(&mut self) -> Result<()> {
        if self.options.dry_run {
            print_info(&format!(
                "dry-run: would promote {} to {}",
                self.install_prefix.display(),
                self.dest_path.display()
            ));
            return Ok(());
        }
        if self.dest_path.exists() {
            std::fs::remove_dir_all(&self.dest_path)?;
        }
        copy_dir(&self.install_prefix, &self.dest_path)?;
        print_info(&format!(
            "{} {} installed to {}",
            self.recipe.name,
            self.recipe.version,
            self.dest_path.display()
        ));
        Ok(())
    }

    /// Remove the build directory and install prefix.
    pub fn clean(&mut self) -> Result<()> {
        for path in [&self.build_dir, &self.install_prefix] {
            if path.exists() {
                std::fs::remove_dir_all(path)?;
            }
        }
        Ok(())
    }

    /// Dispatch a hook stage; any failed hook fails the stage.
    fn run_stage_hooks(&mut self, stage: &str) -> Result<()> {
        let records = self
            .hooks
            .run_hooks(stage, Some(&self.recipe.name), Some(&self.sandbox))?;
        if let Some(failed) = records.iter().find(|r| !r.is_success()) {
            return Err(Error::External(format!(
                "{stage} hook failed: {}",
                failed.status
            )));
        }
        Ok(())
    }

    /// Run one backend command, capturing its output.
    ///
    /// Non-zero exit fails with the command line and exit code. In
    /// dry-run mode the command is logged and a sentinel returned without
    /// spawning.
    fn run_command(&self, spec: &CommandSpec) -> Result<String> {
        if self.options.verbose || self.options.dry_run {
            print_info(&format!(
                "running: {} (cwd={})",
                spec.display(),
                spec.cwd.display()
            ));
        }
        if self.options.dry_run {
            return Ok(DRY_RUN_SENTINEL.to_string());
        }

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::External(format!("failed to spawn {}: {e}", spec.display())))?;

        let watchdog = self.options.timeout.map(|t| spawn_watchdog(child.id(), t));
        let output = child.wait_with_output()?;
        if let Some((tx, handle)) = watchdog {
            let _ = tx.send(());
            let _ = handle.join();
        }

        if !output.status.success() {
            return Err(Error::External(format!(
                "{} (code {})\n{}",
                spec.display(),
                exit_code_from_status(&output.status),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn record(&self, action: &str, start: Instant, result: &Result<()>) {
        let Some(history) = self.history else { return };
        let (status, details) = match result {
            Ok(()) => (
                "success".to_string(),
                json!({
                    "version": self.recipe.version,
                    "duration_secs": start.elapsed().as_secs_f64(),
                }),
            ),
            Err(e) => (format!("error: {e}"), json!({ "version": self.recipe.version })),
        };
        if let Err(e) = history.record(action, &self.recipe.name, details, &status) {
            print_debug(self.options.verbose, &format!("history append failed: {e}"));
        }
    }
}

/// Watchdog that kills the child when the timeout expires; cancelled by
/// sending on the returned channel once the process exits on its own.
#[cfg(unix)]
fn spawn_watchdog(
    pid: u32,
    timeout: Duration,
) -> (
    std::sync::mpsc::Sender<()>,
    std::thread::JoinHandle<()>,
) {
    use std::sync::mpsc;
    use std::thread;

    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        if rx.recv_timeout(timeout).is_err() {
            // Timeout expired, no cancel received — kill process
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
                thread::sleep(KILL_ESCALATION);
                if libc::kill(pid as i32, 0) == 0 {
                    libc::kill(pid as i32, libc::SIGKILL);
                }
            }
        }
    });
    (tx, handle)
}

#[cfg(not(unix))]
fn spawn_watchdog(
    _pid: u32,
    _timeout: Duration,
) -> (
    std::sync::mpsc::Sender<()>,
    std::thread::JoinHandle<()>,
) {
    let (tx, rx) = std::sync::mpsc::channel();
    let handle = std::thread::spawn(move || {
        let _ = rx.recv();
    });
    (tx, handle)
}

/// Extract exit code from ExitStatus
///
/// On Unix a signal death maps to `128 + signal`.
fn exit_code_from_status(status: &ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            code
        } else if let Some(signal) = status.signal() {
            128 + signal
        } else {
            -1
        }
    }

    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}

/// Deep directory copy; the destination receives the source's contents.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    let mut options = fs_extra::dir::CopyOptions::new();
    options.overwrite = true;
    options.content_only = true;
    fs_extra::dir::copy(src, dst, &options)
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx<'a>(src: &'a Path, build: &'a Path, prefix: &'a Path) -> BuildContext<'a> {
        BuildContext {
            source_dir: src,
            build_dir: build,
            install_prefix: prefix,
            jobs: 4,
        }
    }

    fn recipe(build_system: BuildSystem) -> Recipe {
        Recipe::new("demo", "1.0", build_system)
    }

    #[test]
    fn test_autotools_commands() {
        let temp = TempDir::new().unwrap();
        let (src, build, prefix) = (
            temp.path().join("src"),
            temp.path().join("build"),
            temp.path().join("install"),
        );
        let ctx = ctx(&src, &build, &prefix);
        let backend = BuildSystem::Autotools.backend();

        let configure = backend.configure(&ctx).unwrap();
        assert_eq!(configure.len(), 1);
        assert!(configure[0].program.ends_with("configure"));
        assert_eq!(
            configure[0].args,
            vec![format!("--prefix={}", prefix.display())]
        );

        let compile = backend.compile(&ctx).unwrap();
        assert_eq!(compile[0].program, "make");
        assert!(compile[0].args.contains(&"-j4".to_string()));

        let install = backend.install(&ctx).unwrap();
        assert_eq!(install[0].args, vec!["install"]);
    }

    #[test]
    fn test_cmake_commands_use_install_prefix() {
        let temp = TempDir::new().unwrap();
        let (src, build, prefix) = (
            temp.path().join("src"),
            temp.path().join("build"),
            temp.path().join("install"),
        );
        let ctx = ctx(&src, &build, &prefix);
        let backend = BuildSystem::Cmake.backend();

        let configure = backend.configure(&ctx).unwrap();
        assert!(configure[0]
            .args
            .iter()
            .any(|a| a.starts_with("-DCMAKE_INSTALL_PREFIX=")));
        assert_eq!(configure[0].cwd, build);

        let compile = backend.compile(&ctx).unwrap();
        assert!(compile[0].args.contains(&"-j4".to_string()));
    }

    #[test]
    fn test_ninja_has_no_configure_but_installs() {
        let temp = TempDir::new().unwrap();
        let (src, build, prefix) = (
            temp.path().join("src"),
            temp.path().join("build"),
            temp.path().join("install"),
        );
        let ctx = ctx(&src, &build, &prefix);
        let backend = BuildSystem::Ninja.backend();

        assert!(backend.configure(&ctx).unwrap().is_empty());
        let install = backend.install(&ctx).unwrap();
        assert_eq!(install[0].program, "ninja");
        assert!(install[0].args.contains(&"install".to_string()));
    }

    #[test]
    fn test_cargo_install_targets_prefix() {
        let temp = TempDir::new().unwrap();
        let (src, build, prefix) = (
            temp.path().join("src"),
            temp.path().join("build"),
            temp.path().join("install"),
        );
        let ctx = ctx(&src, &build, &prefix);
        let install = BuildSystem::Rust.backend().install(&ctx).unwrap();
        assert_eq!(install[0].program, "cargo");
        assert!(install[0].args.contains(&"--root".to_string()));
        assert!(install[0].args.contains(&prefix.display().to_string()));
    }

    #[test]
    fn test_python_setup_py_wins_over_pip() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("setup.py"), "").unwrap();
        std::fs::write(src.join("pyproject.toml"), "").unwrap();

        let (build, prefix) = (temp.path().join("build"), temp.path().join("install"));
        let ctx = ctx(&src, &build, &prefix);
        let backend = BuildSystem::Python.backend();

        let compile = backend.compile(&ctx).unwrap();
        assert_eq!(compile[0].program, "python3");

        let install = backend.install(&ctx).unwrap();
        assert_eq!(install[0].program, "python3");
    }

    #[test]
    fn test_python_falls_back_to_pip() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("pyproject.toml"), "").unwrap();

        let (build, prefix) = (temp.path().join("build"), temp.path().join("install"));
        let ctx = ctx(&src, &build, &prefix);
        let compile = BuildSystem::Python.backend().compile(&ctx).unwrap();
        assert_eq!(compile[0].program, "pip");
        assert!(compile[0].args.contains(&"--no-deps".to_string()));
    }

    #[test]
    fn test_python_without_build_files_is_invalid() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();

        let (build, prefix) = (temp.path().join("build"), temp.path().join("install"));
        let ctx = ctx(&src, &build, &prefix);
        assert!(matches!(
            BuildSystem::Python.backend().compile(&ctx),
            Err(Error::Invalid(_))
        ));
    }

    fn builder_fixture<'a>(
        temp: &TempDir,
        recipe: &'a Recipe,
        hooks: &'a mut HookManager,
        options: BuildOptions,
    ) -> Builder<'a> {
        let sandbox = Sandbox::new(temp.path().join("sandbox")).unwrap();
        Builder::new(recipe, sandbox, temp.path().join("dest"), hooks, options)
    }

    #[test]
    fn test_dry_run_returns_sentinel_without_spawning() {
        let temp = TempDir::new().unwrap();
        let r = recipe(BuildSystem::Autotools);
        let mut hooks = HookManager::new();
        let builder = builder_fixture(
            &temp,
            &r,
            &mut hooks,
            BuildOptions::new().with_dry_run(true),
        );

        let spec = CommandSpec::new(
            "definitely-not-a-real-binary",
            vec![],
            temp.path(),
        );
        assert_eq!(builder.run_command(&spec).unwrap(), DRY_RUN_SENTINEL);
    }

    #[test]
    #[cfg(unix)]
    fn test_failing_command_reports_code() {
        let temp = TempDir::new().unwrap();
        let r = recipe(BuildSystem::Autotools);
        let mut hooks = HookManager::new();
        let builder = builder_fixture(&temp, &r, &mut hooks, BuildOptions::new());

        let spec = CommandSpec::new(
            "sh",
            vec!["-c".to_string(), "exit 3".to_string()],
            temp.path(),
        );
        let err = builder.run_command(&spec).unwrap_err();
        match err {
            Error::External(msg) => assert!(msg.contains("code 3"), "message: {msg}"),
            other => panic!("expected External, got {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_command_output_is_captured() {
        let temp = TempDir::new().unwrap();
        let r = recipe(BuildSystem::Autotools);
        let mut hooks = HookManager::new();
        let builder = builder_fixture(&temp, &r, &mut hooks, BuildOptions::new());

        let spec = CommandSpec::new(
            "sh",
            vec!["-c".to_string(), "echo captured".to_string()],
            temp.path(),
        );
        assert_eq!(builder.run_command(&spec).unwrap(), "captured");
    }

    #[test]
    #[cfg(unix)]
    fn test_timeout_kills_long_running_command() {
        let temp = TempDir::new().unwrap();
        let r = recipe(BuildSystem::Autotools);
        let mut hooks = HookManager::new();
        let builder = builder_fixture(
            &temp,
            &r,
            &mut hooks,
            BuildOptions::new().with_timeout(Duration::from_millis(200)),
        );

        let spec = CommandSpec::new(
            "sh",
            vec!["-c".to_string(), "sleep 30".to_string()],
            temp.path(),
        );
        let start = Instant::now();
        let result = builder.run_command(&spec);
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn test_prepare_sandbox_copies_and_wipes_previous() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::write(source.join("sub/main.c"), "int main(){}").unwrap();

        let mut r = recipe(BuildSystem::Autotools);
        r.source_dir = Some(source);
        let mut hooks = HookManager::new();
        let mut builder = builder_fixture(&temp, &r, &mut hooks, BuildOptions::new());

        // leftover from a previous attempt must disappear
        let stale = temp.path().join("sandbox/src/stale.o");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "stale").unwrap();

        builder.prepare_sandbox().unwrap();
        assert!(temp.path().join("sandbox/src/sub/main.c").exists());
        assert!(!stale.exists());
        assert!(temp.path().join("sandbox/build").exists());
        assert!(temp.path().join("sandbox/install").exists());
    }

    #[test]
    fn test_prepare_sandbox_without_source_dir_is_invalid() {
        let temp = TempDir::new().unwrap();
        let r = recipe(BuildSystem::Autotools);
        let mut hooks = HookManager::new();
        let mut builder = builder_fixture(&temp, &r, &mut hooks, BuildOptions::new());
        assert!(matches!(
            builder.prepare_sandbox(),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_promote_replaces_existing_destination() {
        let temp = TempDir::new().unwrap();
        let r = recipe(BuildSystem::Autotools);
        let mut hooks = HookManager::new();
        let mut builder = builder_fixture(&temp, &r, &mut hooks, BuildOptions::new());

        // stage a tree
        let prefix = builder.install_prefix().to_path_buf();
        std::fs::create_dir_all(prefix.join("bin")).unwrap();
        std::fs::write(prefix.join("bin/demo"), "new binary").unwrap();

        // pre-existing destination with old content
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("old-file"), "old").unwrap();

        builder.promote().unwrap();
        assert!(dest.join("bin/demo").exists());
        assert!(!dest.join("old-file").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_failed_stage_hook_aborts_build() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        std::fs::create_dir_all(&source).unwrap();

        let mut r = recipe(BuildSystem::Ninja);
        r.source_dir = Some(source);
        r.hooks
            .insert("pre_configure".to_string(), vec!["false".to_string()]);

        let mut hooks = HookManager::new();
        hooks.register_recipe_hooks(&r);
        let mut builder = builder_fixture(&temp, &r, &mut hooks, BuildOptions::new());

        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::External(_)));
    }

    #[test]
    fn test_clean_removes_build_and_prefix() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        let mut r = recipe(BuildSystem::Autotools);
        r.source_dir = Some(source);

        let mut hooks = HookManager::new();
        let mut builder = builder_fixture(&temp, &r, &mut hooks, BuildOptions::new());
        builder.prepare_sandbox().unwrap();

        builder.clean().unwrap();
        assert!(!temp.path().join("sandbox/build").exists());
        assert!(!temp.path().join("sandbox/install").exists());
    }
}
