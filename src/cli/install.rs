//! `srcpm install` command implementation
//!
//! Resolves the target recipe against the installed database, then walks
//! the missing packages in topological order through the full
//! build/stage/promote pipeline, producing a binary package for each
//! successful build.

use crate::binpkg::{BinPkgStore, Compression};
use crate::build::{BuildOptions, Builder};
use crate::cli::Global;
use crate::config::Settings;
use crate::db::{InstalledDb, JsonDb};
use crate::error::{Error, Result};
use crate::flags::UseFlags;
use crate::history::History;
use crate::hooks::HookManager;
use crate::recipe::Recipe;
use crate::resolver::Resolver;
use crate::sandbox::Sandbox;
use crate::search::{load_repo_recipe, PackageSearch};
use crate::utils::output::print_info;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Args)]
#[command(after_help = "\
Examples:
  srcpm install zlib                      Build and install a package
  srcpm install zlib --prefix /opt/zlib   Install under a custom prefix
  srcpm install zlib --force              Rebuild even if installed")]
pub struct InstallArgs {
    /// Package name to install
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Custom installation prefix for the target package
    #[arg(long, value_name = "P")]
    pub prefix: Option<PathBuf>,

    /// Reinstall even when the package is already installed
    #[arg(long)]
    pub force: bool,
}

pub fn execute(args: &InstallArgs, global: &Global) -> Result<()> {
    let settings = Settings::load()?.for_current_user();
    install_with_settings(args, global, &settings)
}

pub(crate) fn install_with_settings(
    args: &InstallArgs,
    global: &Global,
    settings: &Settings,
) -> Result<()> {
    let history = History::new(&settings.history_file)?.with_verbose(global.verbose);
    let mut db = JsonDb::load(&settings.installed_db)?;
    let use_flags = UseFlags::load(&settings.use_conf)?;

    let search = PackageSearch::new(settings.repo_paths.clone()).with_history(&history);
    let pkg_path = search
        .find_package(&args.package)
        .ok_or_else(|| Error::NotFound(format!("recipe for {}", args.package)))?;
    let root_recipe = prepare_recipe(&pkg_path, &args.package)?;

    if db.is_installed(&args.package) && !args.force {
        let message = format!("{} is already installed (use --force)", args.package);
        history.record("install", &args.package, json!({}), &format!("error: {message}"))?;
        return Err(Error::Conflict(message));
    }

    let active = use_flags.active_flags_for(&args.package);
    let resolver = Resolver::new(&db);
    let order = resolver.resolve(&root_recipe, &active)?;
    let mut wanted: BTreeSet<String> = resolver
        .find_missing(&root_recipe, &active)?
        .into_iter()
        .collect();
    if args.force {
        wanted.insert(root_recipe.name.clone());
    }
    let targets: Vec<String> = order.into_iter().filter(|p| wanted.contains(p)).collect();

    if targets.is_empty() {
        print_info(&format!("{} is already installed", args.package));
        return Ok(());
    }

    let bar = ProgressBar::new(targets.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("[{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    for package in &targets {
        bar.set_message(package.clone());
        let recipe = if *package == root_recipe.name {
            root_recipe.clone()
        } else {
            let dep_path = search
                .find_package(package)
                .ok_or_else(|| Error::NotFound(format!("recipe for {package}")))?;
            prepare_recipe(&dep_path, package)?
        };
        let dest = if *package == root_recipe.name {
            args.prefix
                .clone()
                .unwrap_or_else(|| settings.dest_root.join(package))
        } else {
            settings.dest_root.join(package)
        };
        install_one(&recipe, dest, &mut db, settings, &history, global)?;
        bar.inc(1);
    }
    bar.finish_with_message("done");

    Ok(())
}

/// Load the repository recipe, defaulting its source tree to the
/// conventional `src/` directory beside it.
fn prepare_recipe(pkg_path: &Path, package: &str) -> Result<Recipe> {
    let mut recipe = load_repo_recipe(pkg_path)
        .ok_or_else(|| Error::Invalid(format!("package {package} has no recipe")))?;
    if recipe.source_dir.is_none() {
        recipe.source_dir = Some(pkg_path.join("src"));
    }
    Ok(recipe)
}

/// Build, stage and promote one package, then register it and produce
/// its binary package.
pub(crate) fn install_one(
    recipe: &Recipe,
    dest: PathBuf,
    db: &mut JsonDb,
    settings: &Settings,
    history: &History,
    global: &Global,
) -> Result<()> {
    let mut hooks = HookManager::new().with_verbose(global.verbose);
    hooks.register_recipe_hooks(recipe);

    let sandbox =
        Sandbox::for_package(&settings.sandbox_base, &recipe.name)?.with_verbose(global.verbose);
    let options = BuildOptions::new()
        .with_jobs(global.jobs.unwrap_or(settings.jobs))
        .with_verbose(global.verbose)
        .with_dry_run(global.dry_run);

    let mut builder = Builder::new(recipe, sandbox, dest, &mut hooks, options).with_history(history);
    builder.build()?;
    builder.install()?;

    if !global.dry_run {
        let files = staged_files(builder.install_prefix());
        BinPkgStore::new(&settings.binpkg_dir)?
            .with_history(history)
            .create_binpkg(
                &recipe.name,
                &recipe.version,
                builder.install_prefix(),
                &settings.arch,
                Compression::Gz,
            )?;
        db.add_package(recipe.clone(), files)?;
    }

    // success: the sandbox has served its purpose
    let mut sandbox = builder.into_sandbox();
    sandbox.cleanup()?;
    Ok(())
}

fn staged_files(prefix: &Path) -> Vec<PathBuf> {
    WalkDir::new(prefix)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(prefix).ok().map(Path::to_path_buf))
        .collect()
}
