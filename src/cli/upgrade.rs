//! `srcpm upgrade` command implementation
//!
//! Rebuilds installed packages whose repository recipe carries a newer
//! version than the installed one.

use crate::cli::install::install_one;
use crate::cli::Global;
use crate::config::Settings;
use crate::db::{InstalledDb, JsonDb};
use crate::error::{Error, Result};
use crate::history::History;
use crate::search::{load_repo_recipe, PackageSearch};
use crate::utils::output::{print_info, print_warning};
use clap::Args;

#[derive(Args)]
#[command(after_help = "\
Examples:
  srcpm upgrade zlib                      Upgrade one package
  srcpm upgrade --all                     Upgrade everything installed")]
pub struct UpgradeArgs {
    /// Package name to upgrade (omit with --all)
    #[arg(value_name = "PACKAGE")]
    pub package: Option<String>,

    /// Upgrade every installed package
    #[arg(long)]
    pub all: bool,
}

pub fn execute(args: &UpgradeArgs, global: &Global) -> Result<()> {
    let settings = Settings::load()?.for_current_user();
    upgrade_with_settings(args, global, &settings)
}

pub(crate) fn upgrade_with_settings(
    args: &UpgradeArgs,
    global: &Global,
    settings: &Settings,
) -> Result<()> {
    let history = History::new(&settings.history_file)?.with_verbose(global.verbose);
    let mut db = JsonDb::load(&settings.installed_db)?;

    let targets: Vec<String> = if args.all {
        db.installed_packages()
    } else {
        match &args.package {
            Some(package) => vec![package.clone()],
            None => {
                return Err(Error::Invalid(
                    "specify a package name or --all".to_string(),
                ))
            }
        }
    };

    let search = PackageSearch::new(settings.repo_paths.clone()).with_history(&history);
    let mut upgraded = 0;
    for package in &targets {
        let Some(installed) = db.recipe(package) else {
            print_warning(&format!("{package} is not installed, skipping"));
            continue;
        };
        let Some(pkg_path) = search.find_package(package) else {
            print_warning(&format!("no repository recipe for {package}, skipping"));
            continue;
        };
        let Some(mut candidate) = load_repo_recipe(&pkg_path) else {
            print_warning(&format!("package {package} has no recipe, skipping"));
            continue;
        };
        if candidate.version == installed.version {
            print_info(&format!("{package} is up to date ({})", installed.version));
            continue;
        }
        if candidate.source_dir.is_none() {
            candidate.source_dir = Some(pkg_path.join("src"));
        }

        print_info(&format!(
            "upgrading {package} {} -> {}",
            installed.version, candidate.version
        ));
        if global.dry_run {
            continue;
        }
        install_one(
            &candidate,
            settings.dest_root.join(package),
            &mut db,
            settings,
            &history,
            global,
        )?;
        upgraded += 1;
    }

    print_info(&format!("{upgraded} package(s) upgraded"));
    Ok(())
}
