//! `srcpm remove` command implementation
//!
//! Reverse-dependency-guarded uninstall against the staged system tree.
//! A forced removal asks for confirmation first unless `--yes` is given.

use crate::cli::Global;
use crate::config::Settings;
use crate::db::JsonDb;
use crate::error::{Error, Result};
use crate::history::History;
use crate::hooks::HookManager;
use crate::remove::Remover;
use crate::sandbox::Sandbox;
use crate::utils::output::print_info;
use clap::Args;

#[derive(Args)]
#[command(after_help = "\
Examples:
  srcpm remove zlib                       Remove a package
  srcpm remove zlib --force -y            Remove despite dependents")]
pub struct RemoveArgs {
    /// Package name to remove
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Remove even when other packages depend on it
    #[arg(long)]
    pub force: bool,

    /// Skip the confirmation prompt for forced removals
    #[arg(short = 'y', long)]
    pub yes: bool,
}

pub fn execute(args: &RemoveArgs, global: &Global) -> Result<()> {
    let settings = Settings::load()?.for_current_user();
    remove_with_settings(args, global, &settings)
}

pub(crate) fn remove_with_settings(
    args: &RemoveArgs,
    global: &Global,
    settings: &Settings,
) -> Result<()> {
    if args.force && !args.yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Force-remove {} even if other packages depend on it?",
                args.package
            ))
            .default(false)
            .interact()
            .map_err(|e| Error::External(format!("confirmation prompt: {e}")))?;
        if !confirmed {
            print_info("aborted");
            return Ok(());
        }
    }

    if global.dry_run {
        print_info(&format!("dry-run: would remove {}", args.package));
        return Ok(());
    }

    let history = History::new(&settings.history_file)?.with_verbose(global.verbose);
    let mut db = JsonDb::load(&settings.installed_db)?;
    let mut sandbox = Sandbox::new(settings.sandbox_base.join("system"))?
        .with_verbose(global.verbose);
    let mut hooks = HookManager::new().with_verbose(global.verbose);

    let removed = Remover::new(&mut db, &mut sandbox, &mut hooks)
        .with_history(&history)
        .with_verbose(global.verbose)
        .remove_package(&args.package, args.force)?;

    if !removed {
        return Err(Error::Conflict(format!(
            "could not remove {}; see history for details",
            args.package
        )));
    }
    Ok(())
}
