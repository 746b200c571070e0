//! `srcpm history` command implementation

use crate::cli::Global;
use crate::config::Settings;
use crate::error::Result;
use crate::history::{History, HistoryFilter};
use crate::utils::output::print_info;
use clap::Args;

#[derive(Args)]
#[command(after_help = "\
Examples:
  srcpm history                           Show the last 50 actions
  srcpm history --limit 10 --package zlib")]
pub struct HistoryArgs {
    /// Number of entries to show
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Only entries for this package
    #[arg(long, value_name = "PACKAGE")]
    pub package: Option<String>,

    /// Only entries for this action (install, remove, ...)
    #[arg(long, value_name = "ACTION")]
    pub action: Option<String>,
}

pub fn execute(args: &HistoryArgs, global: &Global) -> Result<()> {
    let settings = Settings::load()?.for_current_user();
    history_with_settings(args, global, &settings)
}

pub(crate) fn history_with_settings(
    args: &HistoryArgs,
    global: &Global,
    settings: &Settings,
) -> Result<()> {
    let history = History::new(&settings.history_file)?.with_verbose(global.verbose);
    let entries = history.list(
        args.limit,
        &HistoryFilter {
            package: args.package.as_deref(),
            action: args.action.as_deref(),
            status: None,
        },
    )?;

    if entries.is_empty() {
        print_info("no history entries");
        return Ok(());
    }
    for entry in entries {
        println!(
            "#{:<5} {}  {:<16} {:<20} {}",
            entry.id, entry.timestamp, entry.action, entry.package, entry.status
        );
    }
    Ok(())
}
