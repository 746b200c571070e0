//! `srcpm flags` command implementation
//!
//! Query and adjust USE flags: list the global set, toggle a global
//! flag, or show the flags a package sees.

use crate::cli::Global;
use crate::config::Settings;
use crate::error::Result;
use crate::flags::UseFlags;
use crate::query::UseQuery;
use crate::utils::output::print_info;
use clap::Args;

#[derive(Args)]
#[command(after_help = "\
Examples:
  srcpm flags --list                      List all global flags
  srcpm flags --enable ssl                Turn a global flag on
  srcpm flags curl                        Show flags for one package")]
pub struct FlagsArgs {
    /// Package to show flags for
    #[arg(value_name = "PACKAGE")]
    pub package: Option<String>,

    /// List all global flags and their state
    #[arg(long)]
    pub list: bool,

    /// Enable a global flag
    #[arg(long, value_name = "FLAG")]
    pub enable: Option<String>,

    /// Disable a global flag
    #[arg(long, value_name = "FLAG")]
    pub disable: Option<String>,
}

pub fn execute(args: &FlagsArgs, global: &Global) -> Result<()> {
    let settings = Settings::load()?.for_current_user();
    flags_with_settings(args, global, &settings)
}

pub(crate) fn flags_with_settings(
    args: &FlagsArgs,
    global: &Global,
    settings: &Settings,
) -> Result<()> {
    let mut use_flags = UseFlags::load(&settings.use_conf)?.with_verbose(global.verbose);

    if args.list {
        let all = use_flags.list_all_flags();
        if all.global.is_empty() {
            print_info("no global flags configured");
        }
        for flag in all.global {
            let state = if use_flags.is_flag_enabled(&flag) {
                "enabled"
            } else {
                "disabled"
            };
            println!("{flag} = {state}");
        }
        return Ok(());
    }

    if let Some(flag) = &args.enable {
        if global.dry_run {
            print_info(&format!("dry-run: would enable {flag}"));
            return Ok(());
        }
        use_flags.enable_global(flag, "cli")?;
        print_info(&format!("{flag} enabled"));
        return Ok(());
    }

    if let Some(flag) = &args.disable {
        if global.dry_run {
            print_info(&format!("dry-run: would disable {flag}"));
            return Ok(());
        }
        use_flags.disable_global(flag, "cli")?;
        print_info(&format!("{flag} disabled"));
        return Ok(());
    }

    if let Some(package) = &args.package {
        let mut query = UseQuery::new(settings.repo_paths.clone(), &settings.query_cache_dir)?
            .with_verbose(global.verbose);
        let assigned = query.list_package_flags(package)?;
        for (flag, value) in &assigned {
            println!("{flag}={value}");
        }
        let active = use_flags.active_flags_for(package);
        if !active.is_empty() {
            println!(
                "active: {}",
                active.into_iter().collect::<Vec<_>>().join(" ")
            );
        }
        return Ok(());
    }

    // default view: everything currently enabled
    let enabled = use_flags.list_enabled_flags();
    println!("global: {}", enabled.global.join(" "));
    for (package, flags) in enabled.packages {
        println!("{package}: {}", flags.join(" "));
    }
    Ok(())
}
