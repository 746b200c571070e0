//! `srcpm create` command implementation
//!
//! Scaffolds a new package directory in the first repository root: base
//! recipe, per-stage hook stubs, README and an initial git commit.

use crate::cli::Global;
use crate::config::Settings;
use crate::error::Result;
use crate::history::History;
use crate::recipe::{create_base_recipe, BuildSystem};
use crate::utils::output::print_info;
use clap::Args;

#[derive(Args)]
#[command(after_help = "\
Examples:
  srcpm create hello                      Scaffold with the autotools template
  srcpm create hello --template cmake     Pick another build system
  srcpm create hello --version 2.12")]
pub struct CreateArgs {
    /// Package name to create
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Build-system template (autotools, cmake, meson, ninja, rust, python)
    #[arg(long, value_name = "T", default_value = "autotools")]
    pub template: String,

    /// Initial version for the recipe
    #[arg(long, default_value = "1.0.0")]
    pub version: String,
}

pub fn execute(args: &CreateArgs, global: &Global) -> Result<()> {
    let settings = Settings::load()?.for_current_user();
    create_with_settings(args, global, &settings)
}

pub(crate) fn create_with_settings(
    args: &CreateArgs,
    global: &Global,
    settings: &Settings,
) -> Result<()> {
    let build_system: BuildSystem = args.template.parse()?;

    if global.dry_run {
        print_info(&format!(
            "dry-run: would scaffold {} ({}) in {}",
            args.package,
            build_system,
            settings.repo_paths[0].display()
        ));
        return Ok(());
    }

    let history = History::new(&settings.history_file)?.with_verbose(global.verbose);
    let recipe_file = create_base_recipe(
        &settings.repo_paths[0],
        &args.package,
        &args.version,
        build_system,
        Some(&history),
    )?;

    print_info(&format!("recipe created: {}", recipe_file.display()));
    Ok(())
}
