#![allow(dead_code)] // Allow unused code during early development

use clap::{Parser, Subcommand};
use std::process;

mod binpkg;
mod build;
mod cache;
mod cli;
mod config;
mod db;
mod error;
mod flags;
mod graph;
mod hash;
mod history;
mod hooks;
mod info;
mod query;
mod recipe;
mod remove;
mod resolver;
mod sandbox;
mod search;
mod utils;

#[derive(Parser)]
#[command(name = "srcpm")]
#[command(version)]
#[command(about = "From-source package manager with staged installs and rollback")]
#[command(
    long_about = "srcpm builds packages from source through their native build system, \
stages the result in a sandbox, and only promotes complete trees to the real \
system. Successful builds are captured as binary packages for replay."
)]
#[command(after_help = "\
Getting started:
  srcpm create hello             Scaffold a new package recipe
  srcpm install hello            Build and install it
  srcpm history                  See what happened

Every action is journaled; `srcpm history` shows the audit trail.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Simulate operations without executing them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Build parallelism
    #[arg(short, long, global = true, value_name = "N")]
    jobs: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    // === Packages (1-9) ===
    /// Build and install a package from source
    #[command(display_order = 1, visible_alias = "i")]
    Install(cli::install::InstallArgs),
    /// Remove an installed package
    #[command(display_order = 2, visible_alias = "rm")]
    Remove(cli::remove::RemoveArgs),
    /// Upgrade installed packages to their repository versions
    #[command(display_order = 3, visible_alias = "up")]
    Upgrade(cli::upgrade::UpgradeArgs),

    // === Configuration (10-19) ===
    /// Query or adjust USE flags
    #[command(display_order = 10, visible_alias = "fl")]
    Flags(cli::flags::FlagsArgs),
    /// Synchronize the recipe repository index
    #[command(display_order = 11, visible_alias = "s")]
    Sync(cli::sync::SyncArgs),

    // === Authoring (20-29) ===
    /// Scaffold a new package recipe
    #[command(display_order = 20, visible_alias = "c")]
    Create(cli::create::CreateArgs),

    // === Audit (30-39) ===
    /// Show the package action journal
    #[command(display_order = 30, visible_alias = "h")]
    History(cli::history::HistoryArgs),
}

fn main() {
    let args = Cli::parse();
    let global = cli::Global {
        verbose: args.verbose,
        dry_run: args.dry_run,
        jobs: args.jobs,
    };

    let result = match &args.command {
        Commands::Install(args) => cli::install::execute(args, &global),
        Commands::Remove(args) => cli::remove::execute(args, &global),
        Commands::Upgrade(args) => cli::upgrade::execute(args, &global),
        Commands::Flags(args) => cli::flags::execute(args, &global),
        Commands::Sync(args) => cli::sync::execute(args, &global),
        Commands::Create(args) => cli::create::execute(args, &global),
        Commands::History(args) => cli::history::execute(args, &global),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
