pub mod create;
pub mod flags;
pub mod history;
pub mod install;
pub mod remove;
pub mod sync;
pub mod upgrade;

/// Global options shared by every subcommand.
#[derive(Debug, Clone, Copy, Default)]
pub struct Global {
    pub verbose: bool,
    pub dry_run: bool,
    pub jobs: Option<usize>,
}
