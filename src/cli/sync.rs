//! `srcpm sync` command implementation
//!
//! Thin repository synchronizer: fetches the remote index into the first
//! repository root and journals the result.

use crate::cli::Global;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::history::History;
use crate::utils::output::print_info;
use clap::Args;
use serde_json::json;
use std::time::Duration;

#[derive(Args)]
#[command(after_help = "\
Examples:
  srcpm sync                              Sync from the configured URL
  srcpm sync --repo-url https://repo.example.org")]
pub struct SyncArgs {
    /// Remote repository URL (overrides the configured one)
    #[arg(long, value_name = "U")]
    pub repo_url: Option<String>,
}

pub fn execute(args: &SyncArgs, global: &Global) -> Result<()> {
    let settings = Settings::load()?.for_current_user();
    sync_with_settings(args, global, &settings)
}

pub(crate) fn sync_with_settings(
    args: &SyncArgs,
    global: &Global,
    settings: &Settings,
) -> Result<()> {
    let url = args
        .repo_url
        .clone()
        .or_else(|| settings.repo_url.clone())
        .ok_or_else(|| {
            Error::Invalid("no repository URL configured (use --repo-url)".to_string())
        })?;

    if global.dry_run {
        print_info(&format!("dry-run: would sync from {url}"));
        return Ok(());
    }

    let history = History::new(&settings.history_file)?.with_verbose(global.verbose);
    let index_url = format!("{}/index.json", url.trim_end_matches('/'));

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::External(format!("HTTP client: {e}")))?;
    let response = client
        .get(&index_url)
        .send()
        .map_err(|e| Error::External(format!("GET {index_url}: {e}")))?;
    if !response.status().is_success() {
        let message = format!("GET {index_url}: {}", response.status());
        history.record("sync", "repository", json!({ "url": url }), &format!("error: {message}"))?;
        return Err(Error::External(message));
    }
    let body = response
        .bytes()
        .map_err(|e| Error::External(format!("reading index: {e}")))?;

    let repo_root = &settings.repo_paths[0];
    std::fs::create_dir_all(repo_root)?;
    std::fs::write(repo_root.join("index.json"), &body)?;

    history.record("sync", "repository", json!({ "url": url }), "success")?;
    print_info(&format!("repository index synced from {url}"));
    Ok(())
}
