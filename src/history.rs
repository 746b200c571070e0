//! Package action journal
//!
//! Append-only record of every package-level action, persisted as a
//! single JSON array. The file is re-read on every operation and
//! atomically replaced on every write, so a reader never observes a torn
//! journal. Ids are assigned on append and are strictly monotonic within
//! one file.

use crate::cache::CacheManager;
use crate::error::{Error, Result};
use crate::sandbox::Sandbox;
use crate::utils::fsx::{atomic_write, relative_to_anchor};
use crate::utils::output::print_debug;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Default journal location.
pub const DEFAULT_HISTORY_FILE: &str = "/var/log/source_history.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub id: u64,
    /// ISO-8601 timestamp of when the action completed.
    pub timestamp: String,
    pub action: String,
    pub package: String,
    #[serde(default)]
    pub details: Value,
    pub status: String,
}

/// Filters for `History::list`.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter<'a> {
    pub package: Option<&'a str>,
    pub action: Option<&'a str>,
    pub status: Option<&'a str>,
}

pub struct History {
    path: PathBuf,
    verbose: bool,
}

impl History {
    /// Open (creating if needed) the journal at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            std::fs::write(&path, "[]")?;
        }
        Ok(Self {
            path,
            verbose: false,
        })
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<HistoryEntry>> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;
        atomic_write(&self.path, content.as_bytes())
    }

    /// Append an entry, assigning the next id.
    pub fn record(
        &self,
        action: &str,
        package: &str,
        details: Value,
        status: &str,
    ) -> Result<HistoryEntry> {
        let mut entries = self.load()?;
        let entry = HistoryEntry {
            id: entries.len() as u64 + 1,
            timestamp: Utc::now().to_rfc3339(),
            action: action.to_string(),
            package: package.to_string(),
            details,
            status: status.to_string(),
        };
        entries.push(entry.clone());
        self.save(&entries)?;
        print_debug(
            self.verbose,
            &format!("history: {} | {} | {}", action, package, status),
        );
        Ok(entry)
    }

    /// Filtered view of the journal, truncated to the last `limit` entries.
    pub fn list(&self, limit: usize, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>> {
        let entries = self.load()?;
        let filtered: Vec<HistoryEntry> = entries
            .into_iter()
            .filter(|e| filter.package.map(|p| e.package == p).unwrap_or(true))
            .filter(|e| filter.action.map(|a| e.action == a).unwrap_or(true))
            .filter(|e| filter.status.map(|s| e.status == s).unwrap_or(true))
            .collect();
        let skip = filtered.len().saturating_sub(limit);
        Ok(filtered.into_iter().skip(skip).collect())
    }

    pub fn find(&self, action_id: u64) -> Result<Option<HistoryEntry>> {
        Ok(self.load()?.into_iter().find(|e| e.id == action_id))
    }

    /// Undo the file effects of a recorded action.
    ///
    /// For every file the action touched, restore the cached copy when
    /// one exists, otherwise remove the file's counterpart from the
    /// sandbox. Records a `rolled_back` entry referencing the original id.
    pub fn rollback(
        &self,
        action_id: u64,
        cache: Option<&CacheManager>,
        sandbox: Option<&Sandbox>,
    ) -> Result<()> {
        let entry = self
            .find(action_id)?
            .ok_or_else(|| Error::NotFound(format!("history action {action_id}")))?;

        let files: Vec<PathBuf> = entry
            .details
            .get("files")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        for file in &files {
            let basename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let cached = cache.and_then(|c| c.get_file(&basename));
            if let Some(cached) = cached {
                std::fs::copy(&cached, file)?;
                print_debug(
                    self.verbose,
                    &format!("rollback: restored {} from cache", file.display()),
                );
            } else if let Some(sandbox) = sandbox {
                let staged = sandbox.root().join(relative_to_anchor(file));
                if staged.exists() {
                    std::fs::remove_file(&staged)?;
                    print_debug(
                        self.verbose,
                        &format!("rollback: removed {} from sandbox", staged.display()),
                    );
                }
            }
        }

        self.record(
            "rollback",
            &entry.package,
            serde_json::json!({ "rolled_back_id": action_id }),
            "rolled_back",
        )?;
        Ok(())
    }

    /// Write the full journal to another file.
    pub fn export(&self, output: &Path) -> Result<()> {
        let entries = self.load()?;
        let content = serde_json::to_string_pretty(&entries)?;
        std::fs::write(output, content)?;
        Ok(())
    }
}
