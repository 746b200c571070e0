//! Source artifact cache
//!
//! Stores fetched distfiles across one or more cache roots, flat by
//! basename. Lookup is first-hit in root order; no merging. Entries
//! expire by age and are bounded by a per-file size quota.

use crate::error::Result;
use crate::hash::{compute_hash, Algorithm};
use crate::utils::output::{print_debug, print_warning};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Default cache root.
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/source/distfiles";

/// One audit event kept by the manager for later inspection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheEvent {
    pub timestamp: String,
    pub action: String,
    pub file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Metadata projection of one cached file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheEntryInfo {
    pub file: PathBuf,
    pub size: u64,
    pub mtime: String,
    pub sha256: String,
    pub valid: bool,
}

pub struct CacheManager {
    cache_dirs: Vec<PathBuf>,
    max_age: Duration,
    max_size: u64,
    verbose: bool,
    events: Vec<CacheEvent>,
}

impl CacheManager {
    /// Open a cache over the given roots, creating them as needed.
    ///
    /// `max_age_days` bounds entry age; `max_size_mb` bounds the size of
    /// any single entry.
    pub fn new(cache_dirs: Vec<PathBuf>, max_age_days: u64, max_size_mb: u64) -> Result<Self> {
        if cache_dirs.is_empty() {
            return Err(crate::error::Error::Invalid(
                "at least one cache root is required".to_string(),
            ));
        }
        for dir in &cache_dirs {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self {
            cache_dirs,
            max_age: Duration::from_secs(max_age_days * 24 * 60 * 60),
            max_size: max_size_mb * 1024 * 1024,
            verbose: false,
            events: Vec::new(),
        })
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.cache_dirs
    }

    /// Copy (or gzip) a file into the primary cache root and record its
    /// checksum. Returns the path of the stored entry.
    pub fn store_file(&mut self, file_path: &Path, compress: bool) -> Result<PathBuf> {
        let filename = file_path
            .file_name()
            .ok_or_else(|| {
                crate::error::Error::Invalid(format!(
                    "cannot cache a path without a file name: {}",
                    file_path.display()
                ))
            })?
            .to_os_string();

        let dest_dir = &self.cache_dirs[0];
        let dest = if compress {
            let mut name = filename.clone();
            name.push(".gz");
            let dest = dest_dir.join(name);
            let input = std::fs::read(file_path)?;
            let mut encoder = GzEncoder::new(std::fs::File::create(&dest)?, Compression::default());
            std::io::Write::write_all(&mut encoder, &input)?;
            encoder.finish()?;
            dest
        } else {
            let dest = dest_dir.join(filename);
            std::fs::copy(file_path, &dest)?;
            dest
        };

        let sha256 = compute_hash(&dest, Algorithm::Sha256)?;
        self.events.push(CacheEvent {
            timestamp: Utc::now().to_rfc3339(),
            action: "store_file".to_string(),
            file: dest.clone(),
            sha256: Some(sha256),
        });
        print_debug(self.verbose, &format!("cached {}", dest.display()));
        Ok(dest)
    }

    /// First cache root where a valid entry named `filename` exists.
    pub fn get_file(&self, filename: &str) -> Option<PathBuf> {
        for dir in &self.cache_dirs {
            let candidate = dir.join(filename);
            if candidate.exists() && self.is_valid(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Entry validity: young enough, small enough, readable.
    pub fn is_valid(&self, file_path: &Path) -> bool {
        let Ok(meta) = file_path.metadata() else {
            return false;
        };
        if meta.len() > self.max_size {
            return false;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .unwrap_or(Duration::MAX);
        if age > self.max_age {
            return false;
        }
        std::fs::File::open(file_path).is_ok()
    }

    /// Remove every invalid entry (every entry, when forced).
    ///
    /// A failure to remove one file is logged and does not abort cleanup
    /// of the remaining entries. Returns the number of removed files.
    pub fn clean_cache(&mut self, force: bool) -> Result<usize> {
        let mut removed = 0;
        for dir in &self.cache_dirs {
            for entry in std::fs::read_dir(dir)? {
                let Ok(entry) = entry else { continue };
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if force || !self.is_valid(&path) {
                    match std::fs::remove_file(&path) {
                        Ok(()) => {
                            removed += 1;
                            self.events.push(CacheEvent {
                                timestamp: Utc::now().to_rfc3339(),
                                action: "clean_cache".to_string(),
                                file: path,
                                sha256: None,
                            });
                        }
                        Err(e) => {
                            print_warning(&format!(
                                "failed to remove cache entry {}: {}",
                                path.display(),
                                e
                            ));
                        }
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Full metadata projection over every cached file.
    pub fn list_cache(&self) -> Result<Vec<CacheEntryInfo>> {
        let mut entries = Vec::new();
        for dir in &self.cache_dirs {
            for entry in std::fs::read_dir(dir)? {
                let Ok(entry) = entry else { continue };
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let meta = path.metadata()?;
                let mtime: DateTime<Utc> = meta
                    .modified()
                    .unwrap_or(SystemTime::UNIX_EPOCH)
                    .into();
                entries.push(CacheEntryInfo {
                    sha256: compute_hash(&path, Algorithm::Sha256)?,
                    size: meta.len(),
                    mtime: mtime.to_rfc3339(),
                    valid: self.is_valid(&path),
                    file: path,
                });
            }
        }
        Ok(entries)
    }

    pub fn events(&self) -> &[CacheEvent] {
        &self.events
    }
}
