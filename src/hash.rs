//! Multi-algorithm file hashing
//!
//! Streams files through SHA-256, SHA-512, MD5 or BLAKE2b in 8 KiB
//! chunks, optionally resolving paths through the staging sandbox or the
//! distfile cache first. Also embeds computed hashes back into recipe
//! metadata and verifies recorded checksums.

use crate::cache::CacheManager;
use crate::error::{Error, Result};
use crate::history::History;
use crate::sandbox::Sandbox;
use crate::utils::fsx::{atomic_write, relative_to_anchor};
use crate::utils::render::{render, RenderFormat};
use blake2::Blake2b512;
use md5::Md5;
use serde_json::{json, Value};
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Sha512,
    Md5,
    Blake2b,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
            Algorithm::Md5 => "md5",
            Algorithm::Blake2b => "blake2b",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            "md5" => Ok(Algorithm::Md5),
            "blake2b" | "blake2" => Ok(Algorithm::Blake2b),
            other => Err(Error::Invalid(format!("unsupported hash algorithm: {other}"))),
        }
    }
}

fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = D::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Hash a file's contents with the selected algorithm.
pub fn compute_hash(path: &Path, algorithm: Algorithm) -> Result<String> {
    match algorithm {
        Algorithm::Sha256 => digest_file::<Sha256>(path),
        Algorithm::Sha512 => digest_file::<Sha512>(path),
        Algorithm::Md5 => digest_file::<Md5>(path),
        Algorithm::Blake2b => digest_file::<Blake2b512>(path),
    }
}

/// Hashing front-end wired to the sandbox, cache and audit journal.
#[derive(Default)]
pub struct HashService<'a> {
    sandbox: Option<&'a Sandbox>,
    cache: Option<&'a CacheManager>,
    history: Option<&'a History>,
}

impl<'a> HashService<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sandbox(mut self, sandbox: &'a Sandbox) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_cache(mut self, cache: &'a CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_history(mut self, history: &'a History) -> Self {
        self.history = Some(history);
        self
    }

    /// Hash a file, resolving the path first.
    ///
    /// With a sandbox configured the path is rewritten beneath the
    /// sandbox root; with a cache configured a cache hit on the basename
    /// takes precedence over the file itself.
    pub fn generate_hash(&self, path: &Path, algorithm: Algorithm) -> Result<String> {
        let path = match self.sandbox {
            Some(sandbox) => sandbox.root().join(relative_to_anchor(path)),
            None => path.to_path_buf(),
        };

        if let Some(cache) = self.cache {
            let basename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(cached) = cache.get_file(&basename) {
                return compute_hash(&cached, algorithm);
            }
        }

        compute_hash(&path, algorithm)
    }

    /// Hash several files under several algorithms.
    pub fn generate_for_files(
        &self,
        files: &[&Path],
        algorithms: &[Algorithm],
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
        let mut all = BTreeMap::new();
        for file in files {
            let mut per_file = BTreeMap::new();
            for algorithm in algorithms {
                per_file.insert(
                    algorithm.to_string(),
                    self.generate_hash(file, *algorithm)?,
                );
            }
            all.insert(file.display().to_string(), per_file);
        }
        Ok(all)
    }

    /// Embed a hash map into a JSON recipe file, rewriting it atomically.
    pub fn inject_into_recipe(
        &self,
        recipe_file: &Path,
        hashes: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<()> {
        if !recipe_file.exists() {
            return Err(Error::NotFound(format!(
                "recipe file {}",
                recipe_file.display()
            )));
        }
        let content = std::fs::read_to_string(recipe_file)?;
        let mut data: Value = serde_json::from_str(&content)
            .map_err(|_| Error::Invalid("recipe must be valid JSON".to_string()))?;
        if !data.is_object() {
            return Err(Error::Invalid("recipe must be a JSON object".to_string()));
        }
        data["hashes"] = serde_json::to_value(hashes)?;
        atomic_write(recipe_file, serde_json::to_string_pretty(&data)?.as_bytes())
    }

    /// Compare a file against its expected digest.
    ///
    /// The comparison is recorded in the audit journal whether it matches
    /// or not.
    pub fn verify_integrity(
        &self,
        path: &Path,
        expected: &str,
        algorithm: Algorithm,
    ) -> Result<bool> {
        let actual = self.generate_hash(path, algorithm)?;
        let matches = actual == expected;
        if let Some(history) = self.history {
            history.record(
                "verify_integrity",
                &path.display().to_string(),
                json!({
                    "algorithm": algorithm.to_string(),
                    "expected": expected,
                    "actual": actual,
                }),
                if matches { "success" } else { "error: hash mismatch" },
            )?;
        }
        Ok(matches)
    }

    /// Render a hash map in one of the supported output formats.
    pub fn export(
        &self,
        hashes: &BTreeMap<String, BTreeMap<String, String>>,
        format: RenderFormat,
    ) -> Result<String> {
        render(&serde_json::to_value(hashes)?, format)
    }
}
