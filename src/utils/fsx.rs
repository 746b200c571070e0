//! Small filesystem helpers shared across the pipeline

use crate::error::Result;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Strip the root anchor from a path, yielding the path relative to `/`.
///
/// `/usr/bin/foo` becomes `usr/bin/foo`; relative paths pass through
/// unchanged. Used to reproduce absolute paths under a sandbox root.
pub fn relative_to_anchor(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect()
}

/// Atomically replace the file at `path` with `contents`.
///
/// Writes to a temp file in the same directory, then renames over the
/// target so readers never observe a torn file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.persist(path)
        .map_err(|e| crate::error::Error::Io(e.error))?;
    Ok(())
}
