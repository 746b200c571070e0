//! Crate-wide error type
//!
//! One enum covering the semantic failure classes of the package pipeline.
//! Integrity, Conflict and Invalid abort the enclosing operation (with a
//! sandbox rollback when a snapshot exists); External aborts the current
//! stage; NotFound aborts only when the missing item is mandatory;
//! Permission is downgraded to a warning where non-fatal.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("command failed: {0}")]
    External(String),

    #[error("permission denied: {0}")]
    Permission(String),
}

pub type Result<T> = std::result::Result<T, Error>;
