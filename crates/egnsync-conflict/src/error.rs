//! Error types for change detection and conflict policies

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fingerprinting files or building policies
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Reading a local file for fingerprinting failed
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking hashing task panicked or was cancelled
    #[error("fingerprint task failed: {0}")]
    Task(String),

    /// Invalid glob pattern or policy in a conflict rule
    #[error("invalid conflict rule: {pattern}: {reason}")]
    InvalidRule { pattern: String, reason: String },
}
