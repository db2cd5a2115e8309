//! egnsync State - Sync baseline persistence
//!
//! JSON-file store for the last synchronized fingerprint and version of
//! every tracked path, keyed by (sync pair, relative path).
//!
//! ## Architecture
//!
//! This crate implements the `IStateStore` port from `egnsync-core`. It is
//! a driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`JsonStateStore`] - `IStateStore` implementation with batched atomic writes
//! - [`StateError`] - Error types for store operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use egnsync_state::JsonStateStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = JsonStateStore::open(Path::new("/home/user/.local/share/egnsync/sync-state.json")).await?;
//! // Use store as IStateStore...
//! # Ok(())
//! # }
//! ```

pub mod store;

use std::path::PathBuf;

pub use store::JsonStateStore;

/// Errors that can occur during state store operations
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Reading or writing the state file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but cannot be parsed
    #[error("State file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The state file was written by an incompatible version
    #[error("Unsupported state format {found} (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },

    /// Serialization of the in-memory state failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The blocking write task panicked
    #[error("Write task failed: {0}")]
    Task(String),
}
