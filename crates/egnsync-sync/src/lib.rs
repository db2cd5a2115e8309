//! egnsync Sync - Synchronization engine
//!
//! Provides:
//! - Full-tree and hint-driven sync passes over every configured pair
//! - Per-path exclusivity across a bounded worker pool
//! - Local filesystem adapter with atomic replace-on-write
//! - File watching and debounced change hints
//! - The long-running watch service
//!
//! ## Modules
//!
//! - [`engine`] - Classify, resolve, dispatch and commit per path
//! - [`summary`] - Per-path outcomes and pass-level counters
//! - [`locks`] - `(pair, path)` and remote folder lock maps
//! - [`filesystem`] - `ILocalFileSystem` adapter
//! - [`hints`] - Bounded hint queue and debouncer
//! - [`watcher`] - `notify`-based change hint source
//! - [`service`] - Periodic passes plus settled hints until cancelled

pub mod engine;
pub mod filesystem;
pub mod hints;
pub mod locks;
pub mod service;
pub mod summary;
pub mod watcher;

use thiserror::Error;

pub use engine::{PassOptions, SyncEngine};
pub use filesystem::LocalFileSystem;
pub use hints::{HintDebouncer, HintQueue, HintSender};
pub use locks::{FolderLocks, KeyedLocks, PathLocks};
pub use service::{PassBackoff, SyncService};
pub use summary::{Failure, FailureKind, PassSummary, PathAction, PathOutcome, PathState, SkipReason};
pub use watcher::FileWatcher;

/// Errors that abort a pass or the watch service
///
/// Per-path failures never surface here; they are reported in the
/// [`PassSummary`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// The state store could not be read or flushed
    #[error("State store error: {0}")]
    StateStore(String),

    /// A pass was halted because credentials are unusable
    #[error("Sync halted: {0}")]
    Halted(String),

    /// The file watcher could not be set up
    #[error("File watcher error: {0}")]
    Watcher(String),
}
