//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface the sync engine uses to enumerate and
//! modify files under a pair's local root.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - Content fingerprints are computed by the change detector, not here.
//! - `write_atomic` must never leave a partially written file visible at
//!   the target path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Metadata of a regular file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMetadata {
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// A regular file found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Absolute path
    pub path: PathBuf,
    pub metadata: LocalMetadata,
}

/// Port trait for local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Recursively lists regular files under `root`
    ///
    /// Directories are implicit; symlinks and special files are skipped.
    /// A missing root yields an empty list.
    async fn scan(&self, root: &Path) -> anyhow::Result<Vec<LocalEntry>>;

    /// Metadata of a regular file, `None` if it does not exist or is not a file
    async fn stat(&self, path: &Path) -> anyhow::Result<Option<LocalMetadata>>;

    /// Reads the entire contents of a file
    async fn read(&self, path: &Path) -> anyhow::Result<Vec<u8>>;

    /// Replaces a file atomically, creating parent directories as needed
    ///
    /// When `modified_at` is set the file's mtime is set to it after the write.
    async fn write_atomic(
        &self,
        path: &Path,
        content: &[u8],
        modified_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;

    /// Removes a file; a missing file is not an error
    async fn remove(&self, path: &Path) -> anyhow::Result<()>;
}
