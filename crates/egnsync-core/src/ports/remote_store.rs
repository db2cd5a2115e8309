//! Remote store port (driven/secondary port)
//!
//! This module defines the interface the sync engine uses to reach the
//! remote file service. The HTTP implementation lives in `egnsync-remote`;
//! engine tests substitute an in-memory fake.
//!
//! ## Design Notes
//!
//! - Every method returns the typed [`RemoteError`] because the engine
//!   interprets failures (version mismatch, not-found, auth) rather than
//!   just reporting them.
//! - Rate limiting, retries and token handling are the implementation's
//!   concern; callers see one call per primitive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Fingerprint, RemoteError, RemoteState, RemotePath, RemoteVersion};

/// A file or folder reported by a listing or stat call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: RemotePath,
    pub name: String,
    pub is_folder: bool,
    pub size: u64,
    /// Version token, always present for files
    pub version: Option<RemoteVersion>,
    pub checksum: Option<Fingerprint>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Converts a file entry into the state the change detector consumes
    ///
    /// Folders and entries without a version map to `Absent`: they carry
    /// nothing a file record could be compared against.
    #[must_use]
    pub fn to_remote_state(&self) -> RemoteState {
        match (&self.version, self.is_folder) {
            (Some(version), false) => RemoteState::Present {
                version: version.clone(),
                checksum: self.checksum.clone(),
                modified_at: self.modified_at,
                size: self.size,
            },
            _ => RemoteState::Absent,
        }
    }
}

/// Result of a download
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub content: Vec<u8>,
    /// Version of the bytes returned, when the service reports it
    pub version: Option<RemoteVersion>,
}

/// Port trait for remote file operations
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Lists the direct children of a folder
    ///
    /// # Errors
    /// `Rejected { reason: NotFound, .. }` if the folder does not exist
    async fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Reads the metadata of one entry, `None` if it does not exist
    async fn stat(&self, path: &RemotePath) -> Result<Option<RemoteEntry>, RemoteError>;

    /// Downloads the full content of a file
    async fn download(&self, path: &RemotePath) -> Result<Downloaded, RemoteError>;

    /// Uploads a file and returns its new version
    ///
    /// When `expected_version` is `Some`, the write only succeeds if the live
    /// version still matches; when `None`, it only succeeds if no file exists.
    ///
    /// # Errors
    /// `VersionMismatch` if the precondition failed
    async fn upload(
        &self,
        path: &RemotePath,
        content: Vec<u8>,
        expected_version: Option<&RemoteVersion>,
    ) -> Result<RemoteVersion, RemoteError>;

    /// Creates a folder; an existing folder is not an error
    async fn create_folder(&self, path: &RemotePath) -> Result<(), RemoteError>;

    /// Deletes a file or folder
    async fn delete(&self, path: &RemotePath) -> Result<(), RemoteError>;

    /// Moves or renames an entry
    async fn move_entry(&self, src: &RemotePath, dst: &RemotePath) -> Result<(), RemoteError>;

    /// Copies an entry
    async fn copy_entry(&self, src: &RemotePath, dst: &RemotePath) -> Result<(), RemoteError>;
}
