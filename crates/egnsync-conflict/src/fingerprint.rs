//! Content fingerprints
//!
//! A fingerprint is the hex-encoded SHA-512 digest of a file's full
//! content, the same digest the remote service reports as `checksum`.
//! Hashing runs on the blocking pool with streaming reads so large files
//! never sit in memory.
//!
//! [`FingerprintCache`] only skips hashing: a cached digest is reused when
//! size and mtime are both unchanged. Equality decisions are always made on
//! the digest itself.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use egnsync_core::domain::Fingerprint;
use egnsync_core::ports::LocalMetadata;
use sha2::{Digest, Sha512};
use tracing::trace;

use crate::error::ConflictError;

const READ_BUFFER_SIZE: usize = 64 * 1024;

fn to_fingerprint(hasher: Sha512) -> Fingerprint {
    Fingerprint::from_digest_bytes(&hasher.finalize())
}

/// Fingerprint of an in-memory buffer
#[must_use]
pub fn fingerprint_bytes(content: &[u8]) -> Fingerprint {
    let mut hasher = Sha512::new();
    hasher.update(content);
    to_fingerprint(hasher)
}

fn hash_file_blocking(path: &Path) -> Result<Fingerprint, ConflictError> {
    let io_err = |source| ConflictError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_err(e)),
        };
        hasher.update(&buf[..n]);
    }
    Ok(to_fingerprint(hasher))
}

/// Streams a file through SHA-512 on the blocking pool
pub async fn fingerprint_file(path: &Path) -> Result<Fingerprint, ConflictError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_blocking(&owned))
        .await
        .map_err(|e| ConflictError::Task(e.to_string()))?
}

#[derive(Debug, Clone)]
struct CachedFingerprint {
    size: u64,
    modified_at: DateTime<Utc>,
    fingerprint: Fingerprint,
}

/// Fingerprints keyed by absolute path, valid while size and mtime hold
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: DashMap<PathBuf, CachedFingerprint>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached digest if the file still has the given size and mtime
    pub fn get(&self, path: &Path, metadata: &LocalMetadata) -> Option<Fingerprint> {
        let entry = self.entries.get(path)?;
        (entry.size == metadata.size && entry.modified_at == metadata.modified_at)
            .then(|| entry.fingerprint.clone())
    }

    pub fn insert(&self, path: PathBuf, metadata: &LocalMetadata, fingerprint: Fingerprint) {
        self.entries.insert(
            path,
            CachedFingerprint {
                size: metadata.size,
                modified_at: metadata.modified_at,
                fingerprint,
            },
        );
    }

    pub fn remove(&self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the fingerprint of `path`, hashing only when the cache is stale
    pub async fn fingerprint(
        &self,
        path: &Path,
        metadata: &LocalMetadata,
    ) -> Result<Fingerprint, ConflictError> {
        if let Some(fingerprint) = self.get(path, metadata) {
            trace!(path = %path.display(), "Fingerprint cache hit");
            return Ok(fingerprint);
        }
        let fingerprint = fingerprint_file(path).await?;
        self.insert(path.to_path_buf(), metadata, fingerprint.clone());
        Ok(fingerprint)
    }
}
