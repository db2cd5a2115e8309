//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] on top of `std::fs`, with every blocking
//! call moved to the blocking pool.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content goes to a `<name>.egnsync-part` sibling that
//!   is renamed over the target, so a crash never leaves a half-written
//!   file under the user's name.
//! - **Scans** skip symlinks, special files and leftover part files. An
//!   unreadable directory fails the scan instead of being skipped, since
//!   skipping would make its files look deleted.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use egnsync_core::atomic::{replace_file, sibling_tmp};
use egnsync_core::ports::{ILocalFileSystem, LocalEntry, LocalMetadata};
use tracing::{debug, instrument};

/// Suffix of in-progress download files
pub const PARTIAL_SUFFIX: &str = ".egnsync-part";

/// True for temp files created by [`LocalFileSystem::write_atomic`]
pub fn is_partial_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX))
}

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn to_metadata(meta: &std::fs::Metadata) -> LocalMetadata {
    let modified_at = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));
    LocalMetadata {
        size: meta.len(),
        modified_at,
    }
}

fn scan_blocking(root: &Path) -> Result<Vec<LocalEntry>> {
    let mut entries = Vec::new();
    let mut dirs: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound && dir == root => {
                debug!(root = %root.display(), "Local root does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read directory {}", dir.display()))
            }
        };

        for entry in read_dir {
            let entry =
                entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("Failed to stat {}", path.display()))?;

            if file_type.is_dir() {
                dirs.push(path);
            } else if file_type.is_file() && !is_partial_file(&path) {
                let meta = entry
                    .metadata()
                    .with_context(|| format!("Failed to stat {}", path.display()))?;
                entries.push(LocalEntry {
                    path,
                    metadata: to_metadata(&meta),
                });
            }
        }
    }

    Ok(entries)
}

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .context("Filesystem task panicked")?
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystem {
    #[instrument(skip(self), fields(root = %root.display()))]
    async fn scan(&self, root: &Path) -> Result<Vec<LocalEntry>> {
        let root = root.to_path_buf();
        let entries = blocking(move || scan_blocking(&root)).await?;
        debug!(files = entries.len(), "Local scan complete");
        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> Result<Option<LocalMetadata>> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(to_metadata(&meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    #[instrument(skip(self, content), fields(path = %path.display(), bytes = content.len()))]
    async fn write_atomic(
        &self,
        path: &Path,
        content: &[u8],
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let target = path.to_path_buf();
        let content = content.to_vec();
        let mtime = modified_at.map(SystemTime::from);
        blocking(move || {
            let tmp = sibling_tmp(&target, PARTIAL_SUFFIX);
            replace_file(&target, &tmp, &content, mtime)
                .with_context(|| format!("Failed to write {}", target.display()))
        })
        .await?;

        debug!("Write complete");
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}
