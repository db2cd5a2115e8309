//! JSON-file implementation of the `IStateStore` port
//!
//! The whole state lives in memory behind a `tokio::sync::Mutex`. Mutations
//! apply to the live map at once and mark it dirty; the file is rewritten
//! by atomic replace at most once per flush interval, on [`IStateStore::flush`]
//! and when the store is dropped. A pass of N commits therefore costs a
//! handful of whole-file writes instead of N.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use egnsync_core::atomic::{replace_file, sibling_tmp};
use egnsync_core::domain::{FileRecord, PairId, RelativePath};
use egnsync_core::ports::IStateStore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::StateError;

/// Version of the on-disk layout
pub const STATE_FORMAT: u32 = 1;

/// Longest time a mutation stays in memory only, unless a write fails
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

const TMP_SUFFIX: &str = ".tmp";

type PairRecords = BTreeMap<RelativePath, FileRecord>;
type StateMap = BTreeMap<PairId, PairRecords>;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    format: u32,
    #[serde(default)]
    pairs: StateMap,
}

struct Inner {
    records: StateMap,
    /// Mutations not yet on disk
    dirty: usize,
    last_flush: Instant,
}

/// State store persisted as a single JSON document
pub struct JsonStateStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    flush_interval: Duration,
}

impl JsonStateStore {
    /// Opens the store at `path`, creating parent directories as needed
    ///
    /// A missing file yields an empty store. A temp file left behind by an
    /// interrupted write is removed.
    ///
    /// # Errors
    /// - `StateError::Corrupt` if the file cannot be parsed
    /// - `StateError::UnsupportedFormat` if it was written by another layout
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let owned = path.to_path_buf();
        let records = tokio::task::spawn_blocking(move || load_blocking(&owned))
            .await
            .map_err(|e| StateError::Task(e.to_string()))??;

        let count: usize = records.values().map(BTreeMap::len).sum();
        info!(pairs = records.len(), records = count, "Opened sync state");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                records,
                dirty: 0,
                last_flush: Instant::now(),
            }),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        })
    }

    /// Sets how long mutations may stay in memory; zero writes through
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Location of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of mutations not yet written to disk
    pub async fn pending(&self) -> usize {
        self.inner.lock().await.dirty
    }

    /// Applies `mutate` and writes the file once the flush interval elapsed
    ///
    /// A failed opportunistic write keeps the changes pending; the next
    /// flush retries and reports the error.
    async fn mutate<T>(&self, mutate: impl FnOnce(&mut StateMap) -> T) -> T {
        let mut inner = self.inner.lock().await;
        let out = mutate(&mut inner.records);
        inner.dirty += 1;
        if inner.last_flush.elapsed() >= self.flush_interval {
            if let Err(e) = self.write_locked(&mut inner).await {
                warn!(error = %e, pending = inner.dirty, "Sync state write failed, will retry");
            }
        }
        out
    }

    async fn write_locked(&self, inner: &mut Inner) -> Result<(), StateError> {
        if inner.dirty == 0 {
            return Ok(());
        }
        let bytes = encode(&inner.records)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_blocking(&path, &bytes))
            .await
            .map_err(|e| StateError::Task(e.to_string()))??;

        debug!(mutations = inner.dirty, "Flushed sync state");
        inner.dirty = 0;
        inner.last_flush = Instant::now();
        Ok(())
    }
}

impl Drop for JsonStateStore {
    fn drop(&mut self) {
        let path = &self.path;
        let inner = self.inner.get_mut();
        if inner.dirty == 0 {
            return;
        }
        match encode(&inner.records).and_then(|bytes| write_blocking(path, &bytes)) {
            Ok(()) => debug!(mutations = inner.dirty, "Flushed sync state on close"),
            Err(e) => error!(error = %e, lost = inner.dirty, "Failed to flush sync state on close"),
        }
    }
}

#[derive(Serialize)]
struct StateFileRef<'a> {
    format: u32,
    pairs: &'a StateMap,
}

fn encode(records: &StateMap) -> Result<Vec<u8>, StateError> {
    serde_json::to_vec_pretty(&StateFileRef {
        format: STATE_FORMAT,
        pairs: records,
    })
    .map_err(|e| StateError::SerializationError(e.to_string()))
}

fn write_blocking(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    let tmp = sibling_tmp(path, TMP_SUFFIX);
    replace_file(path, &tmp, bytes, None).map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_blocking(path: &Path) -> Result<StateMap, StateError> {
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = sibling_tmp(path, TMP_SUFFIX);
    match std::fs::remove_file(&tmp) {
        Ok(()) => warn!(tmp = %tmp.display(), "Removed leftover temp file from interrupted write"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No state file yet, starting empty");
            return Ok(StateMap::new());
        }
        Err(e) => return Err(io_err(e)),
    };

    // Check the format before the full parse so an unknown layout is not
    // reported as corruption
    let header: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| StateError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let found = header
        .get("format")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| StateError::Corrupt {
            path: path.to_path_buf(),
            reason: "missing format field".to_string(),
        })?;
    if found != u64::from(STATE_FORMAT) {
        return Err(StateError::UnsupportedFormat {
            found: u32::try_from(found).unwrap_or(u32::MAX),
            expected: STATE_FORMAT,
        });
    }

    let file: StateFile = serde_json::from_value(header).map_err(|e| StateError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(file.pairs)
}

#[async_trait]
impl IStateStore for JsonStateStore {
    async fn get(&self, pair: &PairId, path: &RelativePath) -> Result<Option<FileRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .get(pair)
            .and_then(|records| records.get(path))
            .cloned())
    }

    async fn put(&self, pair: &PairId, record: FileRecord) -> Result<()> {
        let key = record.relative_path.clone();
        self.mutate(|state| {
            state.entry(pair.clone()).or_default().insert(key, record);
        })
        .await;
        Ok(())
    }

    async fn remove(&self, pair: &PairId, path: &RelativePath) -> Result<()> {
        {
            let inner = self.inner.lock().await;
            if !inner
                .records
                .get(pair)
                .is_some_and(|records| records.contains_key(path))
            {
                return Ok(());
            }
        }
        self.mutate(|state| {
            if let Some(records) = state.get_mut(pair) {
                records.remove(path);
                if records.is_empty() {
                    state.remove(pair);
                }
            }
        })
        .await;
        Ok(())
    }

    async fn records(&self, pair: &PairId) -> Result<Vec<FileRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .get(pair)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn pairs(&self) -> Result<Vec<PairId>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.keys().cloned().collect())
    }

    async fn prune_pair(&self, pair: &PairId) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let Some(records) = inner.records.remove(pair) else {
            return Ok(0);
        };
        inner.dirty += 1;
        self.write_locked(&mut inner).await?;
        info!(pair = %pair, removed = records.len(), "Pruned records of removed pair");
        Ok(records.len())
    }

    async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.write_locked(&mut inner).await?;
        Ok(())
    }
}
