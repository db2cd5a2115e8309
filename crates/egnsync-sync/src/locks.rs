//! Keyed async lock maps
//!
//! At most one task at a time may classify, dispatch and commit a given
//! `(pair, relative_path)` ([`PathLocks`]), or list or create a given remote
//! folder ([`FolderLocks`]). Entries are created on demand and removed when
//! the last holder or waiter lets go.

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use egnsync_core::domain::{PairId, RelativePath, RemotePath};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

type LockMap<K> = DashMap<K, Arc<Mutex<()>>>;

/// Process-wide map of async locks, cheap to clone
pub struct KeyedLocks<K: Eq + Hash> {
    locks: Arc<LockMap<K>>,
}

/// Locks on `(pair, relative_path)`
pub type PathLocks = KeyedLocks<(PairId, RelativePath)>;

/// Locks on remote folder paths
pub type FolderLocks = KeyedLocks<RemotePath>;

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }
}

impl<K: Eq + Hash> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<K: Eq + Hash> Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("held", &self.locks.len())
            .finish()
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`
    pub async fn lock_key(&self, key: K) -> KeyGuard<K> {
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key: Some(key),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl PathLocks {
    /// Waits for exclusive access to one path
    pub async fn lock(&self, pair: &PairId, path: &RelativePath) -> PathGuard {
        let guard = self.lock_key((pair.clone(), path.clone())).await;
        trace!(pair = %pair, path = %path, "Acquired path lock");
        guard
    }
}

/// Holds a keyed lock until dropped
pub struct KeyGuard<K: Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    key: Option<K>,
    locks: Arc<LockMap<K>>,
}

pub type PathGuard = KeyGuard<(PairId, RelativePath)>;

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Some(key) = self.key.take() {
            // Only the map still references an idle entry
            self.locks
                .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}
