//! Sync state store port (driven/secondary port)
//!
//! Persists one [`FileRecord`] per (pair, relative path).
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - Mutations are visible to readers as soon as they return. Adapters may
//!   defer persisting them until [`IStateStore::flush`]. A record lost to a
//!   crash before the flush is re-derived by the next pass: the two sides
//!   match by checksum and the baseline is adopted again.

use crate::domain::{FileRecord, PairId, RelativePath};

/// Port trait for the persisted sync baseline
#[async_trait::async_trait]
pub trait IStateStore: Send + Sync {
    /// Gets the record of one path
    async fn get(&self, pair: &PairId, path: &RelativePath) -> anyhow::Result<Option<FileRecord>>;

    /// Inserts or replaces the record of `record.relative_path`
    async fn put(&self, pair: &PairId, record: FileRecord) -> anyhow::Result<()>;

    /// Removes the record of one path; removing a missing record is a no-op
    async fn remove(&self, pair: &PairId, path: &RelativePath) -> anyhow::Result<()>;

    /// All records of a pair, ordered by path
    async fn records(&self, pair: &PairId) -> anyhow::Result<Vec<FileRecord>>;

    /// Pairs that have at least one record
    async fn pairs(&self) -> anyhow::Result<Vec<PairId>>;

    /// Drops every record of a pair, returning how many were removed
    async fn prune_pair(&self, pair: &PairId) -> anyhow::Result<usize>;

    /// Persists every mutation made so far
    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
