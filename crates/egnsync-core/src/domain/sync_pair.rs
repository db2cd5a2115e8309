//! SyncPair: one local root mapped to one remote root

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::newtypes::{PairId, RemotePath};
use super::policy::{ConflictPolicy, LocalDeletedPolicy, RemoteDeletedPolicy};

/// A local directory tree kept consistent with a remote folder
///
/// Built from configuration and never mutated during a sync pass. The
/// optional policies override the global `conflicts` section for this pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPair {
    pub id: PairId,
    pub local_root: PathBuf,
    pub remote_root: RemotePath,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_policy: Option<ConflictPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_deleted: Option<RemoteDeletedPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_deleted: Option<LocalDeletedPolicy>,
}

impl SyncPair {
    /// An enabled pair without policy overrides
    #[must_use]
    pub fn new(id: PairId, local_root: PathBuf, remote_root: RemotePath) -> Self {
        Self {
            id,
            local_root,
            remote_root,
            enabled: true,
            conflict_policy: None,
            remote_deleted: None,
            local_deleted: None,
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_remote_deleted(mut self, policy: RemoteDeletedPolicy) -> Self {
        self.remote_deleted = Some(policy);
        self
    }

    #[must_use]
    pub fn with_local_deleted(mut self, policy: LocalDeletedPolicy) -> Self {
        self.local_deleted = Some(policy);
        self
    }
}
