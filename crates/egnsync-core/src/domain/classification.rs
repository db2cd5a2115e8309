//! Per-path change classification
//!
//! [`LocalState`] and [`RemoteState`] describe what a sync pass observed for
//! one path on each side; [`ChangeClassification`] is the result of comparing
//! them with the last synced baseline.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{Fingerprint, RemoteVersion};

/// Result of the three-way comparison for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClassification {
    Unchanged,
    /// New or modified locally, remote unchanged since last sync
    LocalOnly,
    /// New or modified remotely, local unchanged since last sync
    RemoteOnly,
    /// Both sides changed since last sync
    Conflict,
    /// Synced file removed locally
    LocalDeleted,
    /// Synced file removed remotely
    RemoteDeleted,
    /// Removed on both sides; the record is pruned
    BothDeleted,
}

impl ChangeClassification {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::LocalOnly => "local_only",
            Self::RemoteOnly => "remote_only",
            Self::Conflict => "conflict",
            Self::LocalDeleted => "local_deleted",
            Self::RemoteDeleted => "remote_deleted",
            Self::BothDeleted => "both_deleted",
        }
    }
}

impl Display for ChangeClassification {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of a path on the local side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalState {
    Absent,
    Present {
        fingerprint: Fingerprint,
        modified_at: Option<DateTime<Utc>>,
        size: u64,
    },
}

impl LocalState {
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    #[must_use]
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            Self::Present { fingerprint, .. } => Some(fingerprint),
            Self::Absent => None,
        }
    }

    #[must_use]
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Present { modified_at, .. } => *modified_at,
            Self::Absent => None,
        }
    }
}

/// Observed state of a path on the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Absent,
    Present {
        version: RemoteVersion,
        /// Content checksum as reported by the service, when it sends one
        checksum: Option<Fingerprint>,
        modified_at: Option<DateTime<Utc>>,
        size: u64,
    },
}

impl RemoteState {
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    #[must_use]
    pub fn version(&self) -> Option<&RemoteVersion> {
        match self {
            Self::Present { version, .. } => Some(version),
            Self::Absent => None,
        }
    }

    #[must_use]
    pub fn checksum(&self) -> Option<&Fingerprint> {
        match self {
            Self::Present { checksum, .. } => checksum.as_ref(),
            Self::Absent => None,
        }
    }

    #[must_use]
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Present { modified_at, .. } => *modified_at,
            Self::Absent => None,
        }
    }
}
