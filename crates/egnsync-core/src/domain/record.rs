//! FileRecord: the last known synchronized state of one path

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{Fingerprint, RelativePath, RemoteVersion};

/// Baseline for the three-way comparison of one tracked file
///
/// Only ever written after a transfer committed. A record with both
/// fingerprints empty describes a file that was never successfully synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub relative_path: RelativePath,
    pub last_synced_local_fingerprint: Option<Fingerprint>,
    pub last_synced_remote_version: Option<RemoteVersion>,
    pub last_synced_at: DateTime<Utc>,
}

impl FileRecord {
    /// Record for a transfer that just committed
    #[must_use]
    pub fn synced(
        relative_path: RelativePath,
        fingerprint: Fingerprint,
        version: RemoteVersion,
    ) -> Self {
        Self {
            relative_path,
            last_synced_local_fingerprint: Some(fingerprint),
            last_synced_remote_version: Some(version),
            last_synced_at: Utc::now(),
        }
    }

    /// Both halves of the baseline
    #[must_use]
    pub fn baseline(&self) -> (Option<&Fingerprint>, Option<&RemoteVersion>) {
        (
            self.last_synced_local_fingerprint.as_ref(),
            self.last_synced_remote_version.as_ref(),
        )
    }

    #[must_use]
    pub fn is_never_synced(&self) -> bool {
        self.last_synced_local_fingerprint.is_none() && self.last_synced_remote_version.is_none()
    }
}
