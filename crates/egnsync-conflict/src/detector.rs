//! Change detection logic
//!
//! Classifies one path by comparing what each side holds now against the
//! baseline recorded at the last successful sync.

use egnsync_core::domain::{ChangeClassification, FileRecord, LocalState, RelativePath, RemoteState};
use tracing::trace;

/// Three-way comparison of local state, remote state and the last baseline
pub struct ChangeDetector;

impl ChangeDetector {
    /// Classifies a path; `None` means there is nothing to track
    ///
    /// A record that was never synced counts as no baseline at all.
    pub fn classify(
        relative_path: &RelativePath,
        local: &LocalState,
        remote: &RemoteState,
        record: Option<&FileRecord>,
    ) -> Option<ChangeClassification> {
        let baseline = record.filter(|r| !r.is_never_synced());

        let classification = match (local.is_present(), remote.is_present()) {
            (false, false) => {
                // A never-synced record is pruned the same way
                if record.is_none() {
                    return None;
                }
                ChangeClassification::BothDeleted
            }
            (true, false) => {
                if baseline.is_some_and(|r| r.last_synced_remote_version.is_some()) {
                    ChangeClassification::RemoteDeleted
                } else {
                    ChangeClassification::LocalOnly
                }
            }
            (false, true) => {
                if baseline.is_some_and(|r| r.last_synced_local_fingerprint.is_some()) {
                    ChangeClassification::LocalDeleted
                } else {
                    ChangeClassification::RemoteOnly
                }
            }
            (true, true) => {
                match (
                    Self::local_changed(local, record),
                    Self::remote_changed(remote, record),
                ) {
                    (false, false) => ChangeClassification::Unchanged,
                    (true, false) => ChangeClassification::LocalOnly,
                    (false, true) => ChangeClassification::RemoteOnly,
                    (true, true) => ChangeClassification::Conflict,
                }
            }
        };

        trace!(path = %relative_path, classification = %classification, "Classified path");
        Some(classification)
    }

    /// True if the local fingerprint differs from the baseline or there is none
    pub fn local_changed(local: &LocalState, record: Option<&FileRecord>) -> bool {
        let baseline = record.and_then(|r| r.last_synced_local_fingerprint.as_ref());
        match (local.fingerprint(), baseline) {
            (Some(current), Some(synced)) => current != synced,
            (None, None) => false,
            _ => true,
        }
    }

    /// True if the remote version differs from the baseline or there is none
    pub fn remote_changed(remote: &RemoteState, record: Option<&FileRecord>) -> bool {
        let baseline = record.and_then(|r| r.last_synced_remote_version.as_ref());
        match (remote.version(), baseline) {
            (Some(current), Some(synced)) => current != synced,
            (None, None) => false,
            _ => true,
        }
    }

    /// True when both sides hold identical content by digest
    ///
    /// Only usable when the service reported a checksum.
    pub fn contents_match(local: &LocalState, remote: &RemoteState) -> bool {
        match (local.fingerprint(), remote.checksum()) {
            (Some(local), Some(remote)) => local == remote,
            _ => false,
        }
    }
}
