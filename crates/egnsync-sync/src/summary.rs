//! Per-path outcomes and pass summaries
//!
//! Every candidate path of a pass ends in exactly one [`PathState`]. The
//! summary keeps the outcomes sorted by pair and path and derives its
//! counters from them.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use egnsync_core::domain::{ChangeClassification, PairId, RejectReason, RelativePath, RemoteError};
use serde::Serialize;
use uuid::Uuid;

/// Why a path was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Nothing changed on either side
    Unchanged,
    /// The pair is disabled in the configuration
    PairDisabled,
    /// The pass was cancelled or halted before the path was processed
    Cancelled,
    /// Dry run; the planned action was not executed
    DryRun,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::PairDisabled => "pair_disabled",
            Self::Cancelled => "cancelled",
            Self::DryRun => "dry_run",
        }
    }
}

/// Why a path failed; the record is left untouched for the next pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    RateLimitExceeded,
    TransientRemote,
    Remote { status: u16, reason: RejectReason },
    ConflictVersionMismatch,
    /// Local I/O failure, permission problem or unreadable file
    Local,
    StateStore,
}

impl FailureKind {
    /// Slug used as counter key and in human output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::TransientRemote => "transient_remote",
            Self::Remote { .. } => "remote",
            Self::ConflictVersionMismatch => "conflict_version_mismatch",
            Self::Local => "local",
            Self::StateStore => "state_store",
        }
    }
}

impl From<&RemoteError> for FailureKind {
    fn from(err: &RemoteError) -> Self {
        match err {
            RemoteError::Auth(_) => Self::Auth,
            RemoteError::RateLimitExceeded { .. } => Self::RateLimitExceeded,
            RemoteError::Transient { .. } | RemoteError::InvalidResponse(_) => {
                Self::TransientRemote
            }
            RemoteError::Rejected { status, reason, .. } => Self::Remote {
                status: *status,
                reason: *reason,
            },
            RemoteError::VersionMismatch { .. } => Self::ConflictVersionMismatch,
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { status, reason } => write!(f, "remote({status} {reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A failure kind with its message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn local(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Local, message)
    }

    pub fn remote(err: &RemoteError) -> Self {
        Self::new(FailureKind::from(err), err.to_string())
    }
}

/// Terminal state of one path in one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PathState {
    /// The action completed and the record reflects it
    Committed,
    Skipped { reason: SkipReason },
    Failed { failure: Failure },
}

impl PathState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// What the engine did, or planned to do in a dry run, for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathAction {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    /// Both sides already match; only the baseline was recorded
    AdoptBaseline,
    PruneRecord,
}

impl Display for PathAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::DeleteLocal => "delete_local",
            Self::DeleteRemote => "delete_remote",
            Self::AdoptBaseline => "adopt_baseline",
            Self::PruneRecord => "prune_record",
        })
    }
}

/// Result of processing one `(pair, path)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathOutcome {
    pub pair: PairId,
    pub path: RelativePath,
    /// `None` when the path was never classified
    pub classification: Option<ChangeClassification>,
    #[serde(flatten)]
    pub state: PathState,
    pub action: Option<PathAction>,
}

impl PathOutcome {
    pub fn skipped(pair: PairId, path: RelativePath, reason: SkipReason) -> Self {
        Self {
            pair,
            path,
            classification: None,
            state: PathState::Skipped { reason },
            action: None,
        }
    }

    pub fn failed(pair: PairId, path: RelativePath, failure: Failure) -> Self {
        Self {
            pair,
            path,
            classification: None,
            state: PathState::Failed { failure },
            action: None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.state {
            PathState::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == PathState::Committed
    }
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Set when the pass stopped early because credentials are unusable
    pub halted: Option<String>,
    pub outcomes: Vec<PathOutcome>,
}

impl PassSummary {
    pub(crate) fn finish(
        pass_id: Uuid,
        started_at: DateTime<Utc>,
        halted: Option<String>,
        mut outcomes: Vec<PathOutcome>,
    ) -> Self {
        outcomes.sort_by(|a, b| (&a.pair, &a.path).cmp(&(&b.pair, &b.path)));
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            pass_id,
            started_at,
            finished_at,
            duration_ms,
            halted,
            outcomes,
        }
    }

    /// Outcome of one path, if it was a candidate
    pub fn outcome(&self, pair: &PairId, path: &RelativePath) -> Option<&PathOutcome> {
        self.outcomes
            .iter()
            .find(|o| &o.pair == pair && &o.path == path)
    }

    pub fn counts_by_classification(&self) -> BTreeMap<ChangeClassification, usize> {
        let mut counts = BTreeMap::new();
        for classification in self.outcomes.iter().filter_map(|o| o.classification) {
            *counts.entry(classification).or_insert(0) += 1;
        }
        counts
    }

    pub fn counts_by_state(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            *counts.entry(outcome.state.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn counts_by_failure(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for failure in self.outcomes.iter().filter_map(PathOutcome::failure) {
            *counts.entry(failure.kind.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.failure().is_some()).count()
    }

    /// True when any path failed on the service's quota
    pub fn has_rate_limit_failures(&self) -> bool {
        self.outcomes
            .iter()
            .filter_map(PathOutcome::failure)
            .any(|f| f.kind == FailureKind::RateLimitExceeded)
    }

    /// No failures and not halted
    pub fn is_clean(&self) -> bool {
        self.halted.is_none() && self.failed_count() == 0
    }
}
