//! Sync engine
//!
//! The [`SyncEngine`] keeps every enabled [`SyncPair`] consistent with its
//! remote folder. One pass runs, per candidate path:
//!
//! ```text
//! Scanned → Classified → { Committed | Skipped | Failed }
//! ```
//!
//! 1. **Scan**: walk the local root, list the remote tree recursively, load
//!    the stored records. Candidates are the union of the three.
//! 2. **Classify**: three-way comparison against the record
//!    ([`ChangeDetector`]).
//! 3. **Dispatch**: upload, download or delete according to the
//!    classification and the [`PolicyEngine`].
//! 4. **Commit**: the record is written only after the operation returned
//!    success, so a failed path is reclassified identically next pass.
//!
//! Tasks run on a bounded worker pool. Each holds the path lock of its
//! `(pair, path)` from classification to commit.
//!
//! Remote folders seen in a listing or created by an upload are remembered
//! across passes. Listing or creating a folder happens under a lock keyed by
//! its remote path, so concurrent uploads into a new folder create it once.
//!
//! ## Halting
//!
//! Per-path failures never abort a pass. The only exception is an
//! authentication failure: it cancels the pass, and tasks that have not
//! started yet are reported as `Skipped(Cancelled)`.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use egnsync_conflict::{fingerprint_bytes, ChangeDetector, FingerprintCache, PolicyEngine};
use egnsync_core::domain::{
    ChangeClassification, FileRecord, LocalDeletedPolicy, LocalState, PairId, RelativePath,
    RemoteDeletedPolicy, RemoteError, RemotePath, RemoteState, RemoteVersion, Resolution,
    SyncPair,
};
use egnsync_core::ports::{
    ChangeHint, ILocalFileSystem, IRemoteStore, IStateStore, LocalMetadata, RemoteEntry,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::locks::{FolderLocks, PathLocks};
use crate::summary::{
    Failure, FailureKind, PassSummary, PathAction, PathOutcome, PathState, SkipReason,
};
use crate::SyncError;

/// Worker pool size when none is configured
pub const DEFAULT_WORKERS: usize = 4;

/// Reclassifications allowed after an optimistic-concurrency rejection
const MAX_RECLASSIFY_ROUNDS: u32 = 3;

// ============================================================================
// Options and per-pass context
// ============================================================================

/// Options of a single pass
#[derive(Debug, Clone, Copy, Default)]
pub struct PassOptions {
    /// Classify and resolve, but dispatch nothing
    pub dry_run: bool,
}

impl PassOptions {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

struct PassContext {
    scan_started: DateTime<Utc>,
    options: PassOptions,
    /// Child of the caller's token; also cancelled on authentication failure
    halt: CancellationToken,
    halted: Mutex<Option<String>>,
}

impl PassContext {
    fn new(options: PassOptions, cancel: &CancellationToken) -> Self {
        Self {
            scan_started: Utc::now(),
            options,
            halt: cancel.child_token(),
            halted: Mutex::new(None),
        }
    }

    fn halt(&self, reason: &str) {
        let mut halted = self.halted.lock().unwrap_or_else(PoisonError::into_inner);
        if halted.is_none() {
            error!(reason, "Authentication failed, halting sync pass");
            *halted = Some(reason.to_string());
        }
        self.halt.cancel();
    }

    fn halted_reason(&self) -> Option<String> {
        self.halted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// Local side of a candidate as known before its task runs
#[derive(Debug, Clone)]
enum LocalSnapshot {
    Scanned(Option<LocalMetadata>),
    Unavailable(Failure),
    /// Read the current state when the task runs
    Restat,
}

/// Remote side of a candidate as known before its task runs
#[derive(Debug, Clone)]
enum RemoteSnapshot {
    Scanned(Option<RemoteEntry>),
    /// The folder listing covering this path failed
    Unavailable(Failure),
    Restat,
}

struct Candidate {
    pair: Arc<SyncPair>,
    path: RelativePath,
    local: LocalSnapshot,
    remote: RemoteSnapshot,
}

#[derive(Default)]
struct RemoteTree {
    files: HashMap<RelativePath, RemoteEntry>,
    /// Folders whose listing failed; `None` is the pair root
    failed: Vec<(Option<RelativePath>, Failure)>,
    /// Folders listed successfully
    listed: Vec<RemotePath>,
    /// Listing stopped early because the pass was cancelled
    interrupted: bool,
}

impl RemoteTree {
    fn failure_for(&self, path: &RelativePath) -> Option<&Failure> {
        self.failed
            .iter()
            .find(|(prefix, _)| prefix.as_ref().map_or(true, |p| path.starts_with(p)))
            .map(|(_, failure)| failure)
    }
}

// ============================================================================
// Plans and step errors
// ============================================================================

/// Operation chosen for one classified path
#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    Skip,
    Upload { expected: Option<RemoteVersion> },
    Download,
    DeleteLocal,
    DeleteRemote,
    AdoptBaseline,
    Prune,
}

impl Plan {
    fn action(&self) -> Option<PathAction> {
        match self {
            Self::Skip => None,
            Self::Upload { .. } => Some(PathAction::Upload),
            Self::Download => Some(PathAction::Download),
            Self::DeleteLocal => Some(PathAction::DeleteLocal),
            Self::DeleteRemote => Some(PathAction::DeleteRemote),
            Self::AdoptBaseline => Some(PathAction::AdoptBaseline),
            Self::Prune => Some(PathAction::PruneRecord),
        }
    }
}

enum StepError {
    Remote(RemoteError),
    Local(String),
    State(String),
}

impl From<RemoteError> for StepError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

impl StepError {
    fn into_failure(self) -> Failure {
        match self {
            Self::Remote(err) => Failure::remote(&err),
            Self::Local(message) => Failure::local(message),
            Self::State(message) => Failure::new(FailureKind::StateStore, message),
        }
    }
}

fn local_error(err: anyhow::Error) -> StepError {
    StepError::Local(format!("{err:#}"))
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Bidirectional synchronization engine
///
/// Cheap to clone; clones share the same adapters, fingerprint cache,
/// known remote folders and locks.
#[derive(Clone)]
pub struct SyncEngine {
    remote: Arc<dyn IRemoteStore>,
    state: Arc<dyn IStateStore>,
    local: Arc<dyn ILocalFileSystem>,
    policy: Arc<PolicyEngine>,
    fingerprints: Arc<FingerprintCache>,
    locks: PathLocks,
    folder_locks: FolderLocks,
    /// Remote folders known to exist, kept across passes
    known_folders: Arc<DashSet<RemotePath>>,
    workers: usize,
    /// Local files never synchronized, such as the state file itself
    ignored: Arc<Vec<PathBuf>>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn IRemoteStore>,
        state: Arc<dyn IStateStore>,
        local: Arc<dyn ILocalFileSystem>,
        policy: PolicyEngine,
    ) -> Self {
        Self {
            remote,
            state,
            local,
            policy: Arc::new(policy),
            fingerprints: Arc::new(FingerprintCache::new()),
            locks: PathLocks::new(),
            folder_locks: FolderLocks::new(),
            known_folders: Arc::new(DashSet::new()),
            workers: DEFAULT_WORKERS,
            ignored: Arc::new(Vec::new()),
        }
    }

    /// Sets the number of concurrent path tasks (at least one)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Excludes one absolute local path from synchronization
    pub fn with_ignored_path(mut self, path: PathBuf) -> Self {
        Arc::make_mut(&mut self.ignored).push(path);
        self
    }

    /// Shares a lock map with other engines in the same process
    pub fn with_path_locks(mut self, locks: PathLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn path_locks(&self) -> &PathLocks {
        &self.locks
    }

    pub fn fingerprint_cache(&self) -> &FingerprintCache {
        &self.fingerprints
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Runs a full-tree pass over all given pairs
    ///
    /// # Errors
    /// Returns [`SyncError::StateStore`] if the stored records of a pair
    /// cannot be read or the committed records cannot be flushed. Every
    /// other failure is reported per path.
    #[instrument(skip_all, fields(pairs = pairs.len(), dry_run = options.dry_run))]
    pub async fn run_pass(
        &self,
        pairs: &[SyncPair],
        options: PassOptions,
        cancel: &CancellationToken,
    ) -> Result<PassSummary, SyncError> {
        let pass_id = Uuid::new_v4();
        let ctx = Arc::new(PassContext::new(options, cancel));
        info!(%pass_id, "Starting sync pass");

        let mut outcomes = Vec::new();
        let mut candidates = Vec::new();

        for pair in pairs {
            let records = self
                .state
                .records(&pair.id)
                .await
                .map_err(|e| SyncError::StateStore(format!("{e:#}")))?;

            if !pair.enabled || ctx.halt.is_cancelled() {
                let reason = if pair.enabled {
                    SkipReason::Cancelled
                } else {
                    debug!(pair = %pair.id, "Pair disabled, skipping");
                    SkipReason::PairDisabled
                };
                outcomes.extend(self.skip_pair(pair, records, reason).await);
                continue;
            }

            candidates.extend(self.scan_pair(pair, records, &ctx).await);
        }

        info!(candidates = candidates.len(), "Scan complete");
        outcomes.extend(self.dispatch(candidates, &ctx).await);
        self.state
            .flush()
            .await
            .map_err(|e| SyncError::StateStore(format!("{e:#}")))?;

        let summary = PassSummary::finish(pass_id, ctx.scan_started, ctx.halted_reason(), outcomes);
        log_summary(&summary);
        Ok(summary)
    }

    /// Reclassifies only the hinted paths
    ///
    /// Hints are deduplicated; both sides of every hinted path are re-read
    /// when its task runs. Hints for unknown pairs are ignored.
    #[instrument(skip_all, fields(hints = hints.len(), dry_run = options.dry_run))]
    pub async fn sync_hints(
        &self,
        pairs: &[SyncPair],
        hints: Vec<ChangeHint>,
        options: PassOptions,
        cancel: &CancellationToken,
    ) -> PassSummary {
        let pass_id = Uuid::new_v4();
        let ctx = Arc::new(PassContext::new(options, cancel));

        let by_id: HashMap<&PairId, Arc<SyncPair>> = pairs
            .iter()
            .map(|p| (&p.id, Arc::new(p.clone())))
            .collect();
        let unique: BTreeSet<(PairId, RelativePath)> = hints
            .into_iter()
            .map(|h| (h.pair, h.relative_path))
            .collect();

        let mut outcomes = Vec::new();
        let mut candidates = Vec::new();
        for (pair_id, path) in unique {
            let Some(pair) = by_id.get(&pair_id) else {
                debug!(pair = %pair_id, "Hint for unknown pair ignored");
                continue;
            };
            if !pair.enabled {
                outcomes.push(PathOutcome::skipped(pair_id, path, SkipReason::PairDisabled));
                continue;
            }
            if self.is_ignored(&path.to_local(&pair.local_root)) {
                continue;
            }
            candidates.push(Candidate {
                pair: Arc::clone(pair),
                path,
                local: LocalSnapshot::Restat,
                remote: RemoteSnapshot::Restat,
            });
        }

        outcomes.extend(self.dispatch(candidates, &ctx).await);
        if let Err(e) = self.state.flush().await {
            error!(error = %format!("{e:#}"), "Failed to flush sync state");
        }
        let summary = PassSummary::finish(pass_id, ctx.scan_started, ctx.halted_reason(), outcomes);
        log_summary(&summary);
        summary
    }

    fn is_ignored(&self, local_path: &std::path::Path) -> bool {
        self.ignored.iter().any(|p| p == local_path)
    }

    /// Reports every stored or local path of a pair that is not synced
    ///
    /// Makes no remote call. Paths that exist only remotely are not known
    /// without a listing and are left out.
    async fn skip_pair(
        &self,
        pair: &SyncPair,
        records: Vec<FileRecord>,
        reason: SkipReason,
    ) -> Vec<PathOutcome> {
        let mut paths: BTreeSet<RelativePath> =
            records.into_iter().map(|r| r.relative_path).collect();
        match self.local.scan(&pair.local_root).await {
            Ok(entries) => paths.extend(
                entries
                    .into_iter()
                    .filter(|e| !self.is_ignored(&e.path))
                    .filter_map(|e| RelativePath::from_local(&pair.local_root, &e.path).ok()),
            ),
            Err(e) => debug!(pair = %pair.id, error = %format!("{e:#}"), "Local scan of skipped pair failed"),
        }
        paths
            .into_iter()
            .map(|path| PathOutcome::skipped(pair.id.clone(), path, reason))
            .collect()
    }

    // ========================================================================
    // Scan
    // ========================================================================

    #[instrument(skip_all, fields(pair = %pair.id))]
    async fn scan_pair(
        &self,
        pair: &SyncPair,
        records: Vec<FileRecord>,
        ctx: &PassContext,
    ) -> Vec<Candidate> {
        let pair_arc = Arc::new(pair.clone());

        let (mut local_files, local_failure) = match self.local.scan(&pair.local_root).await {
            Ok(entries) => {
                let mut files = HashMap::new();
                for entry in entries {
                    if self.is_ignored(&entry.path) {
                        continue;
                    }
                    match RelativePath::from_local(&pair.local_root, &entry.path) {
                        Ok(rel) => {
                            files.insert(rel, entry.metadata);
                        }
                        Err(e) => warn!(path = %entry.path.display(), error = %e, "Skipping unsyncable local path"),
                    }
                }
                (files, None)
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Local scan failed");
                (HashMap::new(), Some(Failure::local(format!("{e:#}"))))
            }
        };

        let mut tree = self.list_remote_tree(pair, ctx).await;

        let mut paths: BTreeSet<RelativePath> = records.into_iter().map(|r| r.relative_path).collect();
        paths.extend(local_files.keys().cloned());
        paths.extend(tree.files.keys().cloned());

        debug!(
            local = local_files.len(),
            remote = tree.files.len(),
            candidates = paths.len(),
            "Pair scanned"
        );

        paths
            .into_iter()
            .map(|path| {
                let local = match &local_failure {
                    Some(failure) => LocalSnapshot::Unavailable(failure.clone()),
                    None => LocalSnapshot::Scanned(local_files.remove(&path)),
                };
                let remote = match tree.failure_for(&path) {
                    Some(failure) => RemoteSnapshot::Unavailable(failure.clone()),
                    None => RemoteSnapshot::Scanned(tree.files.remove(&path)),
                };
                Candidate {
                    pair: Arc::clone(&pair_arc),
                    path,
                    local,
                    remote,
                }
            })
            .collect()
    }

    /// Lists every file under the pair's remote root
    ///
    /// A missing root is an empty tree. A failed listing marks its whole
    /// subtree as unavailable instead of absent.
    async fn list_remote_tree(&self, pair: &SyncPair, ctx: &PassContext) -> RemoteTree {
        let mut tree = RemoteTree::default();
        let mut pending = vec![pair.remote_root.clone()];

        while let Some(folder) = pending.pop() {
            // Dispatch reports every candidate as cancelled once the token fires
            if ctx.halt.is_cancelled() {
                tree.interrupted = true;
                break;
            }

            let prefix = folder.relative_to(&pair.remote_root);
            let listing = {
                let _guard = self.folder_locks.lock_key(folder.clone()).await;
                self.remote.list(&folder).await
            };
            match listing {
                Ok(entries) => {
                    tree.listed.push(folder.clone());
                    for entry in entries {
                        if entry.is_folder {
                            pending.push(entry.path);
                        } else if let Some(rel) = entry.path.relative_to(&pair.remote_root) {
                            tree.files.insert(rel, entry);
                        }
                    }
                }
                Err(e) if e.is_not_found() && folder == pair.remote_root => {
                    debug!(root = %folder, "Remote root does not exist yet");
                }
                Err(e) => {
                    warn!(folder = %folder, error = %e, "Remote listing failed");
                    if e.is_auth() {
                        ctx.halt(&e.to_string());
                    }
                    tree.failed.push((prefix, Failure::remote(&e)));
                }
            }
        }

        self.remember_folders(&pair.remote_root, &tree);
        tree
    }

    /// Updates the known folders under a pair root from a listing
    ///
    /// A complete listing replaces what was known under the root, so
    /// folders deleted remotely are created again by the next upload.
    fn remember_folders(&self, remote_root: &RemotePath, tree: &RemoteTree) {
        if !tree.interrupted && tree.failed.is_empty() {
            self.known_folders
                .retain(|folder| folder != remote_root && folder.relative_to(remote_root).is_none());
        }
        for folder in &tree.listed {
            self.known_folders.insert(folder.clone());
        }
    }

    // ========================================================================
    // Worker pool
    // ========================================================================

    async fn dispatch(&self, candidates: Vec<Candidate>, ctx: &Arc<PassContext>) -> Vec<PathOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut outcomes = Vec::new();

        for candidate in candidates {
            let permit = if ctx.halt.is_cancelled() {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = ctx.halt.cancelled() => None,
                    permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
                }
            };
            let Some(permit) = permit else {
                outcomes.push(PathOutcome::skipped(
                    candidate.pair.id.clone(),
                    candidate.path,
                    SkipReason::Cancelled,
                ));
                continue;
            };

            let engine = self.clone();
            let ctx = Arc::clone(ctx);
            tasks.spawn(async move {
                let _permit = permit;
                engine.process_candidate(candidate, &ctx).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Path task panicked"),
            }
        }

        outcomes
    }

    // ========================================================================
    // Per-path task
    // ========================================================================

    #[instrument(skip_all, fields(pair = %candidate.pair.id, path = %candidate.path))]
    async fn process_candidate(&self, candidate: Candidate, ctx: &PassContext) -> Option<PathOutcome> {
        let pair_id = candidate.pair.id.clone();
        let path = candidate.path.clone();
        let _guard = self.locks.lock(&pair_id, &path).await;

        if ctx.halt.is_cancelled() {
            return Some(PathOutcome::skipped(pair_id, path, SkipReason::Cancelled));
        }

        let outcome = self.process_locked(candidate, ctx).await?;
        match &outcome.state {
            PathState::Failed { failure } => {
                if failure.kind == FailureKind::Auth {
                    ctx.halt(&failure.message);
                }
                warn!(kind = %failure.kind, error = %failure.message, "Path failed");
            }
            PathState::Committed => {
                info!(action = ?outcome.action, "Path committed");
            }
            PathState::Skipped { .. } => {}
        }
        Some(outcome)
    }

    async fn process_locked(&self, candidate: Candidate, ctx: &PassContext) -> Option<PathOutcome> {
        let Candidate {
            pair,
            path,
            mut local,
            mut remote,
        } = candidate;
        let failed = |failure: Failure| Some(PathOutcome::failed(pair.id.clone(), path.clone(), failure));

        let record = match self.state.get(&pair.id, &path).await {
            Ok(record) => record,
            Err(e) => {
                return failed(Failure::new(FailureKind::StateStore, format!("{e:#}")));
            }
        };

        // Another task committed this path after the scan; the snapshot is stale
        if record
            .as_ref()
            .is_some_and(|r| r.last_synced_at >= ctx.scan_started)
        {
            debug!("Record committed during this pass, re-reading current state");
            local = LocalSnapshot::Restat;
            remote = RemoteSnapshot::Restat;
        }

        let remote_path = match path.to_remote(&pair.remote_root) {
            Ok(p) => p,
            Err(e) => return failed(Failure::local(e.to_string())),
        };

        let mut round = 0;
        loop {
            let local_state = match self.observe_local(&pair, &path, &local).await {
                Ok(state) => state,
                Err(failure) => return failed(failure),
            };
            let remote_state = match self.observe_remote(&remote_path, &remote).await {
                Ok(state) => state,
                Err(failure) => return failed(failure),
            };

            let classification =
                ChangeDetector::classify(&path, &local_state, &remote_state, record.as_ref())?;
            let plan = self.plan(
                &pair,
                &path,
                classification,
                &local_state,
                &remote_state,
                record.as_ref(),
            );

            let mut outcome = PathOutcome {
                pair: pair.id.clone(),
                path: path.clone(),
                classification: Some(classification),
                state: PathState::Committed,
                action: plan.action(),
            };

            if plan == Plan::Skip {
                outcome.state = PathState::Skipped {
                    reason: SkipReason::Unchanged,
                };
                return Some(outcome);
            }
            if ctx.options.dry_run {
                outcome.state = PathState::Skipped {
                    reason: SkipReason::DryRun,
                };
                return Some(outcome);
            }

            match self
                .execute(&pair, &path, &remote_path, plan, &local_state, &remote_state, record.as_ref())
                .await
            {
                Ok(()) => return Some(outcome),
                Err(StepError::Remote(RemoteError::VersionMismatch { .. }))
                    if round < MAX_RECLASSIFY_ROUNDS =>
                {
                    round += 1;
                    info!(round, "Remote version moved, reclassifying");
                    local = LocalSnapshot::Restat;
                    remote = RemoteSnapshot::Restat;
                }
                Err(e) => {
                    outcome.state = PathState::Failed {
                        failure: e.into_failure(),
                    };
                    return Some(outcome);
                }
            }
        }
    }

    async fn observe_local(
        &self,
        pair: &SyncPair,
        path: &RelativePath,
        snapshot: &LocalSnapshot,
    ) -> Result<LocalState, Failure> {
        let local_path = path.to_local(&pair.local_root);
        let metadata = match snapshot {
            LocalSnapshot::Scanned(metadata) => metadata.clone(),
            LocalSnapshot::Unavailable(failure) => return Err(failure.clone()),
            LocalSnapshot::Restat => self
                .local
                .stat(&local_path)
                .await
                .map_err(|e| Failure::local(format!("{e:#}")))?,
        };

        let Some(metadata) = metadata else {
            self.fingerprints.remove(&local_path);
            return Ok(LocalState::Absent);
        };

        let fingerprint = self
            .fingerprints
            .fingerprint(&local_path, &metadata)
            .await
            .map_err(|e| Failure::local(e.to_string()))?;

        Ok(LocalState::Present {
            fingerprint,
            modified_at: Some(metadata.modified_at),
            size: metadata.size,
        })
    }

    async fn observe_remote(
        &self,
        remote_path: &RemotePath,
        snapshot: &RemoteSnapshot,
    ) -> Result<RemoteState, Failure> {
        let entry = match snapshot {
            RemoteSnapshot::Scanned(entry) => entry.clone(),
            RemoteSnapshot::Unavailable(failure) => return Err(failure.clone()),
            RemoteSnapshot::Restat => self
                .remote
                .stat(remote_path)
                .await
                .map_err(|e| Failure::remote(&e))?,
        };
        Ok(entry.map_or(RemoteState::Absent, |e| e.to_remote_state()))
    }

    // ========================================================================
    // Planning
    // ========================================================================

    fn plan(
        &self,
        pair: &SyncPair,
        path: &RelativePath,
        classification: ChangeClassification,
        local: &LocalState,
        remote: &RemoteState,
        record: Option<&FileRecord>,
    ) -> Plan {
        match classification {
            ChangeClassification::Unchanged => Plan::Skip,
            ChangeClassification::LocalOnly => Plan::Upload {
                expected: record.and_then(|r| r.last_synced_remote_version.clone()),
            },
            ChangeClassification::RemoteOnly => Plan::Download,
            ChangeClassification::Conflict => {
                match self.policy.resolve_conflict(pair, path, local, remote, record) {
                    Resolution::KeepLocal => Plan::Upload {
                        expected: remote.version().cloned(),
                    },
                    Resolution::KeepRemote => Plan::Download,
                    Resolution::AlreadyInSync => Plan::AdoptBaseline,
                }
            }
            ChangeClassification::RemoteDeleted => {
                if ChangeDetector::local_changed(local, record) {
                    return Plan::Upload { expected: None };
                }
                match self.policy.remote_deleted_for(pair) {
                    RemoteDeletedPolicy::Reupload => Plan::Upload { expected: None },
                    RemoteDeletedPolicy::DeleteLocal => Plan::DeleteLocal,
                }
            }
            ChangeClassification::LocalDeleted => {
                if ChangeDetector::remote_changed(remote, record) {
                    return Plan::Download;
                }
                match self.policy.local_deleted_for(pair) {
                    LocalDeletedPolicy::DeleteRemote => Plan::DeleteRemote,
                    LocalDeletedPolicy::Restore => Plan::Download,
                }
            }
            ChangeClassification::BothDeleted => Plan::Prune,
        }
    }

    // ========================================================================
    // Execution and commit
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        pair: &SyncPair,
        path: &RelativePath,
        remote_path: &RemotePath,
        plan: Plan,
        local: &LocalState,
        remote: &RemoteState,
        record: Option<&FileRecord>,
    ) -> Result<(), StepError> {
        let local_path = path.to_local(&pair.local_root);

        match plan {
            Plan::Skip => Ok(()),
            Plan::Upload { expected } => {
                let content = self.local.read(&local_path).await.map_err(local_error)?;
                // Record what was actually sent, even if the file changed since hashing
                let mut fingerprint = fingerprint_bytes(&content);
                self.ensure_remote_parents(remote_path, &pair.remote_root)
                    .await?;
                debug!(expected = ?expected, bytes = content.len(), "Uploading");
                let version = match self
                    .remote
                    .upload(remote_path, content, expected.as_ref())
                    .await
                {
                    Err(e) if e.is_not_found() => {
                        debug!("Remote parent folder missing, creating it again");
                        self.forget_folders(remote_path, &pair.remote_root);
                        self.ensure_remote_parents(remote_path, &pair.remote_root)
                            .await?;
                        let content = self.local.read(&local_path).await.map_err(local_error)?;
                        fingerprint = fingerprint_bytes(&content);
                        self.remote
                            .upload(remote_path, content, expected.as_ref())
                            .await?
                    }
                    result => result?,
                };
                self.commit(&pair.id, FileRecord::synced(path.clone(), fingerprint, version))
                    .await
            }
            Plan::Download => {
                let downloaded = self.remote.download(remote_path).await?;
                let version = remote
                    .version()
                    .cloned()
                    .or(downloaded.version)
                    .ok_or_else(|| {
                        RemoteError::InvalidResponse("download carried no version".to_string())
                    })?;
                let fingerprint = fingerprint_bytes(&downloaded.content);
                self.local
                    .write_atomic(&local_path, &downloaded.content, remote.modified_at())
                    .await
                    .map_err(local_error)?;
                if let Ok(Some(metadata)) = self.local.stat(&local_path).await {
                    self.fingerprints
                        .insert(local_path, &metadata, fingerprint.clone());
                }
                self.commit(&pair.id, FileRecord::synced(path.clone(), fingerprint, version))
                    .await
            }
            Plan::DeleteLocal => {
                self.local.remove(&local_path).await.map_err(local_error)?;
                self.fingerprints.remove(&local_path);
                self.forget(&pair.id, path).await
            }
            Plan::DeleteRemote => {
                match self.remote.delete(remote_path).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => debug!("Remote copy already gone"),
                    Err(e) => return Err(e.into()),
                }
                self.forget(&pair.id, path).await
            }
            Plan::AdoptBaseline => {
                let (Some(fingerprint), Some(version)) = (local.fingerprint(), remote.version())
                else {
                    return Err(StepError::Local(
                        "cannot adopt a baseline without both sides present".to_string(),
                    ));
                };
                self.commit(
                    &pair.id,
                    FileRecord::synced(path.clone(), fingerprint.clone(), version.clone()),
                )
                .await
            }
            Plan::Prune => {
                if record.is_some() {
                    self.forget(&pair.id, path).await
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Creates missing remote folders between the pair root and the file
    ///
    /// Each folder is created under its folder lock and only if no other
    /// task created it while this one waited.
    async fn ensure_remote_parents(
        &self,
        remote_path: &RemotePath,
        remote_root: &RemotePath,
    ) -> Result<(), StepError> {
        let mut missing = Vec::new();
        let mut current = remote_path.parent();
        while let Some(folder) = current {
            if folder.is_root() || self.known_folders.contains(&folder) {
                break;
            }
            let at_root = &folder == remote_root;
            current = folder.parent();
            missing.push(folder);
            if at_root {
                break;
            }
        }

        for folder in missing.into_iter().rev() {
            let _guard = self.folder_locks.lock_key(folder.clone()).await;
            if self.known_folders.contains(&folder) {
                continue;
            }
            debug!(folder = %folder, "Creating remote folder");
            self.remote.create_folder(&folder).await?;
            self.known_folders.insert(folder);
        }
        Ok(())
    }

    /// Drops the parents of a file from the known folders, up to the pair root
    fn forget_folders(&self, remote_path: &RemotePath, remote_root: &RemotePath) {
        let mut current = remote_path.parent();
        while let Some(folder) = current {
            let at_root = &folder == remote_root || folder.is_root();
            current = folder.parent();
            self.known_folders.remove(&folder);
            if at_root {
                break;
            }
        }
    }

    async fn commit(&self, pair: &PairId, record: FileRecord) -> Result<(), StepError> {
        self.state
            .put(pair, record)
            .await
            .map_err(|e| StepError::State(format!("{e:#}")))
    }

    async fn forget(&self, pair: &PairId, path: &RelativePath) -> Result<(), StepError> {
        self.state
            .remove(pair, path)
            .await
            .map_err(|e| StepError::State(format!("{e:#}")))
    }
}

fn log_summary(summary: &PassSummary) {
    let states = summary.counts_by_state();
    info!(
        pass_id = %summary.pass_id,
        committed = states.get("committed").copied().unwrap_or(0),
        skipped = states.get("skipped").copied().unwrap_or(0),
        failed = states.get("failed").copied().unwrap_or(0),
        halted = summary.halted.is_some(),
        duration_ms = summary.duration_ms,
        "Sync pass complete"
    );
}
