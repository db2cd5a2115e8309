//! Shared test helpers for sync engine integration tests
//!
//! [`FakeRemote`] is an in-memory [`IRemoteStore`] with call counters,
//! per-path in-flight tracking and injectable failures. [`Harness`] wires
//! it to a [`SyncEngine`] over one pair rooted in a temporary directory.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use egnsync_conflict::{fingerprint_bytes, PolicyEngine};
use egnsync_core::domain::{
    AuthError, FileRecord, PairId, RejectReason, RelativePath, RemoteError, RemotePath,
    RemoteVersion, SyncPair,
};
use egnsync_core::ports::{Downloaded, IRemoteStore, IStateStore, RemoteEntry};
use egnsync_state::JsonStateStore;
use egnsync_sync::{LocalFileSystem, PassOptions, PassSummary, SyncEngine};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const REMOTE_ROOT: &str = "/Shared/docs";

pub fn rel(path: &str) -> RelativePath {
    RelativePath::new(path.to_string()).unwrap()
}

pub fn remote_path(path: &str) -> RemotePath {
    RemotePath::new(path.to_string()).unwrap()
}

/// Remote path of a file under the test pair
pub fn remote_file(rel_path: &str) -> String {
    format!("{REMOTE_ROOT}/{rel_path}")
}

/// Fixed instant, `secs` seconds after a base time
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn not_found(path: &str) -> RemoteError {
    RemoteError::Rejected {
        status: 404,
        reason: RejectReason::NotFound,
        message: format!("{path} not found"),
    }
}

pub fn auth_failure() -> RemoteError {
    RemoteError::Auth(AuthError::RefreshRejected("invalid_grant".to_string()))
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((head, _)) => head.to_string(),
    }
}

fn name_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or_default().to_string()
}

// ============================================================================
// FakeRemote
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakeFile {
    pub content: Vec<u8>,
    pub version: String,
    pub modified_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, FakeFile>,
    folders: BTreeSet<String>,
    failures: HashMap<(&'static str, String), VecDeque<RemoteError>>,
    calls: Vec<(&'static str, String)>,
    uploads: Vec<(String, Option<String>)>,
    in_flight: HashMap<String, usize>,
    total_in_flight: usize,
}

pub struct FakeRemote {
    inner: Mutex<Inner>,
    next_version: AtomicU64,
    max_in_flight_per_path: AtomicUsize,
    max_in_flight_total: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeRemote {
    /// A remote with `/Shared` and the pair root already present
    pub fn new() -> Self {
        let fake = Self {
            inner: Mutex::new(Inner::default()),
            next_version: AtomicU64::new(1),
            max_in_flight_per_path: AtomicUsize::new(0),
            max_in_flight_total: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
        };
        fake.add_folder(REMOTE_ROOT);
        fake
    }

    /// A remote where only `/Shared` exists
    pub fn without_root() -> Self {
        let fake = Self::new();
        fake.inner.lock().unwrap().folders.remove(REMOTE_ROOT);
        fake
    }

    fn next_version(&self) -> String {
        format!("v{}", self.next_version.fetch_add(1, Ordering::SeqCst))
    }

    pub fn add_folder(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        let mut current = path.to_string();
        while current != "/" {
            inner.folders.insert(current.clone());
            current = parent_of(&current);
        }
    }

    /// Creates or replaces a file out of band; returns its new version
    pub fn put_file(&self, path: &str, content: &[u8], modified_at: DateTime<Utc>) -> String {
        self.add_folder(&parent_of(path));
        let version = self.next_version();
        self.inner.lock().unwrap().files.insert(
            path.to_string(),
            FakeFile {
                content: content.to_vec(),
                version: version.clone(),
                modified_at,
            },
        );
        version
    }

    pub fn remove_file(&self, path: &str) {
        self.inner.lock().unwrap().files.remove(path);
    }

    /// Deletes a folder and its content without recording a call
    pub fn remove_folder(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        let prefix = format!("{path}/");
        inner.folders.retain(|p| p != path && !p.starts_with(&prefix));
        inner.files.retain(|p, _| !p.starts_with(&prefix));
    }

    pub fn file(&self, path: &str) -> Option<FakeFile> {
        self.inner.lock().unwrap().files.get(path).cloned()
    }

    pub fn has_folder(&self, path: &str) -> bool {
        self.inner.lock().unwrap().folders.contains(path)
    }

    /// Makes the next `op` call on `path` fail with `err`
    pub fn fail_next(&self, op: &'static str, path: &str, err: RemoteError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .entry((op, path.to_string()))
            .or_default()
            .push_back(err);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of `op` calls so far, on any path
    pub fn calls(&self, op: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .count()
    }

    pub fn calls_on(&self, op: &str, path: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(o, p)| *o == op && p == path)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    /// Expected versions sent with every upload of `path`, in order
    pub fn upload_preconditions(&self, path: &str) -> Vec<Option<String>> {
        self.inner
            .lock()
            .unwrap()
            .uploads
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, expected)| expected.clone())
            .collect()
    }

    pub fn max_in_flight_per_path(&self) -> usize {
        self.max_in_flight_per_path.load(Ordering::SeqCst)
    }

    pub fn max_in_flight_total(&self) -> usize {
        self.max_in_flight_total.load(Ordering::SeqCst)
    }

    fn entry(path: &str, file: &FakeFile) -> RemoteEntry {
        RemoteEntry {
            path: remote_path(path),
            name: name_of(path),
            is_folder: false,
            size: file.content.len() as u64,
            version: Some(RemoteVersion::new(file.version.clone()).unwrap()),
            checksum: Some(fingerprint_bytes(&file.content)),
            modified_at: Some(file.modified_at),
        }
    }

    fn folder_entry(path: &str) -> RemoteEntry {
        RemoteEntry {
            path: remote_path(path),
            name: name_of(path),
            is_folder: true,
            size: 0,
            version: None,
            checksum: None,
            modified_at: None,
        }
    }

    /// Records the call, applies injected failures and the delay, then
    /// runs `f` against the stored tree
    async fn call<T>(
        &self,
        op: &'static str,
        path: &str,
        f: impl FnOnce(&mut Inner, &Self) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let key = path.to_string();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push((op, key.clone()));
            if let Some(err) = inner
                .failures
                .get_mut(&(op, key.clone()))
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
            let count = inner.in_flight.entry(key.clone()).or_insert(0);
            *count += 1;
            let count = *count;
            inner.total_in_flight += 1;
            self.max_in_flight_per_path.fetch_max(count, Ordering::SeqCst);
            self.max_in_flight_total
                .fetch_max(inner.total_in_flight, Ordering::SeqCst);
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        *inner.in_flight.get_mut(&key).unwrap() -= 1;
        inner.total_in_flight -= 1;
        f(&mut *inner, self)
    }
}

#[async_trait::async_trait]
impl IRemoteStore for FakeRemote {
    async fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError> {
        let folder = path.as_str().to_string();
        self.call("list", &folder.clone(), move |inner, _| {
            if !inner.folders.contains(&folder) {
                return Err(not_found(&folder));
            }
            let mut entries: Vec<RemoteEntry> = inner
                .folders
                .iter()
                .filter(|f| parent_of(f) == folder && **f != folder)
                .map(|f| Self::folder_entry(f))
                .collect();
            entries.extend(
                inner
                    .files
                    .iter()
                    .filter(|(p, _)| parent_of(p) == folder)
                    .map(|(p, file)| Self::entry(p, file)),
            );
            Ok(entries)
        })
        .await
    }

    async fn stat(&self, path: &RemotePath) -> Result<Option<RemoteEntry>, RemoteError> {
        let key = path.as_str().to_string();
        self.call("stat", &key.clone(), move |inner, _| {
            if let Some(file) = inner.files.get(&key) {
                return Ok(Some(Self::entry(&key, file)));
            }
            Ok(inner
                .folders
                .contains(&key)
                .then(|| Self::folder_entry(&key)))
        })
        .await
    }

    async fn download(&self, path: &RemotePath) -> Result<Downloaded, RemoteError> {
        let key = path.as_str().to_string();
        self.call("download", &key.clone(), move |inner, _| {
            let file = inner.files.get(&key).ok_or_else(|| not_found(&key))?;
            Ok(Downloaded {
                content: file.content.clone(),
                version: Some(RemoteVersion::new(file.version.clone()).unwrap()),
            })
        })
        .await
    }

    async fn upload(
        &self,
        path: &RemotePath,
        content: Vec<u8>,
        expected_version: Option<&RemoteVersion>,
    ) -> Result<RemoteVersion, RemoteError> {
        let key = path.as_str().to_string();
        let expected = expected_version.map(|v| v.as_str().to_string());
        self.call("upload", &key.clone(), move |inner, fake| {
            inner.uploads.push((key.clone(), expected.clone()));
            if !inner.folders.contains(&parent_of(&key)) {
                return Err(not_found(&key));
            }
            let current = inner.files.get(&key).map(|f| f.version.clone());
            if current != expected {
                return Err(RemoteError::VersionMismatch { expected });
            }
            let version = fake.next_version();
            inner.files.insert(
                key,
                FakeFile {
                    content,
                    version: version.clone(),
                    modified_at: Utc::now(),
                },
            );
            Ok(RemoteVersion::new(version).unwrap())
        })
        .await
    }

    async fn create_folder(&self, path: &RemotePath) -> Result<(), RemoteError> {
        let key = path.as_str().to_string();
        self.call("create_folder", &key.clone(), move |inner, _| {
            if !inner.folders.contains(&parent_of(&key)) && parent_of(&key) != "/" {
                return Err(not_found(&key));
            }
            inner.folders.insert(key);
            Ok(())
        })
        .await
    }

    async fn delete(&self, path: &RemotePath) -> Result<(), RemoteError> {
        let key = path.as_str().to_string();
        self.call("delete", &key.clone(), move |inner, _| {
            if inner.files.remove(&key).is_some() {
                return Ok(());
            }
            if inner.folders.remove(&key) {
                let prefix = format!("{key}/");
                inner.files.retain(|p, _| !p.starts_with(&prefix));
                inner.folders.retain(|p| !p.starts_with(&prefix));
                return Ok(());
            }
            Err(not_found(&key))
        })
        .await
    }

    async fn move_entry(&self, src: &RemotePath, dst: &RemotePath) -> Result<(), RemoteError> {
        let (src, dst) = (src.as_str().to_string(), dst.as_str().to_string());
        self.call("move", &src.clone(), move |inner, _| {
            let file = inner.files.remove(&src).ok_or_else(|| not_found(&src))?;
            inner.files.insert(dst, file);
            Ok(())
        })
        .await
    }

    async fn copy_entry(&self, src: &RemotePath, dst: &RemotePath) -> Result<(), RemoteError> {
        let (src, dst) = (src.as_str().to_string(), dst.as_str().to_string());
        self.call("copy", &src.clone(), move |inner, fake| {
            let mut file = inner.files.get(&src).cloned().ok_or_else(|| not_found(&src))?;
            file.version = fake.next_version();
            inner.files.insert(dst, file);
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// One pair `docs` rooted at `<tmp>/local`, synced to [`REMOTE_ROOT`]
pub struct Harness {
    pub dir: TempDir,
    pub remote: Arc<FakeRemote>,
    pub state: Arc<JsonStateStore>,
    pub engine: SyncEngine,
    pub pair: SyncPair,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(FakeRemote::new(), PolicyEngine::default(), |p| p).await
    }

    pub async fn with_policy(policy: PolicyEngine) -> Self {
        Self::build(FakeRemote::new(), policy, |p| p).await
    }

    pub async fn build(
        remote: FakeRemote,
        policy: PolicyEngine,
        configure_pair: impl FnOnce(SyncPair) -> SyncPair,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let local_root = dir.path().join("local");
        std::fs::create_dir_all(&local_root).unwrap();

        let remote = Arc::new(remote);
        let state = Arc::new(
            JsonStateStore::open(&dir.path().join("state").join("sync-state.json"))
                .await
                .unwrap(),
        );
        let engine = SyncEngine::new(
            remote.clone(),
            state.clone(),
            Arc::new(LocalFileSystem::new()),
            policy,
        );
        let pair = configure_pair(SyncPair::new(
            PairId::new("docs".to_string()).unwrap(),
            local_root,
            remote_path(REMOTE_ROOT),
        ));

        Self {
            dir,
            remote,
            state,
            engine,
            pair,
        }
    }

    pub fn local_path(&self, rel_path: &str) -> PathBuf {
        self.pair.local_root.join(rel_path)
    }

    pub fn write_local(&self, rel_path: &str, content: &[u8]) {
        let path = self.local_path(rel_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn write_local_at(&self, rel_path: &str, content: &[u8], modified_at: DateTime<Utc>) {
        self.write_local(rel_path, content);
        let file = std::fs::File::options()
            .write(true)
            .open(self.local_path(rel_path))
            .unwrap();
        file.set_modified(SystemTime::from(modified_at)).unwrap();
    }

    pub fn read_local(&self, rel_path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.local_path(rel_path)).ok()
    }

    pub fn remove_local(&self, rel_path: &str) {
        std::fs::remove_file(self.local_path(rel_path)).unwrap();
    }

    pub fn local_mtime(&self, rel_path: &str) -> DateTime<Utc> {
        let modified = std::fs::metadata(self.local_path(rel_path))
            .unwrap()
            .modified()
            .unwrap();
        DateTime::<Utc>::from(modified)
    }

    pub async fn record(&self, rel_path: &str) -> Option<FileRecord> {
        self.state.get(&self.pair.id, &rel(rel_path)).await.unwrap()
    }

    pub async fn pass(&self) -> PassSummary {
        self.pass_with(PassOptions::default()).await
    }

    pub async fn pass_with(&self, options: PassOptions) -> PassSummary {
        self.engine
            .run_pass(
                std::slice::from_ref(&self.pair),
                options,
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    /// Creates `rel_path` on both sides through a first pass
    pub async fn synced_file(&self, rel_path: &str, content: &[u8]) -> FileRecord {
        self.write_local(rel_path, content);
        let summary = self.pass().await;
        assert!(summary.is_clean(), "setup pass failed: {summary:?}");
        self.record(rel_path).await.unwrap()
    }
}
