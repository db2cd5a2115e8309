//! Full-pass behavior: transfers, conflicts, idempotence and failures

use egnsync_conflict::fingerprint_bytes;
use egnsync_core::domain::{ChangeClassification, RemoteError};
use egnsync_core::ports::IStateStore;
use egnsync_sync::{FailureKind, PassOptions, PathAction, PathState, SkipReason};

use crate::common::*;

fn state_of<'a>(summary: &'a egnsync_sync::PassSummary, h: &Harness, path: &str) -> &'a PathState {
    &summary.outcome(&h.pair.id, &rel(path)).unwrap().state
}

fn failure_kind(summary: &egnsync_sync::PassSummary, h: &Harness, path: &str) -> FailureKind {
    summary
        .outcome(&h.pair.id, &rel(path))
        .unwrap()
        .failure()
        .unwrap()
        .kind
}

#[tokio::test]
async fn test_new_local_file_is_uploaded() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"hello");

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::LocalOnly));
    assert_eq!(outcome.action, Some(PathAction::Upload));
    assert!(outcome.is_committed());

    let remote = h.remote.file(&remote_file("a.txt")).unwrap();
    assert_eq!(remote.content, b"hello");

    let record = h.record("a.txt").await.unwrap();
    assert_eq!(
        record.last_synced_local_fingerprint,
        Some(fingerprint_bytes(b"hello"))
    );
    assert_eq!(
        record.last_synced_remote_version.unwrap().as_str(),
        remote.version
    );
    // New files are uploaded with an if-absent precondition
    assert_eq!(
        h.remote.upload_preconditions(&remote_file("a.txt")),
        vec![None]
    );
}

#[tokio::test]
async fn test_new_remote_file_is_downloaded_with_remote_mtime() {
    let h = Harness::new().await;
    let version = h
        .remote
        .put_file(&remote_file("sub/b.txt"), b"from remote", at(0));

    let summary = h.pass().await;

    assert!(summary.is_clean());
    assert_eq!(
        summary.outcome(&h.pair.id, &rel("sub/b.txt")).unwrap().action,
        Some(PathAction::Download)
    );
    assert_eq!(h.read_local("sub/b.txt").unwrap(), b"from remote");
    assert_eq!(h.local_mtime("sub/b.txt").timestamp(), at(0).timestamp());

    let record = h.record("sub/b.txt").await.unwrap();
    assert_eq!(record.last_synced_remote_version.unwrap().as_str(), version);
    assert_eq!(
        record.last_synced_local_fingerprint,
        Some(fingerprint_bytes(b"from remote"))
    );
}

#[tokio::test]
async fn test_nested_upload_creates_missing_folders_top_down() {
    let h = Harness::new().await;
    h.write_local("x/y/z.txt", b"deep");

    let summary = h.pass().await;

    assert!(summary.is_clean());
    assert!(h.remote.has_folder(&remote_file("x")));
    assert!(h.remote.has_folder(&remote_file("x/y")));
    assert_eq!(h.remote.file(&remote_file("x/y/z.txt")).unwrap().content, b"deep");
}

#[tokio::test]
async fn test_missing_remote_root_is_empty_and_created_on_upload() {
    let h = Harness::build(FakeRemote::without_root(), Default::default(), |p| p).await;
    h.write_local("a.txt", b"first");

    let summary = h.pass().await;

    assert!(summary.is_clean(), "{summary:?}");
    assert!(h.remote.has_folder(REMOTE_ROOT));
    assert!(h.remote.file(&remote_file("a.txt")).is_some());
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"local");
    h.write_local("dir/b.txt", b"nested local");
    h.remote.put_file(&remote_file("c.txt"), b"remote", at(0));

    let first = h.pass().await;
    assert!(first.is_clean());
    let records_before = (
        h.record("a.txt").await,
        h.record("dir/b.txt").await,
        h.record("c.txt").await,
    );
    let uploads = h.remote.calls("upload");
    let downloads = h.remote.calls("download");

    let second = h.pass().await;

    assert_eq!(second.outcomes.len(), 3);
    for outcome in &second.outcomes {
        assert_eq!(
            outcome.state,
            PathState::Skipped {
                reason: SkipReason::Unchanged
            }
        );
        assert_eq!(outcome.action, None);
    }
    assert_eq!(h.remote.calls("upload"), uploads);
    assert_eq!(h.remote.calls("download"), downloads);
    assert_eq!(h.remote.calls("delete"), 0);
    assert_eq!(h.remote.calls("create_folder"), 1);

    let records_after = (
        h.record("a.txt").await,
        h.record("dir/b.txt").await,
        h.record("c.txt").await,
    );
    assert_eq!(records_before, records_after);
}

#[tokio::test]
async fn test_local_edit_uploads_against_stored_version() {
    let h = Harness::new().await;
    let base = h.synced_file("notes.txt", b"h1").await;
    let base_version = base.last_synced_remote_version.clone().unwrap();

    h.write_local("notes.txt", b"h2 after edit");
    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("notes.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::LocalOnly));
    assert!(outcome.is_committed());
    assert_eq!(
        h.remote
            .upload_preconditions(&remote_file("notes.txt"))
            .last()
            .unwrap()
            .as_deref(),
        Some(base_version.as_str())
    );

    let remote = h.remote.file(&remote_file("notes.txt")).unwrap();
    let record = h.record("notes.txt").await.unwrap();
    assert_eq!(
        record.last_synced_local_fingerprint,
        Some(fingerprint_bytes(b"h2 after edit"))
    );
    assert_eq!(
        record.last_synced_remote_version.unwrap().as_str(),
        remote.version
    );
    assert_ne!(remote.version, base_version.as_str());
}

#[tokio::test]
async fn test_remote_edit_is_downloaded() {
    let h = Harness::new().await;
    h.synced_file("a.txt", b"one").await;
    let version = h.remote.put_file(&remote_file("a.txt"), b"one two", at(0));

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::RemoteOnly));
    assert_eq!(h.read_local("a.txt").unwrap(), b"one two");
    assert_eq!(
        h.record("a.txt")
            .await
            .unwrap()
            .last_synced_remote_version
            .unwrap()
            .as_str(),
        version
    );
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn test_conflict_newer_local_overwrites_remote() {
    let h = Harness::new().await;
    h.synced_file("report.txt", b"original").await;

    let remote_version = h
        .remote
        .put_file(&remote_file("report.txt"), b"remote edit", at(0));
    h.write_local_at("report.txt", b"local edit wins", at(1));

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("report.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::Conflict));
    assert_eq!(outcome.action, Some(PathAction::Upload));
    assert!(outcome.is_committed());

    let remote = h.remote.file(&remote_file("report.txt")).unwrap();
    assert_eq!(remote.content, b"local edit wins");
    // The overwrite is conditional on the version observed in the scan
    assert_eq!(
        h.remote
            .upload_preconditions(&remote_file("report.txt"))
            .last()
            .unwrap()
            .as_deref(),
        Some(remote_version.as_str())
    );

    let record = h.record("report.txt").await.unwrap();
    assert_eq!(
        record.last_synced_local_fingerprint,
        Some(fingerprint_bytes(b"local edit wins"))
    );
    assert_eq!(
        record.last_synced_remote_version.unwrap().as_str(),
        remote.version
    );
}

#[tokio::test]
async fn test_conflict_newer_remote_overwrites_local() {
    let h = Harness::new().await;
    h.synced_file("report.txt", b"original").await;

    h.write_local_at("report.txt", b"local edit", at(0));
    h.remote
        .put_file(&remote_file("report.txt"), b"remote edit wins", at(1));

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("report.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::Conflict));
    assert_eq!(outcome.action, Some(PathAction::Download));
    assert_eq!(h.read_local("report.txt").unwrap(), b"remote edit wins");
}

#[tokio::test]
async fn test_conflict_exact_tie_goes_to_remote() {
    let h = Harness::new().await;
    h.synced_file("report.txt", b"original").await;

    h.write_local_at("report.txt", b"local at same instant", at(5));
    let version = h
        .remote
        .put_file(&remote_file("report.txt"), b"remote at same instant", at(5));

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("report.txt")).unwrap();
    assert_eq!(outcome.action, Some(PathAction::Download));
    assert_eq!(h.read_local("report.txt").unwrap(), b"remote at same instant");
    assert_eq!(
        h.remote.file(&remote_file("report.txt")).unwrap().version,
        version
    );

    // Settled: nothing left to do
    let again = h.pass().await;
    assert_eq!(
        state_of(&again, &h, "report.txt"),
        &PathState::Skipped {
            reason: SkipReason::Unchanged
        }
    );
}

#[tokio::test]
async fn test_identical_content_without_baseline_is_adopted() {
    let h = Harness::new().await;
    h.write_local("same.txt", b"identical");
    let version = h.remote.put_file(&remote_file("same.txt"), b"identical", at(0));

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("same.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::Conflict));
    assert_eq!(outcome.action, Some(PathAction::AdoptBaseline));
    assert!(outcome.is_committed());
    assert_eq!(h.remote.calls("upload"), 0);
    assert_eq!(h.remote.calls("download"), 0);

    let record = h.record("same.txt").await.unwrap();
    assert_eq!(record.last_synced_remote_version.unwrap().as_str(), version);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_upload_leaves_record_untouched() {
    let h = Harness::new().await;
    let base = h.synced_file("a.txt", b"one").await;

    h.write_local("a.txt", b"one two three");
    h.remote.fail_next(
        "upload",
        &remote_file("a.txt"),
        RemoteError::Transient {
            attempts: 5,
            reason: "503 Service Unavailable".to_string(),
        },
    );

    let summary = h.pass().await;

    assert_eq!(failure_kind(&summary, &h, "a.txt"), FailureKind::TransientRemote);
    assert!(!summary.is_clean());
    assert_eq!(h.record("a.txt").await.unwrap(), base);

    // Reclassified identically and committed on the next pass
    let retry = h.pass().await;
    let outcome = retry.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::LocalOnly));
    assert!(outcome.is_committed());
}

#[tokio::test]
async fn test_failed_local_write_leaves_no_record() {
    let h = Harness::new().await;
    h.remote.put_file(&remote_file("x.txt"), b"remote", at(0));
    // An empty directory squats on the target path
    std::fs::create_dir_all(h.local_path("x.txt")).unwrap();

    let summary = h.pass().await;

    assert_eq!(failure_kind(&summary, &h, "x.txt"), FailureKind::Local);
    assert!(h.record("x.txt").await.is_none());
}

#[tokio::test]
async fn test_rate_limit_exhaustion_fails_path() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"quota");
    h.write_local("b.txt", b"fine");
    h.remote.fail_next(
        "upload",
        &remote_file("a.txt"),
        RemoteError::RateLimitExceeded { attempts: 5 },
    );

    let summary = h.pass().await;

    assert_eq!(
        failure_kind(&summary, &h, "a.txt"),
        FailureKind::RateLimitExceeded
    );
    assert!(summary.has_rate_limit_failures());
    assert_eq!(summary.counts_by_failure().get("rate_limit_exceeded"), Some(&1));
    assert!(h.record("a.txt").await.is_none());
    // Other paths proceed
    assert!(summary.outcome(&h.pair.id, &rel("b.txt")).unwrap().is_committed());
}

#[tokio::test]
async fn test_version_mismatch_reclassifies_and_retries() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"content");
    h.remote.fail_next(
        "upload",
        &remote_file("a.txt"),
        RemoteError::VersionMismatch { expected: None },
    );

    let summary = h.pass().await;

    assert!(summary.outcome(&h.pair.id, &rel("a.txt")).unwrap().is_committed());
    assert_eq!(h.remote.calls_on("upload", &remote_file("a.txt")), 2);
    // The second round re-read the remote state
    assert_eq!(h.remote.calls_on("stat", &remote_file("a.txt")), 1);
}

#[tokio::test]
async fn test_version_mismatch_gives_up_after_three_reclassifications() {
    let h = Harness::new().await;
    let base = h.synced_file("a.txt", b"one").await;
    let setup_uploads = h.remote.calls_on("upload", &remote_file("a.txt"));
    h.write_local("a.txt", b"one plus more");
    for _ in 0..4 {
        h.remote.fail_next(
            "upload",
            &remote_file("a.txt"),
            RemoteError::VersionMismatch {
                expected: Some("v1".to_string()),
            },
        );
    }

    let summary = h.pass().await;

    assert_eq!(
        failure_kind(&summary, &h, "a.txt"),
        FailureKind::ConflictVersionMismatch
    );
    // One attempt plus three reclassified retries
    assert_eq!(
        h.remote.calls_on("upload", &remote_file("a.txt")),
        setup_uploads + 4
    );
    assert_eq!(h.record("a.txt").await.unwrap(), base);
}

#[tokio::test]
async fn test_failed_subfolder_listing_is_not_absence() {
    let h = Harness::new().await;
    h.remote
        .put_file(&remote_file("photos/a.jpg"), b"jpeg", at(0));
    let first = h.pass().await;
    assert!(first.is_clean());
    let base = h.record("photos/a.jpg").await.unwrap();

    h.remote.fail_next(
        "list",
        &remote_file("photos"),
        RemoteError::Transient {
            attempts: 5,
            reason: "timeout".to_string(),
        },
    );
    let summary = h.pass().await;

    assert_eq!(
        failure_kind(&summary, &h, "photos/a.jpg"),
        FailureKind::TransientRemote
    );
    assert!(h.read_local("photos/a.jpg").is_some());
    assert_eq!(h.record("photos/a.jpg").await.unwrap(), base);
    assert_eq!(h.remote.calls("upload"), 0);
}

// ============================================================================
// Halting, disabled pairs, dry runs
// ============================================================================

#[tokio::test]
async fn test_auth_failure_halts_pass() {
    let h = Harness::new().await;
    h.synced_file("a.txt", b"one").await;
    h.write_local("b.txt", b"new");
    let uploads = h.remote.calls("upload");
    h.remote.fail_next("list", REMOTE_ROOT, auth_failure());

    let summary = h.pass().await;

    assert!(summary.halted.is_some());
    assert!(!summary.is_clean());
    for path in ["a.txt", "b.txt"] {
        assert_eq!(
            state_of(&summary, &h, path),
            &PathState::Skipped {
                reason: SkipReason::Cancelled
            }
        );
    }
    assert_eq!(h.remote.calls("upload"), uploads);
}

#[tokio::test]
async fn test_auth_failure_mid_pass_skips_remaining_tasks() {
    let mut h = Harness::new().await;
    h.engine = h.engine.clone().with_workers(1);
    h.write_local("a.txt", b"first");
    h.write_local("b.txt", b"second");
    h.remote
        .fail_next("upload", &remote_file("a.txt"), auth_failure());

    let summary = h.pass().await;

    assert!(summary.halted.as_deref().unwrap().contains("invalid_grant"));
    assert_eq!(failure_kind(&summary, &h, "a.txt"), FailureKind::Auth);
    assert_eq!(
        state_of(&summary, &h, "b.txt"),
        &PathState::Skipped {
            reason: SkipReason::Cancelled
        }
    );
    assert_eq!(h.remote.calls_on("upload", &remote_file("b.txt")), 0);
}

#[tokio::test]
async fn test_disabled_pair_makes_no_remote_calls() {
    let h = Harness::build(FakeRemote::new(), Default::default(), |p| p.disabled()).await;
    h.state
        .put(
            &h.pair.id,
            egnsync_core::domain::FileRecord::synced(
                rel("a.txt"),
                fingerprint_bytes(b"x"),
                egnsync_core::domain::RemoteVersion::new("v9".to_string()).unwrap(),
            ),
        )
        .await
        .unwrap();
    h.write_local("a.txt", b"changed");

    let summary = h.pass().await;

    assert_eq!(
        state_of(&summary, &h, "a.txt"),
        &PathState::Skipped {
            reason: SkipReason::PairDisabled
        }
    );
    assert_eq!(h.remote.total_calls(), 0);
}

#[tokio::test]
async fn test_dry_run_reports_plan_without_dispatching() {
    let h = Harness::new().await;
    h.write_local("up.txt", b"local");
    h.remote.put_file(&remote_file("down.txt"), b"remote", at(0));

    let summary = h.pass_with(PassOptions::dry_run()).await;

    let up = summary.outcome(&h.pair.id, &rel("up.txt")).unwrap();
    assert_eq!(up.action, Some(PathAction::Upload));
    assert_eq!(
        up.state,
        PathState::Skipped {
            reason: SkipReason::DryRun
        }
    );
    let down = summary.outcome(&h.pair.id, &rel("down.txt")).unwrap();
    assert_eq!(down.action, Some(PathAction::Download));

    assert_eq!(h.remote.calls("upload"), 0);
    assert_eq!(h.remote.calls("download"), 0);
    assert!(h.read_local("down.txt").is_none());
    assert!(h.record("up.txt").await.is_none());
}

#[tokio::test]
async fn test_state_file_under_root_is_ignored() {
    let mut h = Harness::new().await;
    // Sync the whole temp dir, which also holds the state file
    h.pair.local_root = h.dir.path().to_path_buf();
    h.engine = h
        .engine
        .clone()
        .with_ignored_path(h.state.path().to_path_buf());
    h.write_local("local/a.txt", b"data");

    h.pass().await;
    let second = h.pass().await;

    assert!(second.is_clean());
    assert!(h.remote.file(&remote_file("local/a.txt")).is_some());
    assert!(h
        .remote
        .file(&remote_file("state/sync-state.json"))
        .is_none());
}
