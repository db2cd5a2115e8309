//! Deletion handling on either side and record pruning

use egnsync_conflict::PolicyEngine;
use egnsync_core::domain::{
    ChangeClassification, ConflictPolicy, LocalDeletedPolicy, RemoteDeletedPolicy,
};
use egnsync_sync::PathAction;

use crate::common::*;

async fn harness_with(remote_deleted: RemoteDeletedPolicy, local_deleted: LocalDeletedPolicy) -> Harness {
    Harness::with_policy(
        PolicyEngine::new(ConflictPolicy::Newest, &[])
            .with_deletion_policies(remote_deleted, local_deleted),
    )
    .await
}

#[tokio::test]
async fn test_remote_deletion_reuploads_by_default() {
    let h = Harness::new().await;
    h.synced_file("a.txt", b"keep me").await;
    h.remote.remove_file(&remote_file("a.txt"));

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::RemoteDeleted));
    assert_eq!(outcome.action, Some(PathAction::Upload));
    assert!(outcome.is_committed());
    assert_eq!(h.remote.file(&remote_file("a.txt")).unwrap().content, b"keep me");
    assert_eq!(
        h.remote.upload_preconditions(&remote_file("a.txt")).last(),
        Some(&None)
    );
}

#[tokio::test]
async fn test_remote_deletion_deletes_local_when_configured() {
    let h = harness_with(RemoteDeletedPolicy::DeleteLocal, LocalDeletedPolicy::DeleteRemote).await;
    h.synced_file("a.txt", b"doomed").await;
    h.remote.remove_file(&remote_file("a.txt"));

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.action, Some(PathAction::DeleteLocal));
    assert!(outcome.is_committed());
    assert!(h.read_local("a.txt").is_none());
    assert!(h.record("a.txt").await.is_none());
}

#[tokio::test]
async fn test_remote_deletion_with_local_edit_reuploads() {
    let h = harness_with(RemoteDeletedPolicy::DeleteLocal, LocalDeletedPolicy::DeleteRemote).await;
    h.synced_file("a.txt", b"v1").await;
    h.remote.remove_file(&remote_file("a.txt"));
    h.write_local("a.txt", b"v2 edited locally");

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.action, Some(PathAction::Upload));
    assert_eq!(
        h.remote.file(&remote_file("a.txt")).unwrap().content,
        b"v2 edited locally"
    );
}

#[tokio::test]
async fn test_pair_override_beats_engine_default() {
    let h = Harness::build(FakeRemote::new(), PolicyEngine::default(), |p| {
        p.with_remote_deleted(RemoteDeletedPolicy::DeleteLocal)
    })
    .await;
    h.synced_file("a.txt", b"doomed").await;
    h.remote.remove_file(&remote_file("a.txt"));

    h.pass().await;

    assert!(h.read_local("a.txt").is_none());
}

#[tokio::test]
async fn test_local_deletion_deletes_remote_by_default() {
    let h = Harness::new().await;
    h.synced_file("a.txt", b"bye").await;
    h.remove_local("a.txt");

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::LocalDeleted));
    assert_eq!(outcome.action, Some(PathAction::DeleteRemote));
    assert!(h.remote.file(&remote_file("a.txt")).is_none());
    assert!(h.record("a.txt").await.is_none());
}

#[tokio::test]
async fn test_local_deletion_tolerates_remote_already_gone() {
    let h = Harness::new().await;
    h.synced_file("a.txt", b"bye").await;
    h.remove_local("a.txt");
    h.remote
        .fail_next("delete", &remote_file("a.txt"), not_found("a.txt"));

    let summary = h.pass().await;

    assert!(summary.outcome(&h.pair.id, &rel("a.txt")).unwrap().is_committed());
    assert!(h.record("a.txt").await.is_none());
}

#[tokio::test]
async fn test_local_deletion_restores_when_configured() {
    let h = harness_with(RemoteDeletedPolicy::Reupload, LocalDeletedPolicy::Restore).await;
    h.synced_file("a.txt", b"come back").await;
    h.remove_local("a.txt");

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.action, Some(PathAction::Download));
    assert_eq!(h.read_local("a.txt").unwrap(), b"come back");
    assert!(h.remote.file(&remote_file("a.txt")).is_some());
}

#[tokio::test]
async fn test_local_deletion_with_remote_edit_downloads() {
    let h = Harness::new().await;
    h.synced_file("a.txt", b"v1").await;
    h.remove_local("a.txt");
    h.remote
        .put_file(&remote_file("a.txt"), b"v2 edited remotely", at(0));

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.action, Some(PathAction::Download));
    assert_eq!(h.read_local("a.txt").unwrap(), b"v2 edited remotely");
    assert_eq!(h.remote.calls("delete"), 0);
}

#[tokio::test]
async fn test_deleted_on_both_sides_prunes_record() {
    let h = Harness::new().await;
    h.synced_file("a.txt", b"gone").await;
    h.remove_local("a.txt");
    h.remote.remove_file(&remote_file("a.txt"));

    let summary = h.pass().await;

    let outcome = summary.outcome(&h.pair.id, &rel("a.txt")).unwrap();
    assert_eq!(outcome.classification, Some(ChangeClassification::BothDeleted));
    assert_eq!(outcome.action, Some(PathAction::PruneRecord));
    assert!(h.record("a.txt").await.is_none());

    // Nothing left to track
    let again = h.pass().await;
    assert!(again.outcomes.is_empty());
}
