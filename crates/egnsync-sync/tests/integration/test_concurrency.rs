//! Worker pool bounds, path exclusivity and cancellation

use std::time::Duration;

use egnsync_core::ports::ChangeHint;
use egnsync_sync::{PassOptions, PathState, SkipReason};
use tokio_util::sync::CancellationToken;

use crate::common::*;

const FILES: usize = 12;

fn file_name(i: usize) -> String {
    format!("f{i:02}.txt")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_pass_and_hints_never_overlap_on_a_path() {
    let mut h = Harness::new().await;
    h.engine = h.engine.clone().with_workers(8);
    for i in 0..FILES {
        h.write_local(&file_name(i), format!("content {i}").as_bytes());
    }
    h.remote.set_delay(Duration::from_millis(20));

    let pairs = vec![h.pair.clone()];
    let hints: Vec<ChangeHint> = (0..FILES)
        .map(|i| ChangeHint::new(h.pair.id.clone(), rel(&file_name(i))))
        .collect();
    let cancel = CancellationToken::new();

    let (pass, hinted) = tokio::join!(
        h.engine.run_pass(&pairs, PassOptions::default(), &cancel),
        h.engine
            .sync_hints(&pairs, hints, PassOptions::default(), &cancel),
    );

    let pass = pass.unwrap();
    assert_eq!(pass.failed_count(), 0, "{pass:?}");
    assert_eq!(hinted.failed_count(), 0, "{hinted:?}");
    assert_eq!(h.remote.max_in_flight_per_path(), 1);

    // Whichever side won the lock uploaded; the other saw it as settled
    for i in 0..FILES {
        assert_eq!(h.remote.calls_on("upload", &remote_file(&file_name(i))), 1);
    }
    assert!(h.engine.path_locks().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_bounds_concurrent_operations() {
    let mut h = Harness::new().await;
    h.engine = h.engine.clone().with_workers(2);
    for i in 0..6 {
        h.write_local(&file_name(i), b"payload");
    }
    h.remote.set_delay(Duration::from_millis(20));

    let summary = h.pass().await;

    assert!(summary.is_clean());
    assert!(h.remote.max_in_flight_total() <= 2);
}

#[tokio::test]
async fn test_cancelled_pass_dispatches_nothing() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"never sent");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = h
        .engine
        .run_pass(
            std::slice::from_ref(&h.pair),
            PassOptions::default(),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(
        summary.outcome(&h.pair.id, &rel("a.txt")).unwrap().state,
        PathState::Skipped {
            reason: SkipReason::Cancelled
        }
    );
    assert!(summary.halted.is_none());
    assert_eq!(h.remote.calls("upload"), 0);
}

#[tokio::test]
async fn test_hints_are_deduplicated_and_unknown_pairs_ignored() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"once");
    let other = egnsync_core::domain::PairId::new("other".to_string()).unwrap();
    let hints = vec![
        ChangeHint::new(h.pair.id.clone(), rel("a.txt")),
        ChangeHint::new(h.pair.id.clone(), rel("a.txt")),
        ChangeHint::new(other, rel("a.txt")),
        // Absent on both sides and never synced
        ChangeHint::new(h.pair.id.clone(), rel("ghost.txt")),
    ];

    let summary = h
        .engine
        .sync_hints(
            std::slice::from_ref(&h.pair),
            hints,
            PassOptions::default(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(summary.outcomes.len(), 1);
    assert!(summary.outcomes[0].is_committed());
    assert_eq!(h.remote.calls("upload"), 1);
    assert_eq!(h.remote.calls("list"), 0);
}

fn hints_for(h: &Harness, names: &[String]) -> Vec<ChangeHint> {
    names
        .iter()
        .map(|name| ChangeHint::new(h.pair.id.clone(), rel(name)))
        .collect()
}

async fn hint_pass(h: &Harness, names: &[String]) -> egnsync_sync::PassSummary {
    h.engine
        .sync_hints(
            std::slice::from_ref(&h.pair),
            hints_for(h, names),
            PassOptions::default(),
            &CancellationToken::new(),
        )
        .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hinted_uploads_create_each_folder_once() {
    let mut h = Harness::new().await;
    h.engine = h.engine.clone().with_workers(8);
    let names: Vec<String> = (0..FILES).map(file_name).collect();
    for name in &names {
        h.write_local(name, b"hinted");
    }
    h.remote.set_delay(Duration::from_millis(20));

    let summary = hint_pass(&h, &names).await;

    assert!(summary.is_clean(), "{summary:?}");
    assert!(h.remote.calls_on("create_folder", REMOTE_ROOT) <= 1);
    assert_eq!(h.remote.max_in_flight_per_path(), 1);

    // The folder is remembered across passes
    let created = h.remote.calls("create_folder");
    h.write_local("late.txt", b"after");
    let summary = hint_pass(&h, &["late.txt".to_string()]).await;
    assert!(summary.is_clean());
    assert_eq!(h.remote.calls("create_folder"), created);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hinted_uploads_into_new_subfolder_create_it_once() {
    let mut h = Harness::new().await;
    h.engine = h.engine.clone().with_workers(8);
    let names: Vec<String> = (0..FILES).map(|i| format!("sub/{}", file_name(i))).collect();
    for name in &names {
        h.write_local(name, b"nested");
    }
    h.remote.set_delay(Duration::from_millis(20));

    let summary = hint_pass(&h, &names).await;

    assert!(summary.is_clean(), "{summary:?}");
    let sub = format!("{REMOTE_ROOT}/sub");
    assert_eq!(h.remote.calls_on("create_folder", &sub), 1);
    assert!(h.remote.calls_on("create_folder", REMOTE_ROOT) <= 1);
    assert!(h.remote.has_folder(&sub));
    assert_eq!(h.remote.max_in_flight_per_path(), 1);
}

#[tokio::test]
async fn test_folder_deleted_remotely_is_created_again() {
    let h = Harness::new().await;
    h.write_local("sub/a.txt", b"first");
    assert!(h.pass().await.is_clean());
    let sub = format!("{REMOTE_ROOT}/sub");
    assert_eq!(h.remote.calls_on("create_folder", &sub), 1);

    h.remote.remove_folder(&sub);
    h.write_local("sub/b.txt", b"second");
    let summary = hint_pass(&h, &["sub/b.txt".to_string()]).await;

    assert!(summary.is_clean(), "{summary:?}");
    assert_eq!(h.remote.calls_on("create_folder", &sub), 2);
    assert!(h.remote.file(&remote_file("sub/b.txt")).is_some());
}

#[tokio::test]
async fn test_disabled_pair_reports_new_local_files() {
    let h = Harness::build(FakeRemote::new(), Default::default(), |p| p.disabled()).await;
    h.write_local("new.txt", b"unsynced");

    let summary = h.pass().await;

    assert_eq!(
        summary.outcome(&h.pair.id, &rel("new.txt")).unwrap().state,
        PathState::Skipped {
            reason: SkipReason::PairDisabled
        }
    );
    assert_eq!(h.remote.total_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_during_listing_is_not_a_failure() {
    let h = Harness::new().await;
    h.remote.add_folder(&format!("{REMOTE_ROOT}/one"));
    h.remote
        .put_file(&remote_file("one/inner.txt"), b"deep", at(0));
    h.remote.put_file(&remote_file("top.txt"), b"top", at(0));
    h.write_local("local.txt", b"local");
    h.remote.set_delay(Duration::from_millis(50));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let summary = h
        .engine
        .run_pass(
            std::slice::from_ref(&h.pair),
            PassOptions::default(),
            &cancel,
        )
        .await
        .unwrap();

    assert!(summary.halted.is_none());
    assert_eq!(summary.failed_count(), 0, "{summary:?}");
    for path in ["top.txt", "local.txt"] {
        assert_eq!(
            summary.outcome(&h.pair.id, &rel(path)).unwrap().state,
            PathState::Skipped {
                reason: SkipReason::Cancelled
            }
        );
    }
    assert_eq!(h.remote.calls("list"), 1);
    assert_eq!(h.remote.calls("upload"), 0);
}
