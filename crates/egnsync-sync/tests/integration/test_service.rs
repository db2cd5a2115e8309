//! Watch service: periodic passes, hint handling and shutdown

use std::future::Future;
use std::time::Duration;

use egnsync_core::ports::ChangeHint;
use egnsync_sync::{HintQueue, SyncError, SyncService};
use tokio_util::sync::CancellationToken;

use crate::common::*;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn finish<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .expect("service did not stop")
}

fn service(h: &Harness, poll_interval: Duration) -> SyncService {
    SyncService::new(
        h.engine.clone(),
        vec![h.pair.clone()],
        poll_interval,
        Duration::from_millis(50),
    )
}

#[tokio::test]
async fn test_service_runs_first_pass_immediately_and_stops_on_cancel() {
    let h = Harness::new().await;
    h.write_local("a.txt", b"hello");
    let (_sender, queue) = HintQueue::channel(16);
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(service(&h, Duration::from_secs(3600)).run(queue, cancel.clone()));
    wait_until(|| h.remote.file(&remote_file("a.txt")).is_some()).await;

    cancel.cancel();
    finish(handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_service_syncs_hinted_paths_between_passes() {
    let h = Harness::new().await;
    let (sender, queue) = HintQueue::channel(16);
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(service(&h, Duration::from_secs(3600)).run(queue, cancel.clone()));
    wait_until(|| h.remote.calls("list") > 0).await;

    h.write_local("b.txt", b"hinted");
    assert!(sender.send(ChangeHint::new(h.pair.id.clone(), rel("b.txt"))).await);
    wait_until(|| h.remote.file(&remote_file("b.txt")).is_some()).await;
    // Only the first full pass listed the tree
    assert_eq!(h.remote.calls("list"), 1);

    cancel.cancel();
    finish(handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_service_repeats_full_passes() {
    let h = Harness::new().await;
    let (_sender, queue) = HintQueue::channel(16);
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(service(&h, Duration::from_millis(100)).run(queue, cancel.clone()));
    wait_until(|| h.remote.calls("list") > 0).await;

    h.remote.put_file(&remote_file("later.txt"), b"arrives later", at(0));
    wait_until(|| h.read_local("later.txt").is_some()).await;

    cancel.cancel();
    finish(handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_service_stops_on_auth_failure() {
    let h = Harness::new().await;
    h.remote.fail_next("list", REMOTE_ROOT, auth_failure());
    let (_sender, queue) = HintQueue::channel(16);

    let result = finish(service(&h, Duration::from_secs(3600)).run(queue, CancellationToken::new())).await;

    assert!(matches!(result, Err(SyncError::Halted(_))));
}
