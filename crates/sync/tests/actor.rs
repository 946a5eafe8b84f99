mod common;

use common::{manifest, Harness};
use keel_core::ClusterStatus;
use keel_sync::spawn_cluster;

#[tokio::test]
async fn handle_runs_passes_and_publishes_snapshots() {
    let h = Harness::new();
    let (handle, join) = spawn_cluster(h.cluster(manifest()), 4);
    assert_eq!(handle.status(), ClusterStatus::Unknown);

    handle.sync(manifest()).await.unwrap();
    assert_eq!(handle.status(), ClusterStatus::Running);
    let snap = handle.snapshot();
    assert_eq!(snap.name, "acid-test");
    assert_eq!(snap.syncs, 1);
    assert!(snap.last_error.is_none());

    handle.shutdown().await.unwrap();
    let cluster = join.await.unwrap();
    assert_eq!(cluster.status, ClusterStatus::Running);
}

#[tokio::test]
async fn concurrent_requests_are_serialized() {
    let h = Harness::new();
    let (handle, _join) = spawn_cluster(h.cluster(manifest()), 4);
    let mut syncs = handle.subscribe_syncs();

    let (a, b) = tokio::join!(handle.sync(manifest()), handle.sync(manifest()));
    a.unwrap();
    b.unwrap();

    syncs.changed().await.unwrap();
    assert_eq!(*syncs.borrow(), 2);
    assert_eq!(h.statefulsets.count(keel_kubehub::StoreOp::Create), 1, "the second pass saw the first one's work");
}

#[tokio::test]
async fn failed_pass_is_visible_in_the_snapshot() {
    let h = Harness::new();
    h.pods.state().never_ready = true;
    let (handle, _join) = spawn_cluster(h.cluster(manifest()), 1);

    assert!(handle.sync(manifest()).await.is_err());
    let snap = handle.snapshot();
    assert_eq!(snap.status, ClusterStatus::SyncFailed);
    assert!(snap.last_error.as_deref().unwrap().contains("cluster is not ready"));
}

#[tokio::test]
async fn requests_after_shutdown_fail() {
    let h = Harness::new();
    let (handle, join) = spawn_cluster(h.cluster(manifest()), 1);
    handle.shutdown().await.unwrap();
    join.await.unwrap();

    let err = handle.sync(manifest()).await.unwrap_err();
    assert_eq!(err.to_string(), "cluster worker has stopped");
}

#[tokio::test]
async fn shutting_down_a_stopped_worker_is_reported() {
    let h = Harness::new();
    let (handle, join) = spawn_cluster(h.cluster(manifest()), 1);
    handle.shutdown().await.unwrap();
    join.await.unwrap();

    let err = handle.shutdown().await.unwrap_err();
    assert_eq!(err.to_string(), "cluster worker has stopped");
}
