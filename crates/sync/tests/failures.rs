mod common;

use common::{manifest, Harness};
use keel_core::{ClusterStatus, Error, PostgresRole};
use keel_kubehub::{StoreError, StoreOp};
use keel_sync::Transition;

#[tokio::test]
async fn transport_error_aborts_the_remaining_steps() {
    let h = Harness::new();
    h.secrets.fail_next(StoreOp::Get, StoreError::Other("connection refused".into()));
    let mut cluster = h.cluster(manifest());
    let err = cluster.sync(manifest()).await.unwrap_err();

    assert!(matches!(err.root(), Error::Transport(_)));
    assert_eq!(err.to_string(), "could not sync secrets: could not get secret \"postgres.acid-test.credentials\": connection refused");
    assert_eq!(cluster.status, ClusterStatus::SyncFailed);
    assert!(h.services.calls().is_empty(), "services are never reached");
    assert!(h.statefulsets.calls().is_empty());

    cluster.sync(manifest()).await.unwrap();
    assert_eq!(cluster.status, ClusterStatus::Running, "the next pass retries everything");
}

#[tokio::test]
async fn service_errors_name_the_role() {
    let h = Harness::new();
    h.endpoints.fail_next(StoreOp::Get, StoreError::Other("timeout".into()));
    let err = h.cluster(manifest()).sync(manifest()).await.unwrap_err();
    assert!(err.to_string().starts_with("could not sync services: could not sync primary endpoint"), "{}", err);
}

#[tokio::test]
async fn load_balancer_switch_patches_the_service() {
    let h = Harness::new();
    let mut cluster = h.cluster(manifest());
    cluster.sync(manifest()).await.unwrap();
    h.clear_calls();

    let mut m = manifest();
    m.spec.enable_master_load_balancer = true;
    m.spec.allowed_source_ranges = vec!["10.0.0.0/8".into()];
    cluster.sync(m).await.unwrap();

    assert_eq!(h.services.count(StoreOp::Patch), 1);
    assert_eq!(h.services.count(StoreOp::Delete), 0);
    let spec = h.services.object("acid-test").unwrap().spec.unwrap();
    assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
    assert_eq!(spec.load_balancer_source_ranges, Some(vec!["10.0.0.0/8".to_string()]));
    assert_eq!(h.events.of("Service"), vec![("acid-test".to_string(), Transition::Updated)]);
}

#[tokio::test]
async fn disruption_budget_mismatch_is_replaced() {
    let h = Harness::new();
    let mut cluster = h.cluster(manifest());
    cluster.sync(manifest()).await.unwrap();
    h.clear_calls();

    let mut m = manifest();
    m.spec.number_of_instances = 0;
    cluster.sync(m).await.unwrap();

    let ops: Vec<StoreOp> = h.pdbs.calls().into_iter().map(|(op, _)| op).filter(|op| op.is_mutation()).collect();
    assert_eq!(ops, vec![StoreOp::Delete, StoreOp::Create]);
    assert_eq!(h.events.of("PodDisruptionBudget"), vec![("postgres-acid-test-pdb".to_string(), Transition::Replaced)]);
}

#[tokio::test]
async fn undersized_volumes_are_resized() {
    let h = Harness::new();
    *h.volumes.needs_resize.lock().unwrap() = true;
    h.cluster(manifest()).sync(manifest()).await.unwrap();
    assert_eq!(*h.volumes.resized.lock().unwrap(), vec!["1Gi".to_string()]);
}

#[tokio::test]
async fn low_limits_are_raised_before_the_statefulset_is_built() {
    let h = Harness::new();
    let mut m = manifest();
    m.spec.resources.limits.cpu = "10m".into();
    let mut cluster = h.cluster(m.clone());
    cluster.sync(m).await.unwrap();

    let sts = h.statefulsets.object("acid-test").unwrap();
    let resources = sts.spec.unwrap().template.spec.unwrap().containers[0].resources.clone().unwrap();
    assert_eq!(resources.limits.unwrap()["cpu"].0, "250m");
}

#[tokio::test]
async fn failed_recreate_leaves_service_and_endpoint_known_absent() {
    let h = Harness::new();
    let mut cluster = h.cluster(manifest());
    cluster.sync(manifest()).await.unwrap();
    assert!(cluster.services.contains_key(&PostgresRole::Primary));

    h.endpoints.evict("acid-test");
    h.endpoints.fail_next(StoreOp::Create, StoreError::Other("quota exceeded".into()));
    assert!(cluster.sync(manifest()).await.is_err());
    assert!(!cluster.endpoints.contains_key(&PostgresRole::Primary));

    cluster.sync(manifest()).await.unwrap();
    h.services.evict("acid-test-repl");
    h.services.fail_next(StoreOp::Create, StoreError::Other("quota exceeded".into()));
    let err = cluster.sync(manifest()).await.unwrap_err();
    assert!(err.to_string().starts_with("could not sync services: could not sync replica service"), "{}", err);
    assert!(!cluster.services.contains_key(&PostgresRole::Replica));
    assert!(cluster.services.contains_key(&PostgresRole::Primary));
}
