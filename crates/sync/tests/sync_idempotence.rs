mod common;

use common::{manifest, Harness};
use keel_core::{ClusterStatus, PostgresRole};
use keel_kubehub::StoreOp;
use keel_sync::Transition;

#[tokio::test]
async fn first_sync_creates_every_resource() {
    let h = Harness::new();
    let mut cluster = h.cluster(manifest());
    cluster.sync(manifest()).await.unwrap();

    assert_eq!(cluster.status, ClusterStatus::Running);
    assert_eq!(h.secrets.len(), 3, "superuser, replication and zalando");
    assert!(h.services.object("acid-test").is_some());
    assert!(h.services.object("acid-test-repl").is_some());
    assert_eq!(h.endpoints.len(), 2);
    assert!(h.statefulsets.object("acid-test").is_some());
    assert!(h.pdbs.object("postgres-acid-test-pdb").is_some());
    assert!(h.cronjobs.is_empty());
    assert!(h.deployments.is_empty());

    assert_eq!(cluster.services.len(), 2);
    assert_eq!(cluster.endpoints.len(), 2);
    assert!(cluster.services.contains_key(&PostgresRole::Replica));
    assert!(cluster.statefulset.is_some());
    assert_eq!(h.pods.state().wait_calls, vec![2]);
    assert_eq!(h.pods.state().recreate_calls, 0);

    let stmts = h.db.statements();
    assert!(stmts.iter().any(|s| s.starts_with("CREATE ROLE \"zalando\" WITH CREATEDB INHERIT LOGIN SUPERUSER PASSWORD 'md5")));
    assert!(stmts.contains(&"CREATE DATABASE \"foo\" OWNER \"zalando\"".to_string()));
    assert_eq!(h.db.state().connects, h.db.state().closes);
    assert_eq!(h.events.of("StatefulSet"), vec![("acid-test".to_string(), Transition::Created)]);
}

#[tokio::test]
async fn second_sync_with_same_manifest_changes_nothing() {
    let h = Harness::new();
    let mut cluster = h.cluster(manifest());
    cluster.sync(manifest()).await.unwrap();
    let executed = h.db.statements().len();
    h.clear_calls();

    cluster.sync(manifest()).await.unwrap();

    assert_eq!(h.mutations(), 0, "calls: {:?}", h.statefulsets.calls());
    assert!(h.events.events.lock().unwrap().is_empty());
    assert_eq!(h.db.statements().len(), executed, "no corrective statements on a converged database");
    assert!(h.statefulsets.count(StoreOp::Get) >= 1);
    assert_eq!(h.pods.state().recreate_calls, 0);
    assert_eq!(cluster.status, ClusterStatus::Running);
}

#[tokio::test]
async fn fresh_cluster_converges_on_resources_left_by_a_previous_process() {
    let h = Harness::new();
    h.cluster(manifest()).sync(manifest()).await.unwrap();
    h.clear_calls();

    // A new process has an empty cache; live passwords are adopted, nothing is rewritten.
    let mut restarted = h.cluster(manifest());
    restarted.sync(manifest()).await.unwrap();
    assert_eq!(h.mutations(), 0);
    assert_eq!(restarted.secrets.len(), 3);
}

#[tokio::test]
async fn logical_backup_job_follows_the_schedule() {
    let h = Harness::new();
    let mut m = manifest();
    m.spec.enable_logical_backup = true;
    let mut cluster = h.cluster(m.clone());
    cluster.sync(m.clone()).await.unwrap();
    let job = h.cronjobs.object("logical-backup-acid-test").unwrap();
    assert_eq!(job.spec.unwrap().schedule, "30 00 * * *");

    m.spec.logical_backup_schedule = Some("0 3 * * *".into());
    h.clear_calls();
    cluster.sync(m).await.unwrap();
    assert_eq!(h.cronjobs.count(StoreOp::Patch), 1);
    assert_eq!(h.cronjobs.object("logical-backup-acid-test").unwrap().spec.unwrap().schedule, "0 3 * * *");
}

#[tokio::test]
async fn annotations_owned_by_others_do_not_cause_patches() {
    let h = Harness::new();
    let mut cluster = h.cluster(manifest());
    cluster.sync(manifest()).await.unwrap();

    let mut live = h.statefulsets.object("acid-test").unwrap();
    live.metadata.annotations.get_or_insert_with(Default::default).insert("example.org/owner".into(), "team-a".into());
    h.statefulsets.seed(live);
    h.clear_calls();

    cluster.sync(manifest()).await.unwrap();
    cluster.sync(manifest()).await.unwrap();

    assert_eq!(h.statefulsets.mutations(), 0, "calls: {:?}", h.statefulsets.calls());
    let annotations = h.statefulsets.object("acid-test").unwrap().metadata.annotations.unwrap();
    assert_eq!(annotations["example.org/owner"], "team-a");
}

#[tokio::test]
async fn stray_selector_on_the_primary_service_is_removed_once() {
    let h = Harness::new();
    let mut cluster = h.cluster(manifest());
    cluster.sync(manifest()).await.unwrap();

    let mut live = h.services.object("acid-test").unwrap();
    live.spec.as_mut().unwrap().selector = Some([("spilo-role".to_string(), "master".to_string())].into_iter().collect());
    h.services.seed(live);
    h.clear_calls();

    cluster.sync(manifest()).await.unwrap();
    assert_eq!(h.services.count(StoreOp::Patch), 1);
    assert!(h.services.object("acid-test").unwrap().spec.unwrap().selector.is_none());

    h.clear_calls();
    cluster.sync(manifest()).await.unwrap();
    assert_eq!(h.mutations(), 0);
}
