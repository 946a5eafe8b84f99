#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use keel_core::{ClusterManifest, ClusterSpec, Error, OperatorConfig, Result, ROLLING_UPDATE_ANNOTATION};
use keel_db::{ConnectTarget, DbRole, DefaultUserSyncStrategy, PgConnector, PgSession};
use keel_kubehub::MemStore;
use keel_ops::{PodInfo, PodOps, RuntimeChannel, VolumeResizer, Volumes, WaitPolicy};
use keel_sync::{Backends, Cluster, EventSink, Transition};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap() }

pub fn manifest() -> ClusterManifest {
    let yaml = r#"
name: acid-test
namespace: default
spec:
  teamId: acid
  numberOfInstances: 2
  postgresql:
    version: "16"
  volume:
    size: 1Gi
  users:
    zalando: [superuser, createdb]
  databases:
    foo: zalando
"#;
    serde_yaml::from_str(yaml).unwrap()
}

pub fn config() -> OperatorConfig { OperatorConfig { pod_ready_timeout_secs: 1, ..Default::default() } }

pub fn pod(name: &str, role: &str) -> PodInfo {
    PodInfo { name: name.into(), uid: Some(format!("uid-{}", name)), ip: Some(format!("10.0.0.{}", name.len())), role: Some(role.into()), ready: true }
}

// ---- pods ----

#[derive(Default)]
pub struct PodsState {
    pub pods: Vec<PodInfo>,
    pub list_calls: usize,
    pub wait_calls: Vec<usize>,
    pub recreate_calls: usize,
    /// Rolling-update annotation on the live statefulset at the moment pods were recreated.
    pub annotation_at_recreate: Vec<Option<String>>,
    pub never_ready: bool,
}

pub struct FakePods {
    pub state: Mutex<PodsState>,
    statefulsets: Arc<MemStore<StatefulSet>>,
}

impl FakePods {
    pub fn state(&self) -> MutexGuard<'_, PodsState> { lock(&self.state) }
    pub fn set_pods(&self, pods: Vec<PodInfo>) { self.state().pods = pods; }
}

#[async_trait::async_trait]
impl PodOps for FakePods {
    async fn list_pods(&self, _selector: &str) -> Result<Vec<PodInfo>> {
        let mut s = self.state();
        s.list_calls += 1;
        Ok(s.pods.clone())
    }

    async fn wait_pods_ready(&self, _selector: &str, expected: usize) -> Result<()> {
        let mut s = self.state();
        s.wait_calls.push(expected);
        if s.never_ready {
            return Err(Error::Unready(format!("{} pods not ready", expected)));
        }
        Ok(())
    }

    async fn recreate_pods(&self, _selector: &str) -> Result<()> {
        let annotation = self
            .statefulsets
            .object("acid-test")
            .and_then(|s| s.metadata.annotations)
            .and_then(|a| a.get(ROLLING_UPDATE_ANNOTATION).cloned());
        let mut s = self.state();
        s.recreate_calls += 1;
        s.annotation_at_recreate.push(annotation);
        Ok(())
    }
}

// ---- patroni ----

#[derive(Default)]
pub struct FakePatroni {
    pub calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    pub failing_pods: Mutex<BTreeSet<String>>,
}

impl FakePatroni {
    pub fn calls(&self) -> Vec<(String, BTreeMap<String, String>)> { lock(&self.calls).clone() }
    pub fn fail_on(&self, pod: &str) { lock(&self.failing_pods).insert(pod.to_string()); }
}

#[async_trait::async_trait]
impl RuntimeChannel for FakePatroni {
    async fn set_postgres_parameters(&self, pod: &PodInfo, params: &BTreeMap<String, String>) -> Result<()> {
        lock(&self.calls).push((pod.name.clone(), params.clone()));
        if lock(&self.failing_pods).contains(&pod.name) {
            return Err(Error::Transport(format!("patroni on {} refused", pod.name)));
        }
        Ok(())
    }
}

// ---- volumes ----

#[derive(Default)]
pub struct FakeVolumes {
    pub needs_resize: Mutex<bool>,
    pub resized: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl Volumes for FakeVolumes {
    async fn needs_resize(&self, _selector: &str, _size: &str) -> Result<bool> { Ok(*lock(&self.needs_resize)) }

    async fn resize(&self, _selector: &str, size: &str, _resizers: &[Arc<dyn VolumeResizer>]) -> Result<()> {
        lock(&self.resized).push(size.to_string());
        *lock(&self.needs_resize) = false;
        Ok(())
    }
}

// ---- database ----

#[derive(Default)]
pub struct DbState {
    pub roles: BTreeMap<String, DbRole>,
    pub databases: BTreeMap<String, String>,
    /// (database, statement)
    pub executed: Vec<(String, String)>,
    pub connects: usize,
    pub closes: usize,
    pub fail_close: bool,
    /// Statements containing this text fail.
    pub fail_statement: Option<String>,
}

#[derive(Default, Clone)]
pub struct FakeDb {
    pub state: Arc<Mutex<DbState>>,
}

impl FakeDb {
    pub fn state(&self) -> MutexGuard<'_, DbState> { lock(&self.state) }
    pub fn statements(&self) -> Vec<String> { self.state().executed.iter().map(|(_, s)| s.clone()).collect() }
}

#[async_trait::async_trait]
impl PgConnector for FakeDb {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn PgSession>> {
        self.state().connects += 1;
        Ok(Box::new(FakeSession { database: target.database.clone(), state: Arc::clone(&self.state) }))
    }
}

pub struct FakeSession {
    database: String,
    state: Arc<Mutex<DbState>>,
}

fn unquote(s: &str) -> String { s.trim_matches(|c| c == '"' || c == '\'' || c == ',').to_string() }

/// Just enough of CREATE ROLE / CREATE DATABASE / ALTER DATABASE to keep state between passes.
fn apply(state: &mut DbState, stmt: &str) {
    let tokens: Vec<&str> = stmt.split_whitespace().collect();
    match tokens.as_slice() {
        ["CREATE", "ROLE", name, rest @ ..] => {
            let mut role = DbRole { name: unquote(name), ..Default::default() };
            let mut i = 0;
            while i < rest.len() {
                match rest[i] {
                    "WITH" => {}
                    "PASSWORD" => {
                        i += 1;
                        role.password = unquote(rest[i]);
                    }
                    "IN" => {
                        role.member_of = rest[i + 2..].iter().map(|g| unquote(g)).collect();
                        break;
                    }
                    flag => role.flags.push(flag.to_string()),
                }
                i += 1;
            }
            role.flags.sort();
            state.roles.insert(role.name.clone(), role);
        }
        ["CREATE", "DATABASE", db, "OWNER", owner] => {
            state.databases.insert(unquote(db), unquote(owner));
        }
        ["ALTER", "DATABASE", db, "OWNER", "TO", owner] => {
            state.databases.insert(unquote(db), unquote(owner));
        }
        _ => {}
    }
}

#[async_trait::async_trait]
impl PgSession for FakeSession {
    async fn list_roles(&mut self, names: &[String]) -> Result<BTreeMap<String, DbRole>> {
        let s = lock(&self.state);
        Ok(s.roles.iter().filter(|(k, _)| names.contains(k)).map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn list_databases(&mut self) -> Result<BTreeMap<String, String>> { Ok(lock(&self.state).databases.clone()) }

    async fn execute(&mut self, statement: &str) -> Result<()> {
        let mut s = lock(&self.state);
        s.executed.push((self.database.clone(), statement.to_string()));
        if s.fail_statement.as_deref().is_some_and(|f| statement.contains(f)) {
            return Err(Error::Transport(format!("statement failed: {}", statement)));
        }
        apply(&mut s, statement);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut s = lock(&self.state);
        s.closes += 1;
        if s.fail_close {
            return Err(Error::Transport("connection reset".into()));
        }
        Ok(())
    }
}

// ---- events ----

#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<(String, String, Transition, String)>>,
}

impl RecordingEvents {
    pub fn of(&self, kind: &str) -> Vec<(String, Transition)> {
        lock(&self.events).iter().filter(|e| e.0 == kind).map(|e| (e.1.clone(), e.2)).collect()
    }
    pub fn clear(&self) { lock(&self.events).clear(); }
}

impl EventSink for RecordingEvents {
    fn record(&self, kind: &str, name: &str, transition: Transition, reason: &str) {
        lock(&self.events).push((kind.to_string(), name.to_string(), transition, reason.to_string()));
    }
}

// ---- harness ----

pub struct Harness {
    pub services: Arc<MemStore<Service>>,
    pub endpoints: Arc<MemStore<Endpoints>>,
    pub statefulsets: Arc<MemStore<StatefulSet>>,
    pub pdbs: Arc<MemStore<PodDisruptionBudget>>,
    pub secrets: Arc<MemStore<Secret>>,
    pub cronjobs: Arc<MemStore<CronJob>>,
    pub deployments: Arc<MemStore<Deployment>>,
    pub pods: Arc<FakePods>,
    pub patroni: Arc<FakePatroni>,
    pub volumes: Arc<FakeVolumes>,
    pub db: FakeDb,
    pub events: Arc<RecordingEvents>,
}

impl Harness {
    pub fn new() -> Self {
        let statefulsets = Arc::new(MemStore::new());
        Self {
            services: Arc::new(MemStore::new()),
            endpoints: Arc::new(MemStore::new()),
            pods: Arc::new(FakePods { state: Mutex::new(PodsState::default()), statefulsets: Arc::clone(&statefulsets) }),
            statefulsets,
            pdbs: Arc::new(MemStore::new()),
            secrets: Arc::new(MemStore::new()),
            cronjobs: Arc::new(MemStore::new()),
            deployments: Arc::new(MemStore::new()),
            patroni: Arc::new(FakePatroni::default()),
            volumes: Arc::new(FakeVolumes::default()),
            db: FakeDb::default(),
            events: Arc::new(RecordingEvents::default()),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            services: self.services.clone(),
            endpoints: self.endpoints.clone(),
            statefulsets: self.statefulsets.clone(),
            pdbs: self.pdbs.clone(),
            secrets: self.secrets.clone(),
            cronjobs: self.cronjobs.clone(),
            deployments: self.deployments.clone(),
            pods: self.pods.clone(),
            runtime: self.patroni.clone(),
            volumes: self.volumes.clone(),
            resizers: Vec::new(),
            db: Arc::new(self.db.clone()),
            user_sync: Arc::new(DefaultUserSyncStrategy),
            events: self.events.clone(),
            wait: WaitPolicy { timeout: Duration::from_millis(200), poll: Duration::from_millis(10) },
        }
    }

    pub fn cluster(&self, manifest: ClusterManifest) -> Cluster { Cluster::new(manifest, config(), self.backends()) }

    pub fn cluster_with(&self, manifest: ClusterManifest, config: OperatorConfig) -> Cluster {
        Cluster::new(manifest, config, self.backends())
    }

    pub fn mutations(&self) -> usize {
        self.services.mutations()
            + self.endpoints.mutations()
            + self.statefulsets.mutations()
            + self.pdbs.mutations()
            + self.secrets.mutations()
            + self.cronjobs.mutations()
            + self.deployments.mutations()
    }

    pub fn clear_calls(&self) {
        self.services.clear_calls();
        self.endpoints.clear_calls();
        self.statefulsets.clear_calls();
        self.pdbs.clear_calls();
        self.secrets.clear_calls();
        self.cronjobs.clear_calls();
        self.deployments.clear_calls();
        self.events.clear();
    }
}

/// Same spec with a connection pool section.
pub fn with_pool(mut m: ClusterManifest) -> ClusterManifest {
    m.spec.connection_pool = Some(Default::default());
    m
}

pub fn spec_of(m: &ClusterManifest) -> ClusterSpec { m.spec.clone() }
