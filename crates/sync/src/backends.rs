//! Every external collaborator of a cluster, behind the trait seam the engine talks to.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use keel_core::{OperatorConfig, Result};
use keel_db::{DefaultUserSyncStrategy, PgConnector, SqlxConnector, UserSyncStrategy};
use keel_kubehub::{KubeStore, ResourceStore};
use keel_ops::{KubePodOps, KubeVolumes, PatroniClient, PodOps, PvcResizer, RuntimeChannel, VolumeResizer, Volumes, WaitPolicy};
use kube::Client;

use crate::events::{EventSink, TracingEvents};

#[derive(Clone)]
pub struct Backends {
    pub services: Arc<dyn ResourceStore<Service>>,
    pub endpoints: Arc<dyn ResourceStore<Endpoints>>,
    pub statefulsets: Arc<dyn ResourceStore<StatefulSet>>,
    pub pdbs: Arc<dyn ResourceStore<PodDisruptionBudget>>,
    pub secrets: Arc<dyn ResourceStore<Secret>>,
    pub cronjobs: Arc<dyn ResourceStore<CronJob>>,
    pub deployments: Arc<dyn ResourceStore<Deployment>>,
    pub pods: Arc<dyn PodOps>,
    pub runtime: Arc<dyn RuntimeChannel>,
    pub volumes: Arc<dyn Volumes>,
    pub resizers: Vec<Arc<dyn VolumeResizer>>,
    pub db: Arc<dyn PgConnector>,
    pub user_sync: Arc<dyn UserSyncStrategy>,
    pub events: Arc<dyn EventSink>,
    /// Bounds waits inside the engine itself (deletion before a replace).
    pub wait: WaitPolicy,
}

impl Backends {
    /// Production wiring: kube stores, kube pod/volume ops, Patroni over HTTP, sqlx.
    pub fn kube(client: Client, namespace: &str, cfg: &OperatorConfig) -> Result<Self> {
        let wait = WaitPolicy::from_config(cfg);
        Ok(Self {
            services: Arc::new(KubeStore::<Service>::namespaced(client.clone(), namespace, "Service")),
            endpoints: Arc::new(KubeStore::<Endpoints>::namespaced(client.clone(), namespace, "Endpoints")),
            statefulsets: Arc::new(KubeStore::<StatefulSet>::namespaced(client.clone(), namespace, "StatefulSet")),
            pdbs: Arc::new(KubeStore::<PodDisruptionBudget>::namespaced(client.clone(), namespace, "PodDisruptionBudget")),
            secrets: Arc::new(KubeStore::<Secret>::namespaced(client.clone(), namespace, "Secret")),
            cronjobs: Arc::new(KubeStore::<CronJob>::namespaced(client.clone(), namespace, "CronJob")),
            deployments: Arc::new(KubeStore::<Deployment>::namespaced(client.clone(), namespace, "Deployment")),
            pods: Arc::new(KubePodOps::new(client.clone(), namespace, wait)),
            runtime: Arc::new(PatroniClient::new(cfg.patroni_port)?),
            volumes: Arc::new(KubeVolumes::new(client.clone(), namespace)),
            resizers: vec![Arc::new(PvcResizer::new(client, namespace))],
            db: Arc::new(SqlxConnector),
            user_sync: Arc::new(DefaultUserSyncStrategy),
            events: Arc::new(TracingEvents),
            wait,
        })
    }
}
