use std::time::Instant;

use k8s_openapi::api::core::v1::Pod;
use keel_core::{Error, Result};
use keel_kubehub::StoreError;
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;
use tracing::{debug, info};

use crate::{PodInfo, WaitPolicy};

#[async_trait::async_trait]
pub trait PodOps: Send + Sync {
    async fn list_pods(&self, selector: &str) -> Result<Vec<PodInfo>>;
    /// Block until `expected` pods matching `selector` are ready; `Unready` past the deadline.
    async fn wait_pods_ready(&self, selector: &str, expected: usize) -> Result<()>;
    /// Delete and wait for every pod in turn, replicas before the master.
    async fn recreate_pods(&self, selector: &str) -> Result<()>;
}

/// Replicas first, master last, otherwise by name.
pub fn recreation_order(pods: &[PodInfo]) -> Vec<&PodInfo> {
    let mut v: Vec<&PodInfo> = pods.iter().collect();
    v.sort_by(|a, b| a.is_master().cmp(&b.is_master()).then_with(|| a.name.cmp(&b.name)));
    v
}

fn pod_info(p: &Pod) -> PodInfo {
    let ready = p
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|cs| cs.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false);
    PodInfo {
        name: p.metadata.name.clone().unwrap_or_default(),
        uid: p.metadata.uid.clone(),
        ip: p.status.as_ref().and_then(|s| s.pod_ip.clone()),
        role: p.metadata.labels.as_ref().and_then(|l| l.get("spilo-role").cloned()),
        ready,
    }
}

pub struct KubePodOps {
    api: Api<Pod>,
    wait: WaitPolicy,
}

impl KubePodOps {
    pub fn new(client: Client, namespace: &str, wait: WaitPolicy) -> Self { Self { api: Api::namespaced(client, namespace), wait } }

    async fn wait_recreated(&self, name: &str, old_uid: Option<&str>) -> Result<()> {
        let deadline = Instant::now() + self.wait.timeout;
        loop {
            match self.api.get_opt(name).await.map_err(StoreError::from)? {
                Some(p) => {
                    let info = pod_info(&p);
                    if info.ready && info.uid.as_deref() != old_uid {
                        return Ok(());
                    }
                }
                None => debug!(pod = %name, "waiting for pod to reappear"),
            }
            if Instant::now() >= deadline {
                return Err(Error::Unready(format!("pod {} was not recreated within {}s", name, self.wait.timeout.as_secs())));
            }
            tokio::time::sleep(self.wait.poll).await;
        }
    }
}

#[async_trait::async_trait]
impl PodOps for KubePodOps {
    async fn list_pods(&self, selector: &str) -> Result<Vec<PodInfo>> {
        let lp = ListParams::default().labels(selector);
        let pods = self.api.list(&lp).await.map_err(StoreError::from)?;
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn wait_pods_ready(&self, selector: &str, expected: usize) -> Result<()> {
        let deadline = Instant::now() + self.wait.timeout;
        loop {
            let ready = self.list_pods(selector).await?.iter().filter(|p| p.ready).count();
            if ready >= expected {
                info!(selector = %selector, ready, "pods ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Unready(format!("{} of {} pods ready after {}s", ready, expected, self.wait.timeout.as_secs())));
            }
            tokio::time::sleep(self.wait.poll).await;
        }
    }

    async fn recreate_pods(&self, selector: &str) -> Result<()> {
        let pods = self.list_pods(selector).await?;
        for p in recreation_order(&pods) {
            info!(pod = %p.name, master = p.is_master(), "recreating pod");
            self.api.delete(&p.name, &DeleteParams::default()).await.map_err(StoreError::from)?;
            self.wait_recreated(&p.name, p.uid.as_deref()).await?;
        }
        Ok(())
    }
}
