//! Persistent volume sizing. Volumes only ever grow; a smaller declared size is logged and ignored.

use std::sync::Arc;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use keel_core::quantity::parse_memory_bytes;
use keel_core::Result;
use keel_kubehub::StoreError;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use tracing::{info, warn};

#[async_trait::async_trait]
pub trait VolumeResizer: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, pvc: &PersistentVolumeClaim) -> bool;
    async fn resize(&self, pvc: &PersistentVolumeClaim, size: &str) -> Result<()>;
}

#[async_trait::async_trait]
pub trait Volumes: Send + Sync {
    async fn needs_resize(&self, selector: &str, size: &str) -> Result<bool>;
    async fn resize(&self, selector: &str, size: &str, resizers: &[Arc<dyn VolumeResizer>]) -> Result<()>;
}

pub fn requested_bytes(pvc: &PersistentVolumeClaim) -> Option<i64> {
    let q = pvc.spec.as_ref()?.resources.as_ref()?.requests.as_ref()?.get("storage")?;
    parse_memory_bytes(&q.0).ok()
}

/// Claims smaller than `size`. An empty declared size never triggers a resize.
pub fn undersized<'a>(pvcs: &'a [PersistentVolumeClaim], size: &str) -> Result<Vec<&'a PersistentVolumeClaim>> {
    if size.is_empty() {
        return Ok(Vec::new());
    }
    let want = parse_memory_bytes(size)?;
    let mut out = Vec::new();
    for pvc in pvcs {
        match requested_bytes(pvc) {
            Some(have) if have < want => out.push(pvc),
            Some(have) if have > want => {
                warn!(pvc = ?pvc.metadata.name, have, want, "volume is larger than declared; shrinking is not supported")
            }
            _ => {}
        }
    }
    Ok(out)
}

pub struct KubeVolumes {
    pvcs: Api<PersistentVolumeClaim>,
}

impl KubeVolumes {
    pub fn new(client: Client, namespace: &str) -> Self { Self { pvcs: Api::namespaced(client, namespace) } }

    async fn list(&self, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let lp = ListParams::default().labels(selector);
        Ok(self.pvcs.list(&lp).await.map_err(StoreError::from)?.items)
    }
}

#[async_trait::async_trait]
impl Volumes for KubeVolumes {
    async fn needs_resize(&self, selector: &str, size: &str) -> Result<bool> {
        let pvcs = self.list(selector).await?;
        Ok(!undersized(&pvcs, size)?.is_empty())
    }

    async fn resize(&self, selector: &str, size: &str, resizers: &[Arc<dyn VolumeResizer>]) -> Result<()> {
        let pvcs = self.list(selector).await?;
        for pvc in undersized(&pvcs, size)? {
            let name = pvc.metadata.name.clone().unwrap_or_default();
            match resizers.iter().find(|r| r.supports(pvc)) {
                Some(r) => {
                    r.resize(pvc, size).await?;
                    info!(pvc = %name, size = %size, resizer = r.name(), "volume resized");
                }
                None => warn!(pvc = %name, "no volume resizer supports this volume"),
            }
        }
        Ok(())
    }
}

/// Grows the claim's storage request in place; the storage class must allow expansion.
pub struct PvcResizer {
    pvcs: Api<PersistentVolumeClaim>,
}

impl PvcResizer {
    pub fn new(client: Client, namespace: &str) -> Self { Self { pvcs: Api::namespaced(client, namespace) } }
}

pub fn storage_patch(size: &str) -> serde_json::Value {
    serde_json::json!({ "spec": { "resources": { "requests": { "storage": size } } } })
}

#[async_trait::async_trait]
impl VolumeResizer for PvcResizer {
    fn name(&self) -> &'static str { "pvc" }

    fn supports(&self, pvc: &PersistentVolumeClaim) -> bool { pvc.spec.is_some() }

    async fn resize(&self, pvc: &PersistentVolumeClaim, size: &str) -> Result<()> {
        let name = pvc.metadata.name.clone().unwrap_or_default();
        self.pvcs
            .patch(&name, &PatchParams::default(), &Patch::Merge(&storage_patch(size)))
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}
