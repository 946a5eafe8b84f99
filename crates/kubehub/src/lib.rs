//! Keel kubehub: client bootstrap and the resource store seam every reconciler talks to.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use kube::Client;
use tokio::sync::OnceCell;
use tracing::info;

pub mod mem;
pub mod store;

pub use mem::{merge_patch, MemStore, StoreOp};
pub use store::{DeletePolicy, KubeStore, ResourceStore, StoreError, StoreResult};

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared kube client built from the default kubeconfig / in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    let client = CLIENT
        .get_or_try_init(|| async {
            let c = Client::try_default().await.context("building kube client")?;
            info!(namespace = %c.default_namespace(), "kube client ready");
            Ok::<Client, anyhow::Error>(c)
        })
        .await?;
    Ok(client.clone())
}

/// Render labels as a `k=v,k2=v2` selector (sorted, stable).
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}
