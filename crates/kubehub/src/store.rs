//! Resource store seam. The engine branches on exactly three error classes:
//! `NotFound`, `AlreadyExists` and everything else.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    Client, Resource,
};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message.clone()),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => StoreError::AlreadyExists(ae.message.clone()),
            _ => StoreError::Other(e.to_string()),
        }
    }
}

impl From<StoreError> for keel_core::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => keel_core::Error::NotFound(m),
            StoreError::AlreadyExists(m) => keel_core::Error::AlreadyExists(m),
            StoreError::Other(m) => keel_core::Error::Transport(m),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    Foreground,
    /// Leave dependents (e.g. statefulset pods) running.
    Orphan,
}

/// One live resource kind in one namespace.
#[async_trait::async_trait]
pub trait ResourceStore<K>: Send + Sync {
    async fn get(&self, name: &str) -> StoreResult<K>;
    async fn create(&self, obj: &K) -> StoreResult<K>;
    /// Full replace; `obj` must carry the live resourceVersion.
    async fn update(&self, obj: &K) -> StoreResult<K>;
    /// JSON merge patch.
    async fn patch(&self, name: &str, delta: &Json) -> StoreResult<K>;
    async fn delete(&self, name: &str, policy: DeletePolicy) -> StoreResult<()>;
}

/// kube-rs backed store for a namespaced kind.
pub struct KubeStore<K> {
    api: Api<K>,
    kind: &'static str,
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    pub fn namespaced(client: Client, namespace: &str, kind: &'static str) -> Self {
        Self { api: Api::namespaced(client, namespace), kind }
    }
}

#[async_trait::async_trait]
impl<K> ResourceStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
    <K as Resource>::DynamicType: Default,
{
    async fn get(&self, name: &str) -> StoreResult<K> {
        counter!("keel_store_calls_total", 1u64, "kind" => self.kind, "op" => "get");
        Ok(self.api.get(name).await?)
    }

    async fn create(&self, obj: &K) -> StoreResult<K> {
        counter!("keel_store_calls_total", 1u64, "kind" => self.kind, "op" => "create");
        Ok(self.api.create(&PostParams::default(), obj).await?)
    }

    async fn update(&self, obj: &K) -> StoreResult<K> {
        counter!("keel_store_calls_total", 1u64, "kind" => self.kind, "op" => "update");
        let name = obj.meta().name.clone().ok_or_else(|| StoreError::Other(format!("{} without metadata.name", self.kind)))?;
        Ok(self.api.replace(&name, &PostParams::default(), obj).await?)
    }

    async fn patch(&self, name: &str, delta: &Json) -> StoreResult<K> {
        counter!("keel_store_calls_total", 1u64, "kind" => self.kind, "op" => "patch");
        Ok(self.api.patch(name, &PatchParams::default(), &Patch::Merge(delta)).await?)
    }

    async fn delete(&self, name: &str, policy: DeletePolicy) -> StoreResult<()> {
        counter!("keel_store_calls_total", 1u64, "kind" => self.kind, "op" => "delete");
        let dp = match policy {
            DeletePolicy::Foreground => DeleteParams::foreground(),
            DeletePolicy::Orphan => DeleteParams::orphan(),
        };
        self.api.delete(name, &dp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: format!("{} happened", reason), reason: reason.into(), code })
    }

    #[test]
    fn kube_errors_fall_into_three_classes() {
        assert!(matches!(StoreError::from(api_err(404, "NotFound")), StoreError::NotFound(_)));
        assert!(matches!(StoreError::from(api_err(409, "AlreadyExists")), StoreError::AlreadyExists(_)));
        // an optimistic-lock conflict is not a create race
        assert!(matches!(StoreError::from(api_err(409, "Conflict")), StoreError::Other(_)));
        assert!(matches!(StoreError::from(api_err(500, "InternalError")), StoreError::Other(_)));
    }

    #[test]
    fn store_errors_map_onto_engine_taxonomy() {
        let e: keel_core::Error = StoreError::AlreadyExists("x".into()).into();
        assert!(e.is_already_exists());
        let e: keel_core::Error = StoreError::Other("connection refused".into()).into();
        assert!(matches!(e, keel_core::Error::Transport(_)));
    }
}
