//! Fetch-or-create-then-converge, shared by every resource kind the engine owns.

use std::fmt::Debug;
use std::time::Instant;

use keel_apply::{change_summary, strip_noisy, with_removals, Comparison};
use keel_core::{Error, Result};
use keel_kubehub::{DeletePolicy, ResourceStore, StoreError};
use keel_ops::WaitPolicy;
use kube::Resource;
use serde::Serialize;
use tracing::{debug, info};

use crate::events::{EventSink, Transition};

/// How a mismatch is written back when the comparator does not demand a replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Never touch a present resource.
    CreateOnly,
    /// Full update carrying the live resourceVersion.
    Update,
    /// JSON merge patch of the desired definition.
    Patch,
    /// Delete and recreate on any mismatch.
    Replace,
}

pub struct Reconcile<'a, K> {
    pub kind: &'static str,
    pub name: String,
    store: &'a dyn ResourceStore<K>,
    events: &'a dyn EventSink,
    mode: Convergence,
    delete_policy: DeletePolicy,
    wait: WaitPolicy,
}

impl<'a, K> Reconcile<'a, K>
where
    K: Resource + Clone + Serialize + Debug + Send + Sync,
{
    pub fn new(kind: &'static str, name: impl Into<String>, store: &'a dyn ResourceStore<K>, events: &'a dyn EventSink) -> Self {
        Self { kind, name: name.into(), store, events, mode: Convergence::Update, delete_policy: DeletePolicy::Foreground, wait: WaitPolicy::default() }
    }

    pub fn mode(mut self, mode: Convergence) -> Self {
        self.mode = mode;
        self
    }

    pub fn delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    fn ctx(&self, what: &str) -> String { format!("could not {} {} {:?}", what, self.kind, self.name) }

    /// Fetch the live resource; `None` when it does not exist.
    pub async fn fetch(&self) -> Result<Option<K>> {
        match self.store.get(&self.name).await {
            Ok(live) => Ok(Some(live)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(Error::from(e).context(self.ctx("get"))),
        }
    }

    /// Returns the resulting live resource, whichever branch was taken.
    pub async fn run<G, C>(&self, generate: G, compare: C) -> Result<K>
    where
        G: FnOnce() -> Result<K>,
        C: FnOnce(&K, &K) -> Comparison,
    {
        match self.fetch().await? {
            None => self.create_missing(generate).await,
            Some(live) => self.update_existing(live, generate, compare).await,
        }
    }

    /// The resource is known to be absent.
    pub async fn create_missing<G>(&self, generate: G) -> Result<K>
    where
        G: FnOnce() -> Result<K>,
    {
        info!(kind = self.kind, name = %self.name, "could not find the cluster's resource");
        let desired = generate()?;
        Ok(self.create_or_fetch(&desired).await?.0)
    }

    pub async fn update_existing<G, C>(&self, live: K, generate: G, compare: C) -> Result<K>
    where
        G: FnOnce() -> Result<K>,
        C: FnOnce(&K, &K) -> Comparison,
    {
        if self.mode == Convergence::CreateOnly {
            return Ok(live);
        }
        let desired = generate()?;
        let cmp = compare(&live, &desired);
        if cmp.matched {
            return Ok(live);
        }
        self.converge(live, desired, &cmp).await
    }

    /// Create `desired`; if a concurrent actor won, fetch its object once instead.
    /// The flag is true when this call created the resource.
    pub async fn create_or_fetch(&self, desired: &K) -> Result<(K, bool)> {
        match self.store.create(desired).await {
            Ok(created) => {
                self.events.record(self.kind, &self.name, Transition::Created, "missing");
                Ok((created, true))
            }
            Err(StoreError::AlreadyExists(_)) => {
                info!(kind = self.kind, name = %self.name, "resource already exists, fetching it");
                let live = self.store.get(&self.name).await.map_err(|e| Error::from(e).context(self.ctx("fetch existing")))?;
                Ok((live, false))
            }
            Err(e) => Err(Error::from(e).context(self.ctx("create missing"))),
        }
    }

    /// Plain create; a concurrent creation surfaces as `AlreadyExists`.
    pub async fn store_create(&self, desired: &K) -> Result<K> {
        let created = self.store.create(desired).await.map_err(Error::from)?;
        self.events.record(self.kind, &self.name, Transition::Created, "missing");
        Ok(created)
    }

    pub async fn converge(&self, live: K, mut desired: K, cmp: &Comparison) -> Result<K> {
        let summary = change_summary(&live, &desired);
        let reason = cmp.reason();
        info!(
            kind = self.kind, name = %self.name, adds = summary.adds, updates = summary.updates, removes = summary.removes,
            reason = %reason, "resource is not in the desired state"
        );
        if cmp.replace || self.mode == Convergence::Replace {
            return self.replace(&desired, &reason).await;
        }
        let updated = match self.mode {
            Convergence::Patch => {
                let delta = serde_json::to_value(&desired)
                    .map(|v| with_removals(strip_noisy(v), &cmp.removals))
                    .map_err(|e| Error::Validation(e.to_string()))?;
                self.store.patch(&self.name, &delta).await
            }
            _ => {
                desired.meta_mut().resource_version = live.meta().resource_version.clone();
                self.store.update(&desired).await
            }
        };
        let updated = updated.map_err(|e| Error::from(e).context(self.ctx("update")))?;
        self.events.record(self.kind, &self.name, Transition::Updated, &reason);
        Ok(updated)
    }

    /// Delete, wait for the name to be released, create.
    pub async fn replace(&self, desired: &K, reason: &str) -> Result<K> {
        match self.store.delete(&self.name, self.delete_policy).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(Error::from(e).context(self.ctx("delete"))),
        }
        self.wait_deleted().await?;
        let created = self.store.create(desired).await.map_err(|e| Error::from(e).context(self.ctx("recreate")))?;
        self.events.record(self.kind, &self.name, Transition::Replaced, reason);
        Ok(created)
    }

    async fn wait_deleted(&self) -> Result<()> {
        let deadline = Instant::now() + self.wait.timeout;
        loop {
            if self.fetch().await?.is_none() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Unready(format!("{} {:?} still present {}s after deletion", self.kind, self.name, self.wait.timeout.as_secs())));
            }
            debug!(kind = self.kind, name = %self.name, "waiting for deletion");
            tokio::time::sleep(self.wait.poll).await;
        }
    }

    /// Delete if present. Returns whether anything was deleted.
    pub async fn delete(&self, reason: &str) -> Result<bool> {
        match self.store.delete(&self.name, self.delete_policy).await {
            Ok(()) => {
                self.events.record(self.kind, &self.name, Transition::Deleted, reason);
                Ok(true)
            }
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(Error::from(e).context(self.ctx("delete"))),
        }
    }
}
