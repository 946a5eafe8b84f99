//! Statefulset reconciliation: leftover members of a deleted statefulset, engine version
//! drift, in-place update versus replace, and the pending rolling update that has to
//! survive both process restarts and statefulset replaces.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use keel_apply::statefulset::compare;
use keel_core::{Error, Result, ResultExt, POSTGRES_CONTAINER, ROLLING_UPDATE_ANNOTATION};
use keel_kubehub::DeletePolicy;
use serde_json::json;
use tracing::{info, warn};

use crate::cluster::Cluster;
use crate::events::Transition;
use crate::generate::{self, validate_version};
use crate::reconcile::{Convergence, Reconcile};

/// Parameters Patroni only honours from its distributed config; pushing them through the
/// REST API is the only way to change them on a running cluster.
pub const BOOTSTRAP_ONLY_PARAMETERS: &[&str] = &[
    "max_connections",
    "max_locks_per_transaction",
    "max_worker_processes",
    "max_prepared_transactions",
    "wal_level",
    "wal_log_hints",
    "track_commit_timestamp",
    "max_wal_senders",
    "max_replication_slots",
    "wal_keep_segments",
    "wal_keep_size",
];

/// Whether the members still have to be recreated, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingUpdate {
    NotRequired,
    /// The pod template changed in a way running pods do not pick up.
    StructuralChange,
    /// Pods survived the deletion of their statefulset and run an outdated template.
    LeftoverMembers,
}

impl RollingUpdate {
    pub fn annotation_value(&self) -> &'static str {
        match self {
            RollingUpdate::NotRequired => "false",
            RollingUpdate::StructuralChange => "structural-change",
            RollingUpdate::LeftoverMembers => "leftover-members",
        }
    }

    /// Unknown values yield `None` so that they never mask a cached flag.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "false" => Some(RollingUpdate::NotRequired),
            "true" | "structural-change" => Some(RollingUpdate::StructuralChange),
            "leftover-members" => Some(RollingUpdate::LeftoverMembers),
            _ => None,
        }
    }

    pub fn from_statefulset(sts: &StatefulSet) -> Option<Self> {
        sts.metadata.annotations.as_ref()?.get(ROLLING_UPDATE_ANNOTATION).and_then(|v| Self::parse(v))
    }

    pub fn pending(&self) -> bool { !matches!(self, RollingUpdate::NotRequired) }

    /// `cached` is the flag on the statefulset this engine last observed or wrote. It wins:
    /// a replace in between recreates the statefulset from a definition whose annotation
    /// may predate the pending update.
    pub fn merge(cached: Option<Self>, observed: Option<Self>) -> Self {
        cached.or(observed).unwrap_or(RollingUpdate::NotRequired)
    }

    pub fn stamp(&self, sts: &mut StatefulSet) {
        sts.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(ROLLING_UPDATE_ANNOTATION.to_string(), self.annotation_value().to_string());
    }
}

/// Version the live statefulset actually runs: `PGVERSION` first, then the `spilo-<major>`
/// part of the image name.
pub fn running_version(sts: &StatefulSet) -> Result<Option<String>> {
    let containers = sts.spec.as_ref().and_then(|s| s.template.spec.as_ref()).map(|p| p.containers.as_slice()).unwrap_or_default();
    let Some(container) = containers.iter().find(|c| c.name == POSTGRES_CONTAINER).or_else(|| containers.first()) else {
        return Ok(None);
    };
    let from_env = container.env.as_ref().and_then(|env| env.iter().find(|e| e.name == "PGVERSION")).and_then(|e| e.value.clone());
    let from_image = || {
        let image = container.image.as_deref()?;
        let last = image.rsplit('/').next()?;
        let repo = last.split(':').next()?;
        repo.strip_prefix("spilo-").map(str::to_string)
    };
    match from_env.or_else(from_image) {
        Some(v) if v.split('.').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) => Ok(Some(v)),
        Some(v) => Err(Error::Validation(format!("could not parse running postgres version {:?}", v))),
        None => Ok(None),
    }
}

impl Cluster {
    pub async fn sync_statefulset(&mut self) -> Result<()> {
        let b = self.backends.clone();
        let r = Reconcile::new("StatefulSet", self.statefulset_name(), b.statefulsets.as_ref(), b.events.as_ref())
            .mode(Convergence::Patch)
            .delete_policy(DeletePolicy::Orphan)
            .wait(b.wait);

        let rolling = match r.fetch().await? {
            None => self.create_statefulset(&r).await?,
            Some(live) => self.update_statefulset(&r, live).await?,
        };

        self.sync_global_config().await.context("could not set cluster-wide PostgreSQL configuration options")?;

        if rolling.pending() {
            info!(cluster = %self.name(), reason = rolling.annotation_value(), "performing rolling update");
            b.pods.recreate_pods(&self.selector()).await.context("could not recreate pods")?;
            self.write_rolling_update(RollingUpdate::NotRequired).await;
            info!(cluster = %self.name(), "rolling update done, all pods have been recreated");
        }
        Ok(())
    }

    async fn create_statefulset(&mut self, r: &Reconcile<'_, StatefulSet>) -> Result<RollingUpdate> {
        self.statefulset = None;
        let selector = self.selector();
        let orphans = self.backends.pods.list_pods(&selector).await.context("could not list pods of the statefulset")?;
        let rolling = if orphans.is_empty() {
            RollingUpdate::NotRequired
        } else {
            info!(cluster = %self.name(), pods = orphans.len(), "found pods without the statefulset, triggering rolling update");
            RollingUpdate::LeftoverMembers
        };

        let spec = self.spec().clone();
        let mut desired = generate::statefulset(self, &spec).context("could not generate statefulset")?;
        rolling.stamp(&mut desired);
        // AlreadyExists escapes on purpose: the caller decides whether a lost race is fatal.
        let created = r.store_create(&desired).await.context("could not create missing statefulset")?;
        self.statefulset = Some(created);

        let expected = spec.number_of_instances() as usize;
        self.backends.pods.wait_pods_ready(&selector, expected).await.context("cluster is not ready")?;
        info!(cluster = %self.name(), "created missing statefulset");
        Ok(rolling)
    }

    async fn update_statefulset(&mut self, r: &Reconcile<'_, StatefulSet>, live: StatefulSet) -> Result<RollingUpdate> {
        let cached = self.statefulset.as_ref().and_then(RollingUpdate::from_statefulset);
        let mut rolling = RollingUpdate::merge(cached, RollingUpdate::from_statefulset(&live));

        self.reconcile_version(&live)?;
        let spec = self.spec().clone();
        let mut desired = generate::statefulset(self, &spec).context("could not generate statefulset")?;
        rolling.stamp(&mut desired);

        let cmp = compare(&live, &desired);
        if cmp.matched {
            let observed = RollingUpdate::from_statefulset(&live);
            self.statefulset = Some(live);
            if observed != Some(rolling) {
                self.write_rolling_update(rolling).await;
            }
            return Ok(rolling);
        }
        if cmp.rolling_update && !rolling.pending() {
            rolling = RollingUpdate::StructuralChange;
            rolling.stamp(&mut desired);
            info!(cluster = %self.name(), reason = %cmp.reason(), "statefulset changes require a rolling update");
        }
        let updated = r.converge(live, desired, &cmp).await?;
        self.statefulset = Some(updated);
        Ok(rolling)
    }

    /// A running major version wins over the manifest: an in-place major upgrade has no effect.
    fn reconcile_version(&mut self, live: &StatefulSet) -> Result<()> {
        let Some(running) = running_version(live)? else {
            return Ok(());
        };
        let desired = validate_version(&self.spec().postgresql.version)?;
        if running != desired {
            warn!(
                cluster = %self.name(), running = %running, desired = %desired,
                "postgres version change is not supported in place, keeping the running version"
            );
            self.manifest.spec.postgresql.version = running;
        }
        Ok(())
    }

    /// Cluster-wide parameters go through Patroni; any one member accepting them is enough.
    pub async fn sync_global_config(&self) -> Result<()> {
        let params: BTreeMap<String, String> = self
            .spec()
            .postgresql
            .parameters
            .iter()
            .filter(|(k, _)| BOOTSTRAP_ONLY_PARAMETERS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if params.is_empty() {
            return Ok(());
        }
        let pods = self.backends.pods.list_pods(&self.selector()).await.context("could not list pods")?;
        if pods.is_empty() {
            return Err(Error::Transport("could not call Patroni API: cluster has no pods".into()));
        }
        for pod in &pods {
            match self.backends.runtime.set_postgres_parameters(pod, &params).await {
                Ok(()) => {
                    info!(cluster = %self.name(), pod = %pod.name, "patched cluster-wide postgres parameters");
                    return Ok(());
                }
                Err(e) => warn!(cluster = %self.name(), pod = %pod.name, error = %e, "could not patch postgres parameters via Patroni"),
            }
        }
        Err(Error::Transport(format!("could not reach Patroni API to set Postgres options: failed on every pod ({} total)", pods.len())))
    }

    /// The cache is written first: a failed patch only delays the annotation until the
    /// next pass, it never resurrects a flag this process already acted on.
    async fn write_rolling_update(&mut self, rolling: RollingUpdate) {
        let name = self.statefulset_name();
        if let Some(sts) = self.statefulset.as_mut() {
            rolling.stamp(sts);
        }
        let patch = json!({ "metadata": { "annotations": { ROLLING_UPDATE_ANNOTATION: rolling.annotation_value() } } });
        match self.backends.statefulsets.patch(&name, &patch).await {
            Ok(patched) => {
                self.statefulset = Some(patched);
                let reason = format!("rolling update flag set to {}", rolling.annotation_value());
                self.backends.events.record("StatefulSet", &name, Transition::Updated, &reason);
            }
            Err(e) => warn!(cluster = %self.name(), error = %e, flag = rolling.annotation_value(), "could not update the rolling update flag, retrying next sync"),
        }
    }
}
