//! One sync pass. Steps run in a fixed order and the first fatal error aborts the rest.

use std::time::Instant;

use keel_core::{ClusterManifest, ClusterStatus, Result, ResultExt};
use metrics::{counter, histogram};
use tracing::{info, warn};

use crate::cluster::Cluster;

impl Cluster {
    /// Converge every owned resource toward `manifest`. Status ends up `SyncFailed` on any
    /// fatal error and `Running` otherwise.
    pub async fn sync(&mut self, manifest: ClusterManifest) -> Result<()> {
        let started = Instant::now();
        let old = std::mem::replace(&mut self.manifest, manifest).spec;

        let result = self.sync_steps(&old).await;
        let outcome = match &result {
            Ok(()) => {
                if !self.status.running() {
                    self.status = ClusterStatus::Running;
                }
                info!(cluster = %self.name(), elapsed_ms = started.elapsed().as_millis() as u64, "cluster synced");
                "ok"
            }
            Err(e) => {
                self.status = ClusterStatus::SyncFailed;
                warn!(cluster = %self.name(), error = %e, "sync failed");
                "error"
            }
        };
        counter!("keel_sync_total", 1u64, "result" => outcome);
        histogram!("keel_sync_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn sync_steps(&mut self, old: &keel_core::ClusterSpec) -> Result<()> {
        self.init_users().context("could not init users")?;
        self.sync_secrets().await.context("could not sync secrets")?;
        self.sync_services().await.context("could not sync services")?;
        self.sync_volumes().await.context("could not sync persistent volumes")?;
        self.enforce_min_resource_limits().context("could not enforce minimum resource limits")?;

        info!(cluster = %self.name(), "syncing statefulsets");
        match self.sync_statefulset().await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                warn!(cluster = %self.name(), error = %e, "statefulset was created concurrently, continuing");
            }
            Err(e) => return Err(e.context("could not sync statefulsets")),
        }

        self.sync_pod_disruption_budget().await.context("could not sync pod disruption budget")?;

        let spec = self.spec().clone();
        let instances = spec.number_of_instances();
        if spec.enable_logical_backup && instances > 0 {
            self.sync_logical_backup_job().await.context("could not sync the logical backup job")?;
        }

        if self.config.enable_database_access && instances > 0 && !spec.is_standby() {
            info!(cluster = %self.name(), "syncing roles");
            self.sync_roles().await.context("could not sync roles")?;
            info!(cluster = %self.name(), "syncing databases");
            self.sync_databases().await.context("could not sync databases")?;
        }

        self.sync_connection_pool(old, &spec).await.context("could not sync connection pool")?;
        Ok(())
    }
}
