//! Connection pooler. Whether it should exist is decided by comparing the previous and the
//! new spec; its resources live and die independently of the statefulset.

use keel_apply::pooler::{defaults_sync, spec_sync};
use keel_apply::Comparison;
use keel_core::{ClusterSpec, Error, Result, ResultExt};
use keel_db::install_lookup_function;
use tracing::{info, warn};

use crate::cluster::{Cluster, PoolBundle};
use crate::generate;
use crate::reconcile::{Convergence, Reconcile};

impl Cluster {
    pub async fn sync_connection_pool(&mut self, old: &ClusterSpec, new: &ClusterSpec) -> Result<()> {
        let (old_need, new_need) = (old.needs_connection_pool(), new.needs_connection_pool());

        if new_need {
            if !old_need || !self.pool.lookup_function {
                let (schema, user) = self.pool_schema_and_user(new);
                install_lookup_function(self.backends.db.as_ref(), &self.connect_target("postgres"), &schema, &user)
                    .await
                    .context("could not sync connection pool lookup function")?;
                self.pool.lookup_function = true;
            }
            return self.sync_pool_worker(old, new).await;
        }

        if old_need || !self.pool.is_empty() {
            if let Err(e) = self.delete_connection_pool().await {
                warn!(cluster = %self.name(), error = %e, "could not remove connection pool");
            }
        }
        Ok(())
    }

    async fn sync_pool_worker(&mut self, old: &ClusterSpec, new: &ClusterSpec) -> Result<()> {
        let b = self.backends.clone();
        let deployments = Reconcile::new("Deployment", self.pool_name(), b.deployments.as_ref(), b.events.as_ref())
            .mode(Convergence::Patch)
            .wait(b.wait);
        let deployment = match deployments.fetch().await? {
            None => {
                info!(cluster = %self.name(), "connection pool deployment not found, creating it");
                self.pool.deployment = None;
                deployments.create_or_fetch(&generate::pool_deployment(self, new)).await?.0
            }
            Some(live) => {
                let mut cmp = Comparison::matched();
                let by_spec = spec_sync(old.connection_pool.as_ref(), new.connection_pool.as_ref());
                let by_defaults = defaults_sync(new.connection_pool.as_ref(), &self.config.connection_pool, &live);
                for reason in by_spec.reasons.into_iter().chain(by_defaults.reasons) {
                    cmp.update(reason);
                }
                if cmp.matched {
                    live
                } else {
                    deployments.converge(live, generate::pool_deployment(self, new), &cmp).await?
                }
            }
        };
        self.pool.deployment = Some(deployment);

        let services = Reconcile::new("Service", self.pool_name(), b.services.as_ref(), b.events.as_ref());
        let service = match services.fetch().await? {
            Some(live) => live,
            None => {
                self.pool.service = None;
                services.create_missing(|| Ok(generate::pool_service(self))).await?
            }
        };
        self.pool.service = Some(service);
        Ok(())
    }

    /// Both deletes are always attempted. Each reference is forgotten once its resource is
    /// gone; the lookup function flag only once both are.
    pub async fn delete_connection_pool(&mut self) -> Result<()> {
        let b = self.backends.clone();
        let name = self.pool_name();
        let deployment = Reconcile::new("Deployment", name.clone(), b.deployments.as_ref(), b.events.as_ref())
            .delete("connection pool disabled")
            .await
            .context("could not delete connection pool deployment");
        if deployment.is_ok() {
            self.pool.deployment = None;
        }
        let service = Reconcile::new("Service", name, b.services.as_ref(), b.events.as_ref())
            .delete("connection pool disabled")
            .await
            .context("could not delete connection pool service");
        if service.is_ok() {
            self.pool.service = None;
        }
        match (deployment, service) {
            (Ok(_), Ok(_)) => {
                self.pool = PoolBundle::default();
                info!(cluster = %self.name(), "connection pool removed");
                Ok(())
            }
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(d), Err(s)) => Err(Error::Transport(format!("{}; {}", d, s))),
        }
    }
}
