use keel_apply::{same_backup_job, same_pdb, same_service};
use keel_core::{PostgresRole, Result, ResultExt};
use keel_kubehub::DeletePolicy;

use crate::cluster::Cluster;
use crate::generate;
use crate::reconcile::{Convergence, Reconcile};

impl Cluster {
    pub async fn sync_services(&mut self) -> Result<()> {
        for role in PostgresRole::ALL {
            self.sync_endpoint(role).await.with_context(|| format!("could not sync {} endpoint", role))?;
            self.sync_service(role).await.with_context(|| format!("could not sync {} service", role))?;
        }
        Ok(())
    }

    async fn sync_service(&mut self, role: PostgresRole) -> Result<()> {
        let spec = self.spec().clone();
        let b = &self.backends;
        let r = Reconcile::new("Service", self.service_name(role), b.services.as_ref(), b.events.as_ref())
            .mode(Convergence::Patch)
            .wait(b.wait);
        let live = match r.fetch().await? {
            Some(live) => r.update_existing(live, || Ok(generate::service(self, &spec, role)), same_service).await?,
            None => {
                self.services.remove(&role);
                r.create_missing(|| Ok(generate::service(self, &spec, role))).await?
            }
        };
        self.services.insert(role, live);
        Ok(())
    }

    /// Endpoints are only ever created here; their content belongs to Patroni.
    async fn sync_endpoint(&mut self, role: PostgresRole) -> Result<()> {
        let b = &self.backends;
        let r = Reconcile::new("Endpoints", self.endpoint_name(role), b.endpoints.as_ref(), b.events.as_ref())
            .mode(Convergence::CreateOnly);
        let live = match r.fetch().await? {
            Some(live) => live,
            None => {
                self.endpoints.remove(&role);
                r.create_missing(|| Ok(generate::endpoint(self, role))).await?
            }
        };
        self.endpoints.insert(role, live);
        Ok(())
    }

    pub async fn sync_pod_disruption_budget(&mut self) -> Result<()> {
        let spec = self.spec().clone();
        let b = &self.backends;
        let live = Reconcile::new("PodDisruptionBudget", self.pdb_name(), b.pdbs.as_ref(), b.events.as_ref())
            .mode(Convergence::Replace)
            .delete_policy(DeletePolicy::Foreground)
            .wait(b.wait)
            .run(|| Ok(generate::pod_disruption_budget(self, &spec)), same_pdb)
            .await?;
        self.pdb = Some(live);
        Ok(())
    }

    pub async fn sync_logical_backup_job(&mut self) -> Result<()> {
        let spec = self.spec().clone();
        let b = &self.backends;
        let live = Reconcile::new("CronJob", self.backup_job_name(), b.cronjobs.as_ref(), b.events.as_ref())
            .mode(Convergence::Patch)
            .wait(b.wait)
            .run(|| Ok(generate::backup_job(self, &spec)), same_backup_job)
            .await?;
        self.backup_job = Some(live);
        Ok(())
    }
}
