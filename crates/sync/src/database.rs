//! Roles and databases, each over a session scoped to the call.

use std::collections::BTreeMap;

use keel_core::{PgUser, Result, ResultExt, SystemAccount};
use keel_db::{compose_close, plan_databases, PgSession};
use tracing::info;

use crate::cluster::Cluster;

impl Cluster {
    async fn open_session(&self) -> Result<Box<dyn PgSession>> {
        self.backends.db.connect(&self.connect_target("postgres")).await.context("could not init db connection")
    }

    /// Declared accounts plus, when pooling is on, the pooler's own role.
    fn desired_roles(&self) -> BTreeMap<String, PgUser> {
        let mut roles: BTreeMap<String, PgUser> = self.accounts.declared.iter().map(|(k, u)| (k.clone(), u.clone())).collect();
        if self.spec().needs_connection_pool() {
            if let Some(pool) = self.accounts.system.get(&SystemAccount::ConnectionPool) {
                roles.insert(pool.name.clone(), pool.clone());
            }
        }
        roles
    }

    pub async fn sync_roles(&self) -> Result<()> {
        let mut session = self.open_session().await?;
        let done = self.sync_roles_in(session.as_mut()).await;
        compose_close(done, session.close().await)
    }

    async fn sync_roles_in(&self, session: &mut dyn PgSession) -> Result<()> {
        let desired = self.desired_roles();
        let names: Vec<String> = desired.keys().cloned().collect();
        let live = session.list_roles(&names).await.context("error getting users from the database")?;
        let strategy = &self.backends.user_sync;
        let requests = strategy.produce_sync_requests(&live, &desired);
        if requests.is_empty() {
            return Ok(());
        }
        info!(cluster = %self.name(), requests = requests.len(), "syncing database roles");
        strategy.execute_sync_requests(&requests, session).await.context("error executing sync statements")
    }

    pub async fn sync_databases(&self) -> Result<()> {
        let mut session = self.open_session().await?;
        let done = self.sync_databases_in(session.as_mut()).await;
        compose_close(done, session.close().await)
    }

    async fn sync_databases_in(&self, session: &mut dyn PgSession) -> Result<()> {
        let current = session.list_databases().await.context("could not get current databases")?;
        let plan = plan_databases(&current, &self.spec().databases);
        if plan.is_empty() {
            return Ok(());
        }
        for stmt in plan.statements() {
            session.execute(&stmt).await.with_context(|| format!("could not execute {:?}", stmt))?;
        }
        info!(cluster = %self.name(), created = plan.create.len(), altered = plan.alter_owner.len(), "databases synced");
        Ok(())
    }
}
