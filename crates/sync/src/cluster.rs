//! Long-lived state of one managed cluster. A `None` / missing entry means the resource is
//! known to be absent, never "not looked at yet".

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use keel_core::{Accounts, ClusterManifest, ClusterSpec, ClusterStatus, OperatorConfig, PostgresRole};
use keel_db::ConnectTarget;

use crate::backends::Backends;

pub const POSTGRES_PORT: i32 = 5432;

/// Pooler resources. Lifecycle is independent of the statefulset.
#[derive(Debug, Clone, Default)]
pub struct PoolBundle {
    pub deployment: Option<Deployment>,
    pub service: Option<Service>,
    pub lookup_function: bool,
}

impl PoolBundle {
    pub fn is_empty(&self) -> bool { self.deployment.is_none() && self.service.is_none() }
}

pub struct Cluster {
    pub manifest: ClusterManifest,
    pub config: OperatorConfig,
    pub status: ClusterStatus,
    pub services: BTreeMap<PostgresRole, Service>,
    pub endpoints: BTreeMap<PostgresRole, Endpoints>,
    pub statefulset: Option<StatefulSet>,
    pub pdb: Option<PodDisruptionBudget>,
    pub backup_job: Option<CronJob>,
    /// Keyed by secret name.
    pub secrets: BTreeMap<String, Secret>,
    pub accounts: Accounts,
    pub pool: PoolBundle,
    pub(crate) backends: Backends,
}

impl Cluster {
    pub fn new(manifest: ClusterManifest, config: OperatorConfig, backends: Backends) -> Self {
        Self {
            manifest,
            config,
            status: ClusterStatus::Unknown,
            services: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            statefulset: None,
            pdb: None,
            backup_job: None,
            secrets: BTreeMap::new(),
            accounts: Accounts::default(),
            pool: PoolBundle::default(),
            backends,
        }
    }

    pub fn name(&self) -> &str { &self.manifest.name }
    pub fn namespace(&self) -> &str { &self.manifest.namespace }
    pub fn spec(&self) -> &ClusterSpec { &self.manifest.spec }

    pub fn service_name(&self, role: PostgresRole) -> String {
        match role {
            PostgresRole::Primary => self.name().to_string(),
            PostgresRole::Replica => format!("{}-repl", self.name()),
        }
    }

    pub fn endpoint_name(&self, role: PostgresRole) -> String { self.service_name(role) }
    pub fn statefulset_name(&self) -> String { self.name().to_string() }
    pub fn pdb_name(&self) -> String { self.config.pdb_name(self.name()) }
    pub fn backup_job_name(&self) -> String { format!("logical-backup-{}", self.name()) }
    pub fn pool_name(&self) -> String { format!("{}-pooler", self.name()) }
    pub fn secret_name(&self, username: &str) -> String { self.config.secret_name(username, self.name()) }

    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut l = BTreeMap::new();
        l.insert("application".to_string(), "spilo".to_string());
        l.insert("cluster-name".to_string(), self.name().to_string());
        l
    }

    pub fn role_labels(&self, role: PostgresRole) -> BTreeMap<String, String> {
        let mut l = self.labels();
        l.insert("spilo-role".to_string(), role.label_value().to_string());
        l
    }

    pub fn pool_labels(&self) -> BTreeMap<String, String> {
        let mut l = BTreeMap::new();
        l.insert("application".to_string(), "db-connection-pool".to_string());
        l.insert("connection-pool".to_string(), self.pool_name());
        l
    }

    pub fn selector(&self) -> String { keel_kubehub::label_selector(&self.labels()) }

    /// Pooler schema and user: the manifest's value when set, the operator default otherwise.
    pub fn pool_schema_and_user(&self, spec: &ClusterSpec) -> (String, String) {
        let pool = spec.connection_pool.clone().unwrap_or_default();
        let pick = |own: String, default: &str| if own.is_empty() { default.to_string() } else { own };
        (pick(pool.schema, &self.config.connection_pool.schema), pick(pool.user, &self.config.connection_pool.user))
    }

    /// Superuser connection through the primary service.
    pub fn connect_target(&self, database: &str) -> ConnectTarget {
        let su = self.accounts.superuser();
        ConnectTarget {
            host: format!("{}.{}.svc", self.service_name(PostgresRole::Primary), self.namespace()),
            port: POSTGRES_PORT as u16,
            database: database.to_string(),
            user: su.map(|u| u.name.clone()).unwrap_or_else(|| self.config.superuser_name.clone()),
            password: su.map(|u| u.password.clone()).unwrap_or_default(),
        }
    }
}
