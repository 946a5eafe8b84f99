//! Operator-wide configuration. Every field has a default; `KEEL_*` environment variables
//! override individual values.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OperatorConfig {
    pub docker_image: String,
    pub logical_backup_image: String,
    pub logical_backup_schedule: String,
    pub superuser_name: String,
    pub replication_username: String,
    pub min_cpu_limit: String,
    pub min_memory_limit: String,
    pub pod_ready_timeout_secs: u64,
    pub pod_poll_secs: u64,
    pub patroni_port: u16,
    pub enable_database_access: bool,
    /// `{username}` and `{cluster}` are substituted.
    pub secret_name_template: String,
    /// `{cluster}` is substituted.
    pub pdb_name_template: String,
    pub connection_pool: ConnectionPoolConfig,
    pub infrastructure_roles: Vec<InfrastructureRole>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            docker_image: "ghcr.io/zalando/spilo-16:3.3-p1".into(),
            logical_backup_image: "registry.opensource.zalan.do/acid/logical-backup:v1.10.1".into(),
            logical_backup_schedule: "30 00 * * *".into(),
            superuser_name: "postgres".into(),
            replication_username: "standby".into(),
            min_cpu_limit: "250m".into(),
            min_memory_limit: "250Mi".into(),
            pod_ready_timeout_secs: 300,
            pod_poll_secs: 2,
            patroni_port: 8008,
            enable_database_access: true,
            secret_name_template: "{username}.{cluster}.credentials".into(),
            pdb_name_template: "postgres-{cluster}-pdb".into(),
            connection_pool: ConnectionPoolConfig::default(),
            infrastructure_roles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    pub schema: String,
    pub user: String,
    pub image: String,
    pub number_of_instances: i32,
    pub mode: String,
    pub max_db_connections: i32,
    pub default_cpu_request: String,
    pub default_cpu_limit: String,
    pub default_memory_request: String,
    pub default_memory_limit: String,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            schema: "pooler".into(),
            user: "pooler".into(),
            image: "registry.opensource.zalan.do/acid/pgbouncer:master-22".into(),
            number_of_instances: 2,
            mode: "transaction".into(),
            max_db_connections: 60,
            default_cpu_request: "500m".into(),
            default_cpu_limit: "1".into(),
            default_memory_request: "100Mi".into(),
            default_memory_limit: "100Mi".into(),
        }
    }
}

/// A role whose password is owned by the infrastructure rather than by the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct InfrastructureRole {
    pub name: String,
    pub password: String,
    pub flags: Vec<String>,
    pub member_of: Vec<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    let Ok(raw) = std::env::var(key) else { return default };
    match raw.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            default
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self { Self::default().with_env_overrides() }

    pub fn with_env_overrides(self) -> Self {
        let pool = self.connection_pool;
        Self {
            docker_image: env_or("KEEL_DOCKER_IMAGE", self.docker_image),
            logical_backup_image: env_or("KEEL_LOGICAL_BACKUP_IMAGE", self.logical_backup_image),
            logical_backup_schedule: env_or("KEEL_LOGICAL_BACKUP_SCHEDULE", self.logical_backup_schedule),
            superuser_name: env_or("KEEL_SUPERUSER_NAME", self.superuser_name),
            replication_username: env_or("KEEL_REPLICATION_USERNAME", self.replication_username),
            min_cpu_limit: env_or("KEEL_MIN_CPU_LIMIT", self.min_cpu_limit),
            min_memory_limit: env_or("KEEL_MIN_MEMORY_LIMIT", self.min_memory_limit),
            pod_ready_timeout_secs: env_or("KEEL_POD_READY_TIMEOUT_SECS", self.pod_ready_timeout_secs),
            pod_poll_secs: env_or("KEEL_POD_POLL_SECS", self.pod_poll_secs),
            patroni_port: env_or("KEEL_PATRONI_PORT", self.patroni_port),
            enable_database_access: env_or("KEEL_ENABLE_DATABASE_ACCESS", self.enable_database_access),
            secret_name_template: env_or("KEEL_SECRET_NAME_TEMPLATE", self.secret_name_template),
            pdb_name_template: env_or("KEEL_PDB_NAME_TEMPLATE", self.pdb_name_template),
            connection_pool: ConnectionPoolConfig {
                schema: env_or("KEEL_POOL_SCHEMA", pool.schema),
                user: env_or("KEEL_POOL_USER", pool.user),
                image: env_or("KEEL_POOL_IMAGE", pool.image),
                number_of_instances: env_or("KEEL_POOL_INSTANCES", pool.number_of_instances),
                mode: env_or("KEEL_POOL_MODE", pool.mode),
                max_db_connections: env_or("KEEL_POOL_MAX_DB_CONNECTIONS", pool.max_db_connections),
                ..pool
            },
            infrastructure_roles: self.infrastructure_roles,
        }
    }

    pub fn secret_name(&self, username: &str, cluster: &str) -> String {
        self.secret_name_template
            .replace("{username}", &username.replace('_', "-"))
            .replace("{cluster}", cluster)
            .to_lowercase()
    }

    pub fn pdb_name(&self, cluster: &str) -> String { self.pdb_name_template.replace("{cluster}", cluster) }
}
