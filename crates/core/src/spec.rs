//! Declarative cluster manifest. Field names follow the manifest's camelCase keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterManifest {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub spec: ClusterSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSpec {
    pub team_id: String,
    pub number_of_instances: i32,
    pub postgresql: PostgresqlParam,
    pub volume: Volume,
    pub resources: Resources,
    /// Declared roles and their flags (e.g. `createdb`, `superuser`).
    pub users: BTreeMap<String, Vec<String>>,
    /// Declared databases mapped to their owner.
    pub databases: BTreeMap<String, String>,
    pub enable_logical_backup: bool,
    pub logical_backup_schedule: Option<String>,
    pub standby: Option<StandbyDescription>,
    pub enable_connection_pool: Option<bool>,
    pub connection_pool: Option<ConnectionPool>,
    pub enable_master_load_balancer: bool,
    pub enable_replica_load_balancer: bool,
    pub allowed_source_ranges: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresqlParam {
    pub version: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Volume {
    pub size: String,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub requests: ResourceDescription,
    pub limits: ResourceDescription,
}

impl Resources {
    pub fn is_empty(&self) -> bool { self.requests.is_empty() && self.limits.is_empty() }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDescription {
    pub cpu: String,
    pub memory: String,
}

impl ResourceDescription {
    pub fn is_empty(&self) -> bool { self.cpu.is_empty() && self.memory.is_empty() }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StandbyDescription {
    pub s3_wal_path: String,
}

/// Per-cluster connection pooler settings. Empty strings fall back to operator defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionPool {
    pub number_of_instances: Option<i32>,
    pub schema: String,
    pub user: String,
    pub mode: String,
    pub docker_image: String,
    #[serde(rename = "maxDBConnections")]
    pub max_db_connections: Option<i32>,
    pub resources: Resources,
}

impl ClusterSpec {
    pub fn number_of_instances(&self) -> i32 { self.number_of_instances.max(0) }

    /// An explicit `enableConnectionPool` wins; otherwise the presence of a pool section decides.
    pub fn needs_connection_pool(&self) -> bool {
        match self.enable_connection_pool {
            Some(enabled) => enabled,
            None => self.connection_pool.is_some(),
        }
    }

    pub fn is_standby(&self) -> bool { self.standby.is_some() }
}

/// Network role of a cluster member, used to key services and endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PostgresRole {
    Primary,
    Replica,
}

impl PostgresRole {
    pub const ALL: [PostgresRole; 2] = [PostgresRole::Primary, PostgresRole::Replica];

    /// Value Patroni writes into the `spilo-role` pod label.
    pub fn label_value(&self) -> &'static str {
        match self {
            PostgresRole::Primary => "master",
            PostgresRole::Replica => "replica",
        }
    }
}

impl std::fmt::Display for PostgresRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostgresRole::Primary => f.write_str("primary"),
            PostgresRole::Replica => f.write_str("replica"),
        }
    }
}
