//! Keel core types: the cluster manifest, the account registry, cluster status,
//! the error taxonomy shared by every reconciler, and operator-wide configuration.

#![forbid(unsafe_code)]

pub mod accounts;
pub mod config;
pub mod error;
pub mod quantity;
pub mod spec;

use serde::{Deserialize, Serialize};

pub use accounts::{AccountKey, Accounts, Origin, PgUser, SystemAccount};
pub use config::{ConnectionPoolConfig, InfrastructureRole, OperatorConfig};
pub use error::{Error, Result, ResultExt};
pub use spec::{ClusterManifest, ClusterSpec, ConnectionPool, PostgresRole};

/// Annotation carrying the pending rolling update on the statefulset.
pub const ROLLING_UPDATE_ANNOTATION: &str = "keel.io/rolling-update-required";

/// Name of the database container inside the statefulset template.
pub const POSTGRES_CONTAINER: &str = "postgres";

/// Overall state of a managed cluster as seen by the sync engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ClusterStatus {
    #[default]
    Unknown,
    Running,
    SyncFailed,
}

impl ClusterStatus {
    pub fn running(&self) -> bool { matches!(self, ClusterStatus::Running) }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterStatus::Unknown => "Unknown",
            ClusterStatus::Running => "Running",
            ClusterStatus::SyncFailed => "SyncFailed",
        };
        f.write_str(s)
    }
}

pub mod prelude {
    pub use super::{
        AccountKey, Accounts, ClusterManifest, ClusterSpec, ClusterStatus, ConnectionPool, Error, OperatorConfig, Origin,
        PgUser, PostgresRole, Result, ResultExt, SystemAccount,
    };
}
