//! Keel sync: one pass of the reconciliation engine brings every resource a Postgres
//! cluster owns (services, endpoints, secrets, statefulset, volumes, disruption budget,
//! backup job, database roles, databases and the connection pooler) to the manifest.

#![forbid(unsafe_code)]

pub mod actor;
pub mod backends;
pub mod cluster;
pub mod database;
pub mod events;
pub mod generate;
pub mod pooler;
pub mod reconcile;
pub mod secrets;
pub mod services;
pub mod statefulset;
pub mod sync;
pub mod users;
pub mod volumes;

pub use actor::{spawn_cluster, ClusterHandle, ClusterSnapshot};
pub use backends::Backends;
pub use cluster::{Cluster, PoolBundle};
pub use events::{EventSink, TracingEvents, Transition};
pub use reconcile::{Convergence, Reconcile};
pub use statefulset::RollingUpdate;
