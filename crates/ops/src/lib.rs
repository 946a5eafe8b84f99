//! Keel Ops: imperative operations the sync engine delegates to. Pod readiness waits and
//! one-by-one recreation, the Patroni runtime-parameter channel, and volume resizing.

#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod patroni;
pub mod pods;
pub mod volumes;

pub use patroni::{PatroniClient, RuntimeChannel};
pub use pods::{recreation_order, KubePodOps, PodOps};
pub use volumes::{KubeVolumes, PvcResizer, VolumeResizer, Volumes};

/// What the engine needs to know about a cluster member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub uid: Option<String>,
    pub ip: Option<String>,
    /// Value of the `spilo-role` label (`master` / `replica`), if Patroni set one.
    pub role: Option<String>,
    pub ready: bool,
}

impl PodInfo {
    pub fn is_master(&self) -> bool { self.role.as_deref() == Some("master") }
}

/// Bounded polling used by every wait in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self { Self { timeout: Duration::from_secs(300), poll: Duration::from_secs(2) } }
}

impl WaitPolicy {
    pub fn from_config(cfg: &keel_core::OperatorConfig) -> Self {
        Self { timeout: Duration::from_secs(cfg.pod_ready_timeout_secs), poll: Duration::from_secs(cfg.pod_poll_secs.max(1)) }
    }
}
