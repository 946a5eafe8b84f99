use keel_core::quantity::{parse_cpu_millis, parse_memory_bytes};
use keel_core::{ClusterSpec, OperatorConfig, Result, ResultExt};
use tracing::{info, warn};

use crate::cluster::Cluster;

impl Cluster {
    /// Grow the data volumes to the declared size. Shrinking is never attempted.
    pub async fn sync_volumes(&self) -> Result<()> {
        let size = self.spec().volume.size.clone();
        let selector = self.selector();
        let volumes = &self.backends.volumes;
        let needed = volumes.needs_resize(&selector, &size).await.context("could not compare size of the volumes")?;
        if !needed {
            return Ok(());
        }
        volumes.resize(&selector, &size, &self.backends.resizers).await.context("could not sync volumes")?;
        info!(cluster = %self.name(), size = %size, "volumes have been synced");
        Ok(())
    }

    pub fn enforce_min_resource_limits(&mut self) -> Result<()> {
        let config = self.config.clone();
        let name = self.name().to_string();
        enforce_min_resource_limits(&name, &mut self.manifest.spec, &config)
    }
}

/// Raise declared limits below the operator floor. An unset limit stays unset.
pub fn enforce_min_resource_limits(cluster: &str, spec: &mut ClusterSpec, cfg: &OperatorConfig) -> Result<()> {
    let limits = &mut spec.resources.limits;
    if !limits.cpu.is_empty() {
        let have = parse_cpu_millis(&limits.cpu).with_context(|| format!("could not compare defined CPU limit {}", limits.cpu))?;
        let floor = parse_cpu_millis(&cfg.min_cpu_limit).context("could not parse minimum CPU limit")?;
        if have < floor {
            warn!(cluster, defined = %limits.cpu, min = %cfg.min_cpu_limit, "defined CPU limit is below required minimum, increasing it");
            limits.cpu = cfg.min_cpu_limit.clone();
        }
    }
    if !limits.memory.is_empty() {
        let have = parse_memory_bytes(&limits.memory).with_context(|| format!("could not compare defined memory limit {}", limits.memory))?;
        let floor = parse_memory_bytes(&cfg.min_memory_limit).context("could not parse minimum memory limit")?;
        if have < floor {
            warn!(cluster, defined = %limits.memory, min = %cfg.min_memory_limit, "defined memory limit is below required minimum, increasing it");
            limits.memory = cfg.min_memory_limit.clone();
        }
    }
    Ok(())
}
