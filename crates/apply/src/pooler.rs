//! Connection pooler deployment: a spec-driven diff (old vs new pool section) and a
//! defaults diff (live deployment vs operator defaults for fields the spec leaves unset).

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use keel_core::{ConnectionPool, ConnectionPoolConfig};
use serde_json::Value as Json;

use crate::statefulset::same_resources;
use crate::Comparison;

pub fn spec_sync(old: Option<&ConnectionPool>, new: Option<&ConnectionPool>) -> Comparison {
    let mut cmp = Comparison::matched();
    let as_map = |p: Option<&ConnectionPool>| match serde_json::to_value(p.cloned().unwrap_or_default()) {
        Ok(Json::Object(m)) => m,
        _ => serde_json::Map::new(),
    };
    let (old, new) = (as_map(old), as_map(new));
    for (k, v) in new.iter() {
        if old.get(k) != Some(v) {
            cmp.update(format!("connectionPool.{} changed", k));
        }
    }
    cmp
}

pub fn default_resources(cfg: &ConnectionPoolConfig) -> ResourceRequirements {
    let q = |cpu: &str, mem: &str| -> BTreeMap<String, Quantity> {
        [("cpu".to_string(), Quantity(cpu.to_string())), ("memory".to_string(), Quantity(mem.to_string()))].into_iter().collect()
    };
    ResourceRequirements {
        requests: Some(q(&cfg.default_cpu_request, &cfg.default_memory_request)),
        limits: Some(q(&cfg.default_cpu_limit, &cfg.default_memory_limit)),
        ..Default::default()
    }
}

pub fn defaults_sync(new: Option<&ConnectionPool>, cfg: &ConnectionPoolConfig, deployment: &Deployment) -> Comparison {
    let mut cmp = Comparison::matched();
    let pool = new.cloned().unwrap_or_default();
    let spec = deployment.spec.clone().unwrap_or_default();
    let container = spec.template.spec.as_ref().and_then(|p| p.containers.first());

    if pool.number_of_instances.is_none() && spec.replicas != Some(cfg.number_of_instances) {
        cmp.update(format!("number of instances {:?} is different (expected {})", spec.replicas, cfg.number_of_instances));
    }
    let image = container.and_then(|c| c.image.clone()).unwrap_or_default();
    if pool.docker_image.is_empty() && image != cfg.image {
        cmp.update(format!("docker image {:?} is different (expected {:?})", image, cfg.image));
    }
    if pool.resources.is_empty() && !same_resources(container.and_then(|c| c.resources.as_ref()), Some(&default_resources(cfg))) {
        cmp.update("resources are different from the operator defaults");
    }
    cmp
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

    fn deployment(replicas: i32, image: &str, cfg: &ConnectionPoolConfig) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "connection-pool".into(),
                            image: Some(image.into()),
                            resources: Some(default_resources(cfg)),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn unchanged_pool_section_needs_no_sync() {
        let p = ConnectionPool { mode: "session".into(), ..Default::default() };
        assert!(spec_sync(Some(&p), Some(&p)).matched);
        assert!(spec_sync(None, None).matched);
    }

    #[test]
    fn changed_fields_are_named() {
        let old = ConnectionPool::default();
        let new = ConnectionPool { number_of_instances: Some(3), ..Default::default() };
        let cmp = spec_sync(Some(&old), Some(&new));
        assert_eq!(cmp.reasons, vec!["connectionPool.numberOfInstances changed".to_string()]);
    }

    #[test]
    fn defaults_only_apply_to_unset_fields() {
        let cfg = ConnectionPoolConfig::default();
        assert!(defaults_sync(None, &cfg, &deployment(cfg.number_of_instances, &cfg.image, &cfg)).matched);

        let drifted = deployment(5, "pgbouncer:old", &cfg);
        assert_eq!(defaults_sync(None, &cfg, &drifted).reasons.len(), 2);

        let pinned = ConnectionPool { number_of_instances: Some(5), docker_image: "pgbouncer:old".into(), ..Default::default() };
        assert!(defaults_sync(Some(&pinned), &cfg, &drifted).matched);
    }
}
