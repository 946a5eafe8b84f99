//! Desired definitions for every resource the engine owns. Pure: derived from the cluster
//! identity, a spec and the operator config only.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Endpoints, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
    ResourceRequirements, Secret, Service, ServicePort, ServiceSpec, VolumeResourceRequirements,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use keel_core::spec::Resources;
use keel_core::{ClusterSpec, Error, PgUser, PostgresRole, Result, POSTGRES_CONTAINER};
use kube::api::ObjectMeta;
use serde_json::json;

use crate::cluster::{Cluster, POSTGRES_PORT};

pub const DEFAULT_PG_VERSION: &str = "16";
const PATRONI_API_PORT: i32 = 8008;

fn meta(name: String, cluster: &Cluster, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta { name: Some(name), namespace: Some(cluster.namespace().to_string()), labels: Some(labels), ..Default::default() }
}

fn postgres_port() -> ServicePort {
    ServicePort { name: Some("postgresql".into()), port: POSTGRES_PORT, protocol: Some("TCP".into()), ..Default::default() }
}

fn load_balancer(spec: &ClusterSpec, role: PostgresRole) -> bool {
    match role {
        PostgresRole::Primary => spec.enable_master_load_balancer,
        PostgresRole::Replica => spec.enable_replica_load_balancer,
    }
}

/// The primary service has no selector: Patroni maintains its endpoint.
pub fn service(cluster: &Cluster, spec: &ClusterSpec, role: PostgresRole) -> Service {
    let lb = load_balancer(spec, role);
    Service {
        metadata: meta(cluster.service_name(role), cluster, cluster.role_labels(role)),
        spec: Some(ServiceSpec {
            type_: Some(if lb { "LoadBalancer" } else { "ClusterIP" }.to_string()),
            ports: Some(vec![postgres_port()]),
            selector: match role {
                PostgresRole::Primary => None,
                PostgresRole::Replica => Some(cluster.role_labels(role)),
            },
            load_balancer_source_ranges: (lb && !spec.allowed_source_ranges.is_empty()).then(|| spec.allowed_source_ranges.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn endpoint(cluster: &Cluster, role: PostgresRole) -> Endpoints {
    Endpoints { metadata: meta(cluster.endpoint_name(role), cluster, cluster.role_labels(role)), subsets: None }
}

pub fn pod_disruption_budget(cluster: &Cluster, spec: &ClusterSpec) -> PodDisruptionBudget {
    let min_available = if spec.number_of_instances() > 0 { 1 } else { 0 };
    PodDisruptionBudget {
        metadata: meta(cluster.pdb_name(), cluster, cluster.labels()),
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(min_available)),
            selector: Some(LabelSelector { match_labels: Some(cluster.role_labels(PostgresRole::Primary)), ..Default::default() }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn secret(cluster: &Cluster, user: &PgUser) -> Secret {
    let data: BTreeMap<String, ByteString> = [
        ("username".to_string(), ByteString(user.name.as_bytes().to_vec())),
        ("password".to_string(), ByteString(user.password.as_bytes().to_vec())),
    ]
    .into_iter()
    .collect();
    Secret {
        metadata: meta(cluster.secret_name(&user.name), cluster, cluster.labels()),
        type_: Some("Opaque".into()),
        data: Some(data),
        ..Default::default()
    }
}

/// Digits and dots only; empty means the default major version.
pub fn validate_version(version: &str) -> Result<String> {
    if version.is_empty() {
        return Ok(DEFAULT_PG_VERSION.to_string());
    }
    let ok = version.split('.').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if ok { Ok(version.to_string()) } else { Err(Error::Validation(format!("invalid postgres version {:?}", version))) }
}

fn quantities(cpu: &str, memory: &str) -> Option<BTreeMap<String, Quantity>> {
    let mut m = BTreeMap::new();
    if !cpu.is_empty() {
        m.insert("cpu".to_string(), Quantity(cpu.to_string()));
    }
    if !memory.is_empty() {
        m.insert("memory".to_string(), Quantity(memory.to_string()));
    }
    (!m.is_empty()).then_some(m)
}

pub fn resource_requirements(r: &Resources) -> ResourceRequirements {
    ResourceRequirements {
        requests: quantities(&r.requests.cpu, &r.requests.memory),
        limits: quantities(&r.limits.cpu, &r.limits.memory),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar { EnvVar { name: name.into(), value: Some(value.into()), ..Default::default() } }

pub fn statefulset(cluster: &Cluster, spec: &ClusterSpec) -> Result<StatefulSet> {
    let version = validate_version(&spec.postgresql.version)?;
    let spilo = json!({
        "postgresql": { "parameters": spec.postgresql.parameters },
        "bootstrap": { "dcs": { "postgresql": { "parameters": spec.postgresql.parameters } } },
    });
    let labels = cluster.labels();
    let container = Container {
        name: POSTGRES_CONTAINER.into(),
        image: Some(cluster.config.docker_image.clone()),
        ports: Some(vec![
            ContainerPort { container_port: POSTGRES_PORT, protocol: Some("TCP".into()), ..Default::default() },
            ContainerPort { container_port: PATRONI_API_PORT, protocol: Some("TCP".into()), ..Default::default() },
        ]),
        env: Some(vec![env("PGVERSION", version), env("SCOPE", cluster.name()), env("SPILO_CONFIGURATION", spilo.to_string())]),
        resources: Some(resource_requirements(&spec.resources)),
        ..Default::default()
    };
    let claim = PersistentVolumeClaim {
        metadata: ObjectMeta { name: Some("pgdata".into()), ..Default::default() },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            resources: Some(VolumeResourceRequirements {
                requests: (!spec.volume.size.is_empty())
                    .then(|| [("storage".to_string(), Quantity(spec.volume.size.clone()))].into_iter().collect()),
                ..Default::default()
            }),
            storage_class_name: spec.volume.storage_class.clone(),
            ..Default::default()
        }),
        ..Default::default()
    };
    Ok(StatefulSet {
        metadata: meta(cluster.statefulset_name(), cluster, labels.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(spec.number_of_instances()),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            service_name: cluster.service_name(PostgresRole::Primary),
            pod_management_policy: Some("OrderedReady".into()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: Some(PodSpec { containers: vec![container], ..Default::default() }),
            },
            volume_claim_templates: Some(vec![claim]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn backup_job(cluster: &Cluster, spec: &ClusterSpec) -> CronJob {
    let schedule = spec.logical_backup_schedule.clone().filter(|s| !s.is_empty()).unwrap_or_else(|| cluster.config.logical_backup_schedule.clone());
    let container = Container {
        name: "logical-backup".into(),
        image: Some(cluster.config.logical_backup_image.clone()),
        env: Some(vec![
            env("SCOPE", cluster.name()),
            env("PGHOST", cluster.service_name(PostgresRole::Primary)),
            env("PGPORT", POSTGRES_PORT.to_string()),
            env("PGUSER", cluster.config.superuser_name.clone()),
        ]),
        ..Default::default()
    };
    CronJob {
        metadata: meta(cluster.backup_job_name(), cluster, cluster.labels()),
        spec: Some(CronJobSpec {
            schedule,
            concurrency_policy: Some("Forbid".into()),
            job_template: JobTemplateSpec {
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta { labels: Some(cluster.labels()), ..Default::default() }),
                        spec: Some(PodSpec { containers: vec![container], restart_policy: Some("Never".into()), ..Default::default() }),
                    },
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pool_deployment(cluster: &Cluster, spec: &ClusterSpec) -> Deployment {
    let pool = spec.connection_pool.clone().unwrap_or_default();
    let defaults = &cluster.config.connection_pool;
    let (schema, user) = cluster.pool_schema_and_user(spec);
    let image = if pool.docker_image.is_empty() { defaults.image.clone() } else { pool.docker_image.clone() };
    let mode = if pool.mode.is_empty() { defaults.mode.clone() } else { pool.mode.clone() };
    let resources = if pool.resources.is_empty() {
        keel_apply::pooler::default_resources(defaults)
    } else {
        resource_requirements(&pool.resources)
    };
    let labels = cluster.pool_labels();
    let container = Container {
        name: "connection-pool".into(),
        image: Some(image),
        ports: Some(vec![ContainerPort { container_port: POSTGRES_PORT, protocol: Some("TCP".into()), ..Default::default() }]),
        env: Some(vec![
            env("PGHOST", cluster.service_name(PostgresRole::Primary)),
            env("PGPORT", POSTGRES_PORT.to_string()),
            env("PGUSER", user),
            env("PGSCHEMA", schema),
            env("CONNECTION_POOL_MODE", mode),
            env("CONNECTION_POOL_MAX_DB_CONN", pool.max_db_connections.unwrap_or(defaults.max_db_connections).to_string()),
        ]),
        resources: Some(resources),
        ..Default::default()
    };
    Deployment {
        metadata: meta(cluster.pool_name(), cluster, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(pool.number_of_instances.unwrap_or(defaults.number_of_instances)),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: Some(PodSpec { containers: vec![container], ..Default::default() }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pool_service(cluster: &Cluster) -> Service {
    let labels = cluster.pool_labels();
    Service {
        metadata: meta(cluster.pool_name(), cluster, labels.clone()),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            ports: Some(vec![postgres_port()]),
            selector: Some(labels),
            ..Default::default()
        }),
        ..Default::default()
    }
}
