//! Comparators for the simple kinds: services, disruption budgets, the logical backup cron job.

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Container, Service, ServicePort};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;

use crate::{declared_keys_differ, Comparison};

fn port_key(p: &ServicePort) -> (Option<&str>, i32, &str) {
    (p.name.as_deref(), p.port, p.protocol.as_deref().unwrap_or("TCP"))
}

pub fn same_service(live: &Service, desired: &Service) -> Comparison {
    let mut cmp = Comparison::matched();
    let (ls, ds) = (live.spec.clone().unwrap_or_default(), desired.spec.clone().unwrap_or_default());

    let (lt, dt) = (ls.type_.as_deref().unwrap_or("ClusterIP"), ds.type_.as_deref().unwrap_or("ClusterIP"));
    if lt != dt {
        cmp.update(format!("new service's type {:?} does not match the current one {:?}", dt, lt));
    }
    let lports: Vec<_> = ls.ports.iter().flatten().map(port_key).collect();
    let dports: Vec<_> = ds.ports.iter().flatten().map(port_key).collect();
    if lports != dports {
        cmp.update("new service's ports do not match the current ones");
    }
    // the primary service has no selector: its endpoint is maintained by Patroni
    match (ls.selector, ds.selector) {
        (Some(l), None) if !l.is_empty() => cmp.remove(&["spec", "selector"], "new service has no selector but the current one does"),
        (l, Some(d)) if l.as_ref() != Some(&d) => cmp.update("new service's selector does not match the current one"),
        _ => {}
    }
    // a load balancer service without source ranges is open to everyone
    if dt == "LoadBalancer" && ls.load_balancer_source_ranges.unwrap_or_default() != ds.load_balancer_source_ranges.unwrap_or_default() {
        cmp.update("new service's LoadBalancerSourceRange does not match the current one");
    }
    let changed = declared_keys_differ(live.metadata.annotations.as_ref(), desired.metadata.annotations.as_ref());
    if !changed.is_empty() {
        cmp.update(format!("new service's annotations do not match the current one: changed {}", changed.join(", ")));
    }
    cmp
}

/// Budgets are never patched; any mismatch is a replace.
pub fn same_pdb(live: &PodDisruptionBudget, desired: &PodDisruptionBudget) -> Comparison {
    let mut cmp = Comparison::matched();
    let (ls, ds) = (live.spec.clone().unwrap_or_default(), desired.spec.clone().unwrap_or_default());
    if ls.min_available != ds.min_available {
        cmp.replace("new PodDisruptionBudget's minAvailable does not match the current one");
    }
    if ls.selector != ds.selector {
        cmp.replace("new PodDisruptionBudget's selector does not match the current one");
    }
    cmp
}

fn backup_container(job: &CronJob) -> Option<&Container> {
    job.spec.as_ref()?.job_template.spec.as_ref()?.template.spec.as_ref()?.containers.first()
}

pub fn same_backup_job(live: &CronJob, desired: &CronJob) -> Comparison {
    let mut cmp = Comparison::matched();
    let schedule = |j: &CronJob| j.spec.as_ref().map(|s| s.schedule.clone()).unwrap_or_default();
    let (ls, ds) = (schedule(live), schedule(desired));
    if ls != ds {
        cmp.update(format!("new job's schedule {:?} does not match the current one {:?}", ds, ls));
    }
    let image = |j: &CronJob| backup_container(j).and_then(|c| c.image.clone()).unwrap_or_default();
    let (li, di) = (image(live), image(desired));
    if li != di {
        cmp.update(format!("new job's image {:?} does not match the current one {:?}", di, li));
    }
    cmp
}
