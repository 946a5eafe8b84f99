//! Statefulset comparison. Three outcomes on mismatch: in-place update, in-place update
//! that needs the pods recreated, or replace (the field is immutable on a statefulset).

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use keel_core::quantity::same_quantity;
use keel_core::ROLLING_UPDATE_ANNOTATION;

use crate::{declared_keys_differ, Comparison};

/// The rolling-update flag is bookkeeping of the engine itself, never a reason to update.
fn owned_annotations(annotations: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    let mut a = annotations.cloned().unwrap_or_default();
    a.remove(ROLLING_UPDATE_ANNOTATION);
    a
}

/// A field the desired definition leaves unset is defaulted by the API server or owned by
/// someone else.
fn declared_matches<T: PartialEq>(live: &Option<T>, desired: &Option<T>) -> bool {
    desired.is_none() || live == desired
}

pub fn compare(live: &StatefulSet, desired: &StatefulSet) -> Comparison {
    let mut cmp = Comparison::matched();
    let (Some(ls), Some(ds)) = (live.spec.as_ref(), desired.spec.as_ref()) else {
        cmp.replace("statefulset has no spec");
        return cmp;
    };

    if ls.replicas.unwrap_or(1) != ds.replicas.unwrap_or(1) {
        cmp.update(format!("new statefulset's number of replicas ({}) does not match the current one ({})", ds.replicas.unwrap_or(1), ls.replicas.unwrap_or(1)));
    }
    let owned = owned_annotations(desired.metadata.annotations.as_ref());
    let changed = declared_keys_differ(live.metadata.annotations.as_ref(), Some(&owned));
    if !changed.is_empty() {
        cmp.update(format!("new statefulset's annotations do not match the current one: changed {}", changed.join(", ")));
    }

    if ls.selector != ds.selector {
        cmp.replace("new statefulset's selector does not match the current one");
    }
    if ls.service_name != ds.service_name {
        cmp.replace("new statefulset's serviceName does not match the current one");
    }
    if ls.pod_management_policy.as_deref().unwrap_or("OrderedReady") != ds.pod_management_policy.as_deref().unwrap_or("OrderedReady") {
        cmp.replace("new statefulset's pod management policy does not match the current one");
    }
    compare_volume_claims(ls.volume_claim_templates.as_deref().unwrap_or_default(), ds.volume_claim_templates.as_deref().unwrap_or_default(), &mut cmp);

    let (lt, dt) = (&ls.template, &ds.template);
    if lt.metadata.as_ref().and_then(|m| m.labels.as_ref()) != dt.metadata.as_ref().and_then(|m| m.labels.as_ref()) {
        cmp.replace("new statefulset's metadata labels do not match the current one");
        cmp.rolling_update = true;
    }
    if !declared_keys_differ(lt.metadata.as_ref().and_then(|m| m.annotations.as_ref()), dt.metadata.as_ref().and_then(|m| m.annotations.as_ref())).is_empty() {
        cmp.replace("new statefulset's pod template metadata annotations do not match the current one");
        cmp.rolling_update = true;
    }

    let (lp, dp) = (lt.spec.clone().unwrap_or_default(), dt.spec.clone().unwrap_or_default());
    if !declared_matches(&lp.service_account_name, &dp.service_account_name) {
        cmp.replace("new statefulset's serviceAccountName does not match the current one");
        cmp.rolling_update = true;
    }
    if !declared_matches(&lp.termination_grace_period_seconds, &dp.termination_grace_period_seconds) {
        cmp.replace("new statefulset's terminationGracePeriodSeconds does not match the current one");
        cmp.rolling_update = true;
    }
    if !declared_matches(&lp.tolerations, &dp.tolerations) {
        cmp.replace("new statefulset's tolerations do not match the current one");
        cmp.rolling_update = true;
    }
    if lp.containers.len() != dp.containers.len() {
        cmp.replace("new statefulset's container specification does not match the current one");
        cmp.rolling_update = true;
    } else {
        for (l, d) in lp.containers.iter().zip(dp.containers.iter()) {
            compare_container(l, d, &mut cmp);
        }
    }
    cmp
}

fn compare_volume_claims(live: &[PersistentVolumeClaim], desired: &[PersistentVolumeClaim], cmp: &mut Comparison) {
    if live.len() != desired.len() {
        cmp.replace("new statefulset's volumeClaimTemplates contains a different number of volumes");
        return;
    }
    for (l, d) in live.iter().zip(desired.iter()) {
        let name = d.metadata.name.clone().unwrap_or_default();
        if l.metadata.name != d.metadata.name {
            cmp.replace(format!("new statefulset's volumeClaimTemplates renames a volume to {:?}", name));
            continue;
        }
        let (lspec, dspec) = (l.spec.clone().unwrap_or_default(), d.spec.clone().unwrap_or_default());
        let storage = |s: &k8s_openapi::api::core::v1::PersistentVolumeClaimSpec| {
            s.resources.as_ref().and_then(|r| r.requests.as_ref()).and_then(|r| r.get("storage")).map(|q| q.0.clone()).unwrap_or_default()
        };
        if !same_quantity("storage", &storage(&lspec), &storage(&dspec)) {
            cmp.replace(format!("new statefulset's volumeClaimTemplates for volume {:?} requests a different size", name));
        }
        if dspec.storage_class_name.is_some() && lspec.storage_class_name != dspec.storage_class_name {
            cmp.replace(format!("new statefulset's volumeClaimTemplates for volume {:?} uses a different storage class", name));
        }
    }
}

fn compare_container(live: &Container, desired: &Container, cmp: &mut Comparison) {
    let name = &desired.name;
    if live.name != desired.name {
        cmp.rolling(format!("new statefulset's container {:?} has a different name than the current one", name));
    }
    if live.image != desired.image {
        cmp.rolling(format!("new statefulset's container {:?} image does not match the current one", name));
    }
    if live.ports != desired.ports {
        cmp.rolling(format!("new statefulset's container {:?} ports do not match the current one", name));
    }
    if !same_resources(live.resources.as_ref(), desired.resources.as_ref()) {
        cmp.rolling(format!("new statefulset's container {:?} resources do not match the current one", name));
    }
    if live.env != desired.env {
        cmp.rolling(format!("new statefulset's container {:?} environment does not match the current one", name));
    }
}

fn same_quantities(a: Option<&BTreeMap<String, Quantity>>, b: Option<&BTreeMap<String, Quantity>>) -> bool {
    let empty = BTreeMap::new();
    let (a, b) = (a.unwrap_or(&empty), b.unwrap_or(&empty));
    a.len() == b.len() && a.iter().all(|(k, q)| b.get(k).map(|o| same_quantity(k, &q.0, &o.0)).unwrap_or(false))
}

/// Resource requirements compared numerically: `1000m` equals `1`, `1024Mi` equals `1Gi`.
pub fn same_resources(a: Option<&ResourceRequirements>, b: Option<&ResourceRequirements>) -> bool {
    same_quantities(a.and_then(|r| r.requests.as_ref()), b.and_then(|r| r.requests.as_ref()))
        && same_quantities(a.and_then(|r| r.limits.as_ref()), b.and_then(|r| r.limits.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, VolumeResourceRequirements};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

    fn sts(replicas: i32, image: &str, cpu: &str, size: &str) -> StatefulSet {
        let labels: BTreeMap<String, String> = [("cluster-name".to_string(), "acid".to_string())].into_iter().collect();
        let res = |q: &str| [("cpu".to_string(), Quantity(q.to_string()))].into_iter().collect::<BTreeMap<_, _>>();
        StatefulSet {
            metadata: ObjectMeta { name: Some("acid".into()), ..Default::default() },
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
                service_name: "acid".into(),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "postgres".into(),
                            image: Some(image.into()),
                            resources: Some(ResourceRequirements { requests: Some(res(cpu)), limits: Some(res(cpu)), ..Default::default() }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                volume_claim_templates: Some(vec![PersistentVolumeClaim {
                    metadata: ObjectMeta { name: Some("pgdata".into()), ..Default::default() },
                    spec: Some(PersistentVolumeClaimSpec {
                        resources: Some(VolumeResourceRequirements {
                            requests: Some([("storage".to_string(), Quantity(size.into()))].into_iter().collect()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn equivalent_quantities_match() {
        let cmp = compare(&sts(2, "spilo-16", "1", "1Gi"), &sts(2, "spilo-16", "1000m", "1024Mi"));
        assert!(cmp.matched, "{}", cmp.reason());
    }

    #[test]
    fn replica_change_is_a_plain_update() {
        let cmp = compare(&sts(2, "spilo-16", "1", "1Gi"), &sts(3, "spilo-16", "1", "1Gi"));
        assert!(!cmp.matched);
        assert!(!cmp.structural_change());
    }

    #[test]
    fn image_change_needs_rolling_update() {
        let cmp = compare(&sts(2, "spilo-15", "1", "1Gi"), &sts(2, "spilo-16", "1", "1Gi"));
        assert!(!cmp.matched && cmp.rolling_update && !cmp.replace);
    }

    #[test]
    fn volume_template_change_needs_replace() {
        let cmp = compare(&sts(2, "spilo-16", "1", "1Gi"), &sts(2, "spilo-16", "1", "5Gi"));
        assert!(!cmp.matched && cmp.replace);
    }

    #[test]
    fn rolling_annotation_is_ignored() {
        let live = sts(2, "spilo-16", "1", "1Gi");
        let mut desired = live.clone();
        desired.metadata.annotations = Some([(ROLLING_UPDATE_ANNOTATION.to_string(), "structural-change".to_string())].into_iter().collect());
        assert!(compare(&live, &desired).matched);
    }

    #[test]
    fn foreign_and_defaulted_fields_are_ignored() {
        let desired = sts(2, "spilo-16", "1", "1Gi");
        let mut live = desired.clone();
        live.metadata.annotations = Some([("example.org/owner".to_string(), "team-a".to_string())].into_iter().collect());
        let template = &mut live.spec.as_mut().unwrap().template;
        template.metadata.as_mut().unwrap().annotations =
            Some([("kubectl.kubernetes.io/restartedAt".to_string(), "2026-01-01T00:00:00Z".to_string())].into_iter().collect());
        template.spec.as_mut().unwrap().termination_grace_period_seconds = Some(30);
        let cmp = compare(&live, &desired);
        assert!(cmp.matched, "{}", cmp.reason());

        let mut desired = desired;
        desired.metadata.annotations = Some([("example.org/owner".to_string(), "team-b".to_string())].into_iter().collect());
        let cmp = compare(&live, &desired);
        assert!(!cmp.matched && !cmp.structural_change());
        assert!(cmp.reason().contains("example.org/owner"), "{}", cmp.reason());
    }
}
