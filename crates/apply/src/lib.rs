//! Keel apply: pure comparators deciding whether a live resource matches its desired
//! definition, and how a mismatch has to be applied.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

pub mod pooler;
pub mod service;
pub mod statefulset;

pub use service::{same_backup_job, same_pdb, same_service};

/// Outcome of comparing a live resource against its desired definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub matched: bool,
    /// The changed fields cannot be mutated in place; delete and recreate.
    pub replace: bool,
    /// Running members must be recreated to pick up the change.
    pub rolling_update: bool,
    pub reasons: Vec<String>,
    /// Paths set on the live object that the desired one leaves out on purpose. A merge
    /// patch only drops them when it carries an explicit `null`.
    pub removals: Vec<&'static [&'static str]>,
}

impl Default for Comparison {
    fn default() -> Self { Self { matched: true, replace: false, rolling_update: false, reasons: Vec::new(), removals: Vec::new() } }
}

impl Comparison {
    pub fn matched() -> Self { Self::default() }

    pub fn update(&mut self, reason: impl Into<String>) {
        self.matched = false;
        self.reasons.push(reason.into());
    }

    pub fn replace(&mut self, reason: impl Into<String>) {
        self.replace = true;
        self.update(reason);
    }

    pub fn rolling(&mut self, reason: impl Into<String>) {
        self.rolling_update = true;
        self.update(reason);
    }

    pub fn remove(&mut self, path: &'static [&'static str], reason: impl Into<String>) {
        self.removals.push(path);
        self.update(reason);
    }

    pub fn structural_change(&self) -> bool { self.replace || self.rolling_update }

    pub fn reason(&self) -> String { self.reasons.join("; ") }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

/// Keys of `desired` whose value differs on `live`. Keys only `live` carries belong to
/// someone else and are not compared.
pub fn declared_keys_differ<'a>(live: Option<&BTreeMap<String, String>>, desired: Option<&'a BTreeMap<String, String>>) -> Vec<&'a str> {
    let Some(desired) = desired else { return Vec::new() };
    desired.iter().filter(|(k, v)| live.and_then(|l| l.get(k.as_str())) != Some(*v)).map(|(k, _)| k.as_str()).collect()
}

/// Write a `null` at each path so that a merge patch removes the field.
pub fn with_removals(mut delta: Json, removals: &[&[&str]]) -> Json {
    fn null_at(target: &mut Json, path: &[&str]) {
        let Some((first, rest)) = path.split_first() else { return };
        if !target.is_object() {
            *target = Json::Object(Map::new());
        }
        let Some(obj) = target.as_object_mut() else { return };
        if rest.is_empty() {
            obj.insert(first.to_string(), Json::Null);
        } else {
            null_at(obj.entry(first.to_string()).or_insert_with(|| Json::Object(Map::new())), rest);
        }
    }
    for path in removals {
        null_at(&mut delta, path);
    }
    delta
}

/// Drop server-populated fields before diffing.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(obj) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        obj.remove("managedFields");
        obj.remove("resourceVersion");
        obj.remove("generation");
        obj.remove("creationTimestamp");
        obj.remove("uid");
    }
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
    v
}

pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                s.updates += aa.iter().zip(bb.iter()).filter(|(x, y)| x != y).count();
                if aa.len() > bb.len() { s.adds += aa.len() - bb.len(); }
                if bb.len() > aa.len() { s.removes += bb.len() - aa.len(); }
            }
            (av, bv) => { if av != bv { s.updates += 1; } }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}

/// Field-level change counts between a live object and its desired replacement.
pub fn change_summary<K: Serialize>(live: &K, desired: &K) -> DiffSummary {
    let live = serde_json::to_value(live).map(strip_noisy).unwrap_or(Json::Null);
    let desired = serde_json::to_value(desired).map(strip_noisy).unwrap_or(Json::Null);
    diff_summary(&desired, &live)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_noisy_prunes_server_fields() {
        let v = serde_json::json!({
            "metadata": { "name": "x", "managedFields": [], "resourceVersion": "1", "uid": "u", "generation": 2 },
            "status": { "replicas": 2 },
            "spec": { "replicas": 2 }
        });
        let pruned = strip_noisy(v);
        assert_eq!(pruned, serde_json::json!({ "metadata": { "name": "x" }, "spec": { "replicas": 2 } }));
    }

    #[test]
    fn diff_summary_counts_adds_updates_removes() {
        let base = serde_json::json!({ "a": 1, "b": { "x": 1 }, "c": [1, 2, 3] });
        let target = serde_json::json!({ "a": 2, "b": { "x": 1, "y": 2 }, "c": [1, 9], "d": true });
        let s = diff_summary(&target, &base);
        assert_eq!(s, DiffSummary { adds: 2, updates: 2, removes: 1 });
    }

    #[test]
    fn removals_become_nulls() {
        let delta = serde_json::json!({ "spec": { "type": "ClusterIP" } });
        let out = with_removals(delta, &[&["spec", "selector"], &["metadata", "annotations", "x"]]);
        assert_eq!(out, serde_json::json!({
            "spec": { "type": "ClusterIP", "selector": null },
            "metadata": { "annotations": { "x": null } }
        }));
    }

    #[test]
    fn only_declared_keys_are_compared() {
        let live: BTreeMap<String, String> = [("a", "1"), ("foreign", "x")].iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let desired: BTreeMap<String, String> = [("a", "1")].iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        assert!(declared_keys_differ(Some(&live), Some(&desired)).is_empty());
        assert!(declared_keys_differ(Some(&live), None).is_empty());
        let desired: BTreeMap<String, String> = [("a", "2")].iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        assert_eq!(declared_keys_differ(Some(&live), Some(&desired)), vec!["a"]);
    }

    #[test]
    fn comparison_accumulates_reasons() {
        let mut c = Comparison::matched();
        assert!(c.matched && !c.structural_change());
        c.update("replicas differ");
        c.rolling("image differs");
        assert!(!c.matched && c.rolling_update && !c.replace);
        assert_eq!(c.reason(), "replicas differ; image differs");
    }
}
