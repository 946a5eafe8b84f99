//! In-memory `ResourceStore` with a call log and failure injection, used to drive the
//! reconcilers without a cluster.

use std::collections::BTreeMap;
use std::sync::Mutex;

use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value as Json};

use crate::store::{DeletePolicy, ResourceStore, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Patch,
    Delete,
}

impl StoreOp {
    pub fn is_mutation(self) -> bool { !matches!(self, StoreOp::Get) }
}

struct Inner<K> {
    objects: BTreeMap<String, K>,
    calls: Vec<(StoreOp, String)>,
    rv: u64,
    race_winner: Option<K>,
    fail_next: Option<(StoreOp, StoreError)>,
}

pub struct MemStore<K> {
    inner: Mutex<Inner<K>>,
}

impl<K> Default for MemStore<K> {
    fn default() -> Self {
        Self { inner: Mutex::new(Inner { objects: BTreeMap::new(), calls: Vec::new(), rv: 0, race_winner: None, fail_next: None }) }
    }
}

fn name_of<K: Resource>(obj: &K) -> StoreResult<String> {
    obj.meta().name.clone().ok_or_else(|| StoreError::Other("object without metadata.name".into()))
}

impl<K> MemStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned,
{
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K>> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert without recording a call. Assigns a resourceVersion.
    pub fn seed(&self, mut obj: K) {
        let mut g = self.lock();
        g.rv += 1;
        obj.meta_mut().resource_version = Some(g.rv.to_string());
        if let Some(name) = obj.meta().name.clone() {
            g.objects.insert(name, obj);
        }
    }

    /// Remove without recording a call, as if someone else deleted it.
    pub fn evict(&self, name: &str) -> Option<K> { self.lock().objects.remove(name) }

    pub fn object(&self, name: &str) -> Option<K> { self.lock().objects.get(name).cloned() }
    pub fn len(&self) -> usize { self.lock().objects.len() }
    pub fn is_empty(&self) -> bool { self.lock().objects.is_empty() }
    pub fn calls(&self) -> Vec<(StoreOp, String)> { self.lock().calls.clone() }
    pub fn count(&self, op: StoreOp) -> usize { self.lock().calls.iter().filter(|(o, _)| *o == op).count() }
    pub fn mutations(&self) -> usize { self.lock().calls.iter().filter(|(o, _)| o.is_mutation()).count() }
    pub fn clear_calls(&self) { self.lock().calls.clear() }

    /// The next `create` loses a race: `winner` appears in the store and the caller
    /// gets `AlreadyExists`.
    pub fn race_next_create(&self, winner: K) { self.lock().race_winner = Some(winner); }

    /// The next call of kind `op` fails with `err`.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) { self.lock().fail_next = Some((op, err)); }

    fn enter(&self, g: &mut Inner<K>, op: StoreOp, name: &str) -> StoreResult<()> {
        g.calls.push((op, name.to_string()));
        match g.fail_next.take() {
            Some((o, e)) if o == op => Err(e),
            other => {
                g.fail_next = other;
                Ok(())
            }
        }
    }

    fn stamp(g: &mut Inner<K>, obj: &mut K) {
        g.rv += 1;
        obj.meta_mut().resource_version = Some(g.rv.to_string());
    }
}

#[async_trait::async_trait]
impl<K> ResourceStore<K> for MemStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> StoreResult<K> {
        let mut g = self.lock();
        self.enter(&mut g, StoreOp::Get, name)?;
        g.objects.get(name).cloned().ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn create(&self, obj: &K) -> StoreResult<K> {
        let name = name_of(obj)?;
        let mut g = self.lock();
        self.enter(&mut g, StoreOp::Create, &name)?;
        if let Some(mut winner) = g.race_winner.take() {
            Self::stamp(&mut g, &mut winner);
            g.objects.insert(name.clone(), winner);
            return Err(StoreError::AlreadyExists(name));
        }
        if g.objects.contains_key(&name) {
            return Err(StoreError::AlreadyExists(name));
        }
        let mut stored = obj.clone();
        let uid = format!("mem-{}", g.rv + 1);
        stored.meta_mut().uid = Some(uid);
        Self::stamp(&mut g, &mut stored);
        g.objects.insert(name, stored.clone());
        Ok(stored)
    }

    async fn update(&self, obj: &K) -> StoreResult<K> {
        let name = name_of(obj)?;
        let mut g = self.lock();
        self.enter(&mut g, StoreOp::Update, &name)?;
        let live_rv = match g.objects.get(&name) {
            Some(live) => live.meta().resource_version.clone(),
            None => return Err(StoreError::NotFound(name)),
        };
        if let Some(rv) = &obj.meta().resource_version {
            if Some(rv) != live_rv.as_ref() {
                return Err(StoreError::Other(format!("conflict updating {}: resourceVersion {} is stale", name, rv)));
            }
        }
        let mut stored = obj.clone();
        Self::stamp(&mut g, &mut stored);
        g.objects.insert(name, stored.clone());
        Ok(stored)
    }

    async fn patch(&self, name: &str, delta: &Json) -> StoreResult<K> {
        let mut g = self.lock();
        self.enter(&mut g, StoreOp::Patch, name)?;
        let live = g.objects.get(name).cloned().ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let mut doc = serde_json::to_value(&live).map_err(|e| StoreError::Other(e.to_string()))?;
        merge_patch(&mut doc, delta);
        let mut patched: K = serde_json::from_value(doc).map_err(|e| StoreError::Other(format!("invalid patch for {}: {}", name, e)))?;
        Self::stamp(&mut g, &mut patched);
        g.objects.insert(name.to_string(), patched.clone());
        Ok(patched)
    }

    async fn delete(&self, name: &str, _policy: DeletePolicy) -> StoreResult<()> {
        let mut g = self.lock();
        self.enter(&mut g, StoreOp::Delete, name)?;
        g.objects.remove(name).map(|_| ()).ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

/// RFC 7386 JSON merge patch: objects merge recursively, `null` removes, anything else replaces.
pub fn merge_patch(target: &mut Json, patch: &Json) {
    let Json::Object(p) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Json::Object(Map::new());
    }
    if let Some(t) = target.as_object_mut() {
        for (k, v) in p {
            if v.is_null() {
                t.remove(k);
            } else {
                merge_patch(t.entry(k.clone()).or_insert(Json::Null), v);
            }
        }
    }
}
