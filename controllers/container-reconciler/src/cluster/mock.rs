//! In-memory `ClusterApi` for unit testing
//!
//! Stores objects in a map and records every call so tests can assert which
//! resource kinds a reconciliation touched and that idempotent paths issue
//! no writes.

use super::{ClusterApi, ResourceKind};
use crate::error::ClusterError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// API verb recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Replace,
    Patch,
    Delete,
}

impl Verb {
    pub fn is_mutating(self) -> bool {
        !matches!(self, Verb::Get | Verb::List)
    }
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCall {
    pub verb: Verb,
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

type ObjectKey = (ResourceKind, String, String);

#[derive(Debug, Default)]
struct MockState {
    objects: BTreeMap<ObjectKey, Value>,
    calls: Vec<ClusterCall>,
    next_version: u64,
    failures: Vec<(Verb, ResourceKind, Option<String>)>,
}

/// Mock cluster
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
}

fn scoped(kind: ResourceKind, namespace: &str) -> String {
    if kind.namespaced() {
        namespace.to_string()
    } else {
        String::new()
    }
}

/// RFC 7386 JSON merge patch
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            if let Some(target_map) = target.as_object_mut() {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn matches_selector(object: &Value, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    selector.split(',').filter(|s| !s.is_empty()).all(|term| {
        let (key, expected) = term.split_once('=').unwrap_or((term, ""));
        object
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(key))
            .and_then(Value::as_str)
            == Some(expected)
    })
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a call
    pub fn insert(&self, kind: ResourceKind, namespace: &str, mut object: Value) {
        let mut state = self.state.lock().unwrap();
        state.next_version += 1;
        let version = state.next_version.to_string();
        let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
        object["metadata"]["resourceVersion"] = Value::String(version);
        if kind.namespaced() {
            object["metadata"]["namespace"] = Value::String(namespace.to_string());
        }
        state.objects.insert((kind, scoped(kind, namespace), name), object);
    }

    /// Current stored object
    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(kind, scoped(kind, namespace), name.to_string()))
            .cloned()
    }

    /// Names of every stored object of a kind in a namespace
    pub fn names(&self, kind: ResourceKind, namespace: &str) -> Vec<String> {
        let namespace = scoped(kind, namespace);
        let state = self.state.lock().unwrap();
        state
            .objects
            .keys()
            .filter(|(k, ns, _)| *k == kind && *ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<ClusterCall> {
        self.calls().into_iter().filter(|c| c.verb.is_mutating()).collect()
    }

    /// Kinds touched by any call, in first-touch order
    pub fn touched_kinds(&self) -> Vec<ResourceKind> {
        let mut kinds = Vec::new();
        for call in self.calls() {
            if !kinds.contains(&call.kind) {
                kinds.push(call.kind);
            }
        }
        kinds
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Fail every `verb` on `kind`
    pub fn fail_on(&self, verb: Verb, kind: ResourceKind) {
        self.state.lock().unwrap().failures.push((verb, kind, None));
    }

    /// Fail `verb` on one named object
    pub fn fail_on_name(&self, verb: Verb, kind: ResourceKind, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((verb, kind, Some(name.to_string())));
    }

    fn record(&self, verb: Verb, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ClusterCall {
            verb,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        let injected = state
            .failures
            .iter()
            .any(|(v, k, n)| *v == verb && *k == kind && n.as_deref().is_none_or(|n| n == name));
        if injected {
            return Err(ClusterError::Api(format!(
                "injected {:?} failure for {} {}/{}",
                verb, kind, namespace, name
            )));
        }
        Ok(())
    }

    fn not_found(kind: ResourceKind, namespace: &str, name: &str) -> ClusterError {
        ClusterError::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ClusterApi for MockCluster {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Option<Value>, ClusterError> {
        self.record(Verb::Get, kind, namespace, name)?;
        Ok(self.object(kind, namespace, name))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>, ClusterError> {
        self.record(Verb::List, kind, namespace, "")?;
        let namespace = scoped(kind, namespace);
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), object)| *k == kind && *ns == namespace && matches_selector(object, label_selector))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, kind: ResourceKind, namespace: &str, object: &Value) -> Result<Value, ClusterError> {
        let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.record(Verb::Create, kind, namespace, &name)?;
        if self.object(kind, namespace, &name).is_some() {
            return Err(ClusterError::AlreadyExists {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name,
            });
        }
        self.insert(kind, namespace, object.clone());
        self.object(kind, namespace, &name)
            .ok_or_else(|| Self::not_found(kind, namespace, &name))
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        object: &Value,
    ) -> Result<Value, ClusterError> {
        self.record(Verb::Replace, kind, namespace, name)?;
        let live = self
            .object(kind, namespace, name)
            .ok_or_else(|| Self::not_found(kind, namespace, name))?;
        let sent = object.pointer("/metadata/resourceVersion");
        if sent.is_some() && sent != live.pointer("/metadata/resourceVersion") {
            return Err(ClusterError::Conflict {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        self.insert(kind, namespace, object.clone());
        self.object(kind, namespace, name)
            .ok_or_else(|| Self::not_found(kind, namespace, name))
    }

    async fn patch(&self, kind: ResourceKind, namespace: &str, name: &str, patch: &Value) -> Result<Value, ClusterError> {
        self.record(Verb::Patch, kind, namespace, name)?;
        let mut live = self
            .object(kind, namespace, name)
            .ok_or_else(|| Self::not_found(kind, namespace, name))?;
        merge_patch(&mut live, patch);
        self.insert(kind, namespace, live);
        self.object(kind, namespace, name)
            .ok_or_else(|| Self::not_found(kind, namespace, name))
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        self.record(Verb::Delete, kind, namespace, name)?;
        let mut state = self.state.lock().unwrap();
        Ok(state
            .objects
            .remove(&(kind, scoped(kind, namespace), name.to_string()))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::delete_if_exists;
    use serde_json::json;

    #[test]
    fn test_merge_patch() {
        let mut target = json!({"spec": {"status": "Running", "keep": 1}, "drop": true});
        merge_patch(&mut target, &json!({"spec": {"status": "Cancelled"}, "drop": null}));
        assert_eq!(target, json!({"spec": {"status": "Cancelled", "keep": 1}}));
    }

    #[tokio::test]
    async fn test_replace_detects_stale_version() {
        let cluster = MockCluster::new();
        cluster.insert(ResourceKind::ConfigMap, "ns", json!({"metadata": {"name": "cm"}}));
        let live = cluster.get(ResourceKind::ConfigMap, "ns", "cm").await.unwrap().unwrap();
        cluster
            .replace(ResourceKind::ConfigMap, "ns", "cm", &live)
            .await
            .unwrap();
        let stale = cluster.replace(ResourceKind::ConfigMap, "ns", "cm", &live).await;
        assert!(matches!(stale, Err(ClusterError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_delete_if_exists_skips_absent() {
        let cluster = MockCluster::new();
        assert!(!delete_if_exists(&cluster, ResourceKind::Service, "ns", "svc").await.unwrap());
        assert!(cluster.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_by_label() {
        let cluster = MockCluster::new();
        cluster.insert(
            ResourceKind::PersistentVolumeClaim,
            "ns",
            json!({"metadata": {"name": "a", "labels": {"app": "web"}}}),
        );
        cluster.insert(
            ResourceKind::PersistentVolumeClaim,
            "ns",
            json!({"metadata": {"name": "b", "labels": {"app": "db"}}}),
        );
        let found = cluster
            .list(ResourceKind::PersistentVolumeClaim, "ns", Some("app=web"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["metadata"]["name"], "a");
    }
}
