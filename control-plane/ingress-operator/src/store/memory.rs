//! In-process [`ObjectStore`] with the API server behaviors the reconciler
//! depends on: resource versions, a status subresource, finalizer-aware
//! deletion and owner-reference garbage collection.
//!
//! It also records every call and can inject failures, which makes it the
//! backbone of the reconciler tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use super::{
    ObjectKey, ObjectStore, StoreError, StoreObject, kind_of, parse_selector,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

#[derive(Clone, Debug)]
struct Fault {
    verb: Verb,
    kind: String,
    /// `None` fails forever
    remaining: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub key: ObjectKey,
}

/// (kind, namespace, name)
type Slot = (String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Slot, Value>,
    resource_version: u64,
    uid_seq: u64,
    calls: Vec<Call>,
    faults: Vec<Fault>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn slot(kind: &str, key: &ObjectKey) -> Slot {
    (kind.to_string(), key.namespace.clone(), key.name.clone())
}

fn key_of_value(value: &Value) -> ObjectKey {
    let meta = &value["metadata"];
    ObjectKey {
        namespace: meta["namespace"].as_str().map(str::to_string),
        name: meta["name"].as_str().unwrap_or_default().to_string(),
    }
}

fn resource_version(value: &Value) -> Option<&str> {
    value["metadata"]["resourceVersion"].as_str()
}

fn has_finalizers(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .map(|f| !f.is_empty())
        .unwrap_or(false)
}

fn labels_match(value: &Value, selector: &[(String, Option<String>)]) -> bool {
    let labels = &value["metadata"]["labels"];
    selector.iter().all(|(k, v)| match (labels.get(k), v) {
        (Some(actual), Some(expected)) => actual.as_str() == Some(expected),
        (Some(_), None) => true,
        (None, _) => false,
    })
}

fn owned_by(value: &Value, uid: &str) -> bool {
    value["metadata"]["ownerReferences"]
        .as_array()
        .map(|refs| refs.iter().any(|r| r["uid"].as_str() == Some(uid)))
        .unwrap_or(false)
}

impl State {
    fn record(&mut self, verb: Verb, kind: &str, key: &ObjectKey) {
        self.calls.push(Call {
            verb,
            kind: kind.to_string(),
            key: key.clone(),
        });
    }

    fn check_fault(&mut self, verb: Verb, kind: &str) -> Result<(), StoreError> {
        let Some(idx) = self
            .faults
            .iter()
            .position(|f| f.verb == verb && f.kind == kind)
        else {
            return Ok(());
        };
        let exhausted = match self.faults[idx].remaining.as_mut() {
            Some(n) => {
                *n -= 1;
                *n == 0
            }
            None => false,
        };
        if exhausted {
            self.faults.remove(idx);
        }
        Err(StoreError::Timeout(format!(
            "injected {:?} failure for {}",
            verb, kind
        )))
    }

    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn stamp_new(&mut self, value: &mut Value) {
        let rv = self.next_version();
        let meta = &mut value["metadata"];
        if meta["uid"].as_str().is_none() {
            self.uid_seq += 1;
            meta["uid"] = json!(format!("uid-{:04}", self.uid_seq));
        }
        meta["resourceVersion"] = json!(rv);
        meta["creationTimestamp"] = json!(now());
        meta["generation"] = json!(1);
    }

    fn check_version(
        &self,
        kind: &str,
        key: &ObjectKey,
        stored: &Value,
        incoming: &Value,
    ) -> Result<(), StoreError> {
        match resource_version(incoming) {
            Some(rv) if Some(rv) != resource_version(stored) => {
                Err(StoreError::Conflict {
                    kind: kind.to_string(),
                    key: key.clone(),
                    message: format!(
                        "resource version {} is stale (current {})",
                        rv,
                        resource_version(stored).unwrap_or("none")
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Delete with API server semantics: objects carrying finalizers are only
    /// marked; removed objects take their owner-referenced dependents along.
    fn delete_slot(&mut self, slot: &Slot) {
        let Some(value) = self.objects.get_mut(slot) else {
            return;
        };
        if has_finalizers(value) {
            if value["metadata"]["deletionTimestamp"].is_null() {
                value["metadata"]["deletionTimestamp"] = json!(now());
                let rv = self.next_version();
                if let Some(value) = self.objects.get_mut(slot) {
                    value["metadata"]["resourceVersion"] = json!(rv);
                }
            }
            return;
        }
        if let Some(removed) = self.objects.remove(slot) {
            if let Some(uid) = removed["metadata"]["uid"].as_str() {
                let dependents: Vec<Slot> = self
                    .objects
                    .iter()
                    .filter(|(_, v)| owned_by(v, uid))
                    .map(|(s, _)| s.clone())
                    .collect();
                for dep in dependents {
                    self.delete_slot(&dep);
                }
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, status included, without recording a call.
    pub async fn insert<K: StoreObject>(
        &self,
        obj: &K,
    ) -> Result<K, StoreError> {
        let mut value = serde_json::to_value(obj)?;
        let key = key_of_value(&value);
        let mut state = self.state.write().await;
        state.stamp_new(&mut value);
        state
            .objects
            .insert(slot(&kind_of::<K>(), &key), value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Read an object without recording a call.
    pub async fn fetch<K: StoreObject>(&self, key: &ObjectKey) -> Option<K> {
        let state = self.state.read().await;
        state
            .objects
            .get(&slot(&kind_of::<K>(), key))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub async fn all<K: StoreObject>(&self) -> Vec<K> {
        let kind = kind_of::<K>();
        let state = self.state.read().await;
        state
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    /// Number of recorded calls of `verb` against kind `K`.
    pub async fn count<K: StoreObject>(&self, verb: Verb) -> usize {
        let kind = kind_of::<K>();
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.verb == verb && c.kind == kind)
            .count()
    }

    /// Number of recorded calls of `verb` against any kind.
    pub async fn count_verb(&self, verb: Verb) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.verb == verb)
            .count()
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.read().await.calls.clone()
    }

    pub async fn reset_calls(&self) {
        self.state.write().await.calls.clear();
    }

    /// Fail every `verb` call against kind `K` until cleared.
    pub async fn fail<K: StoreObject>(&self, verb: Verb) {
        self.state.write().await.faults.push(Fault {
            verb,
            kind: kind_of::<K>(),
            remaining: None,
        });
    }

    /// Fail the next `times` `verb` calls against kind `K`.
    pub async fn fail_times<K: StoreObject>(&self, verb: Verb, times: usize) {
        if times == 0 {
            return;
        }
        self.state.write().await.faults.push(Fault {
            verb,
            kind: kind_of::<K>(),
            remaining: Some(times),
        });
    }

    pub async fn clear_faults(&self) {
        self.state.write().await.faults.clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreObject>(
        &self,
        key: &ObjectKey,
    ) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let mut state = self.state.write().await;
        state.record(Verb::Get, &kind, key);
        state.check_fault(Verb::Get, &kind)?;
        match state.objects.get(&slot(&kind, key)) {
            Some(v) => Ok(serde_json::from_value(v.clone())?),
            None => Err(StoreError::NotFound {
                kind,
                key: key.clone(),
            }),
        }
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        let kind = kind_of::<K>();
        let selector = label_selector.map(parse_selector).unwrap_or_default();
        let mut state = self.state.write().await;
        let scope = ObjectKey {
            namespace: namespace.map(str::to_string),
            name: String::new(),
        };
        state.record(Verb::List, &kind, &scope);
        state.check_fault(Verb::List, &kind)?;
        state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| {
                *k == kind
                    && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .filter(|(_, v)| labels_match(v, &selector))
            .map(|(_, v)| {
                serde_json::from_value(v.clone()).map_err(StoreError::from)
            })
            .collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let mut value = serde_json::to_value(obj)?;
        let key = key_of_value(&value);
        let mut state = self.state.write().await;
        state.record(Verb::Create, &kind, &key);
        state.check_fault(Verb::Create, &kind)?;
        let slot = slot(&kind, &key);
        if state.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists { kind, key });
        }
        // status is not accepted on create when a status subresource exists
        if let Some(map) = value.as_object_mut() {
            map.remove("status");
        }
        if let Some(meta) = value["metadata"].as_object_mut() {
            meta.remove("resourceVersion");
            meta.remove("deletionTimestamp");
        }
        state.stamp_new(&mut value);
        state.objects.insert(slot, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let mut value = serde_json::to_value(obj)?;
        let key = key_of_value(&value);
        let mut state = self.state.write().await;
        state.record(Verb::Update, &kind, &key);
        state.check_fault(Verb::Update, &kind)?;
        let slot = slot(&kind, &key);
        let Some(stored) = state.objects.get(&slot).cloned() else {
            return Err(StoreError::NotFound { kind, key });
        };
        state.check_version(&kind, &key, &stored, &value)?;

        // the main resource ignores status and server-owned metadata
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            let server = stored["metadata"][field].clone();
            if let Some(meta) = value["metadata"].as_object_mut() {
                if server.is_null() {
                    meta.remove(field);
                } else {
                    meta.insert(field.to_string(), server);
                }
            }
        }
        let rv = state.next_version();
        value["metadata"]["resourceVersion"] = json!(rv);
        let released = !value["metadata"]["deletionTimestamp"].is_null()
            && !has_finalizers(&value);
        state.objects.insert(slot.clone(), value.clone());
        if released {
            state.delete_slot(&slot);
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<K: StoreObject>(
        &self,
        obj: &K,
    ) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let value = serde_json::to_value(obj)?;
        let key = key_of_value(&value);
        let mut state = self.state.write().await;
        state.record(Verb::UpdateStatus, &kind, &key);
        state.check_fault(Verb::UpdateStatus, &kind)?;
        let slot = slot(&kind, &key);
        let Some(mut stored) = state.objects.get(&slot).cloned() else {
            return Err(StoreError::NotFound { kind, key });
        };
        state.check_version(&kind, &key, &stored, &value)?;
        match value.get("status") {
            Some(status) => stored["status"] = status.clone(),
            None => {
                if let Some(map) = stored.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        let rv = state.next_version();
        stored["metadata"]["resourceVersion"] = json!(rv);
        state.objects.insert(slot, stored.clone());
        Ok(serde_json::from_value(stored)?)
    }

    async fn delete<K: StoreObject>(
        &self,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        let kind = kind_of::<K>();
        let mut state = self.state.write().await;
        state.record(Verb::Delete, &kind, key);
        state.check_fault(Verb::Delete, &kind)?;
        let slot = slot(&kind, key);
        if !state.objects.contains_key(&slot) {
            return Err(StoreError::NotFound {
                kind,
                key: key.clone(),
            });
        }
        state.delete_slot(&slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ns".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let store = MemoryStore::new();
        store.create(&config_map("a")).await.unwrap();
        let err = store.create(&config_map("a")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.count::<ConfigMap>(Verb::Create).await, 2);
    }

    #[tokio::test]
    async fn stale_update_is_a_conflict() {
        let store = MemoryStore::new();
        let first = store.create(&config_map("a")).await.unwrap();
        let mut second = first.clone();
        second.data = Some([("k".to_string(), "v".to_string())].into());
        store.update(&second).await.unwrap();

        let err = store.update(&first).await.unwrap_err();
        assert!(err.is_conflict(), "{err}");
    }

    #[tokio::test]
    async fn finalizers_hold_deletion_until_released() {
        let store = MemoryStore::new();
        let mut cm = config_map("guarded");
        cm.metadata.finalizers = Some(vec!["example.com/guard".into()]);
        store.create(&cm).await.unwrap();
        let key = ObjectKey::namespaced("ns", "guarded");

        store.delete::<ConfigMap>(&key).await.unwrap();
        let mut marked: ConfigMap = store.get(&key).await.unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        marked.metadata.finalizers = Some(vec![]);
        store.update(&marked).await.unwrap();
        assert!(store.fetch::<ConfigMap>(&key).await.is_none());
    }

    #[tokio::test]
    async fn deleting_an_owner_collects_dependents() {
        let store = MemoryStore::new();
        let dep = store
            .create(&Deployment {
                metadata: ObjectMeta {
                    name: Some("router".into()),
                    namespace: Some("ns".into()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("stats".into()),
                namespace: Some("ns".into()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".into(),
                    kind: "Deployment".into(),
                    name: "router".into(),
                    uid: dep.metadata.uid.clone().unwrap(),
                    controller: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        };
        store.create(&secret).await.unwrap();

        store
            .delete::<Deployment>(&ObjectKey::namespaced("ns", "router"))
            .await
            .unwrap();
        assert!(
            store
                .fetch::<Secret>(&ObjectKey::namespaced("ns", "stats"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn injected_faults_expire() {
        let store = MemoryStore::new();
        store.fail_times::<ConfigMap>(Verb::Create, 1).await;
        assert!(store.create(&config_map("a")).await.is_err());
        assert!(store.create(&config_map("a")).await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        let mut labeled = config_map("labeled");
        labeled.metadata.labels =
            Some([("owner".to_string(), "edge".to_string())].into());
        store.create(&labeled).await.unwrap();
        store.create(&config_map("plain")).await.unwrap();

        let all: Vec<ConfigMap> = store.list(Some("ns"), None).await.unwrap();
        assert_eq!(all.len(), 2);
        let owned: Vec<ConfigMap> =
            store.list(Some("ns"), Some("owner=edge")).await.unwrap();
        assert_eq!(owned.len(), 1);
        let other_ns: Vec<ConfigMap> =
            store.list(Some("other"), None).await.unwrap();
        assert!(other_ns.is_empty());
    }
}
