//! Object store seam used by every reconciliation step.
//!
//! The reconciler never talks to the Kubernetes API directly; it receives an
//! [`ObjectStore`] at construction time. [`KubeStore`] is the production
//! implementation and [`MemoryStore`] an in-process one with API-server-like
//! semantics used by tests.

use std::fmt;

use async_trait::async_trait;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod kube_store;
pub mod memory;

pub use kube_store::KubeStore;
pub use memory::{MemoryStore, Verb};

/// Bound satisfied by every typed object the store can persist.
pub trait StoreObject:
    Resource<DynamicType = ()>
    + Clone
    + Serialize
    + DeserializeOwned
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + fmt::Debug
        + Send
        + Sync
        + 'static
{
}

/// Identity of an object: namespace (absent for cluster-scoped kinds) + name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }

    /// Key of an existing object, read from its metadata.
    pub fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: ObjectKey },
    #[error("{kind} {key} was modified concurrently: {message}")]
    Conflict {
        kind: String,
        key: ObjectKey,
        message: String,
    },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Synchronous-from-the-caller CRUD contract over typed objects.
///
/// `list` may be served from a cache and therefore lag behind `get`.
/// `update` enforces optimistic concurrency through the object's resource
/// version; `update_status` only persists the status portion.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get<K: StoreObject>(&self, key: &ObjectKey)
    -> Result<K, StoreError>;

    /// List objects of a kind, optionally within one namespace and filtered
    /// by an equality label selector (`k=v,k2=v2`, or a bare key for
    /// existence).
    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError>;

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;

    async fn update_status<K: StoreObject>(
        &self,
        obj: &K,
    ) -> Result<K, StoreError>;

    async fn delete<K: StoreObject>(
        &self,
        key: &ObjectKey,
    ) -> Result<(), StoreError>;
}

pub(crate) fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).to_string()
}

/// Parse a `k=v,k2` selector into (key, optional value) pairs.
pub(crate) fn parse_selector(selector: &str) -> Vec<(String, Option<String>)> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|term| match term.split_once('=') {
            Some((k, v)) => (
                k.trim_end_matches('=').trim().to_string(),
                Some(v.trim_start_matches('=').trim().to_string()),
            ),
            None => (term.to_string(), None),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_includes_namespace_only_when_present() {
        assert_eq!(ObjectKey::namespaced("ns", "a").to_string(), "ns/a");
        assert_eq!(ObjectKey::cluster("cluster").to_string(), "cluster");
    }

    #[test]
    fn selector_parsing_handles_existence_and_equality() {
        let terms = parse_selector("app=router, owner==edge ,marker");
        assert_eq!(
            terms,
            vec![
                ("app".to_string(), Some("router".to_string())),
                ("owner".to_string(), Some("edge".to_string())),
                ("marker".to_string(), None),
            ]
        );
    }
}
