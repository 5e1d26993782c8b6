use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use super::{ObjectKey, ObjectStore, StoreError, StoreObject, kind_of};

const FIELD_MANAGER: &str = "ingress-operator";

/// [`ObjectStore`] backed by the Kubernetes API.
///
/// Typed objects are erased to [`DynamicObject`] so one code path serves both
/// namespaced and cluster-scoped kinds. Lists are served from the API server
/// watch cache (`resourceVersion=0`) and may therefore be stale.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = ApiResource::erase::<K>(&());
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn from_dynamic<K: DeserializeOwned>(
    obj: DynamicObject,
) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn map_err(err: kube::Error, kind: String, key: &ObjectKey) -> StoreError {
    match err {
        kube::Error::Api(ae) => match ae.code {
            404 => StoreError::NotFound {
                kind,
                key: key.clone(),
            },
            409 if ae.reason == "AlreadyExists" => StoreError::AlreadyExists {
                kind,
                key: key.clone(),
            },
            409 => StoreError::Conflict {
                kind,
                key: key.clone(),
                message: ae.message,
            },
            408 | 504 => StoreError::Timeout(ae.message),
            _ => StoreError::Api(format!("{} ({})", ae.message, ae.code)),
        },
        other => StoreError::Api(other.to_string()),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(
        &self,
        key: &ObjectKey,
    ) -> Result<K, StoreError> {
        trace!(kind = %kind_of::<K>(), %key, "store: get");
        let obj = self
            .api::<K>(key.namespace.as_deref())
            .get(&key.name)
            .await
            .map_err(|e| map_err(e, kind_of::<K>(), key))?;
        from_dynamic(obj)
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        trace!(kind = %kind_of::<K>(), ?namespace, ?label_selector, "store: list");
        let mut lp = ListParams::default().match_any();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        let key = ObjectKey {
            namespace: namespace.map(str::to_string),
            name: String::new(),
        };
        let list = self
            .api::<K>(namespace)
            .list(&lp)
            .await
            .map_err(|e| map_err(e, kind_of::<K>(), &key))?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        trace!(kind = %kind_of::<K>(), %key, "store: create");
        let created = self
            .api::<K>(key.namespace.as_deref())
            .create(&Self::post_params(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_err(e, kind_of::<K>(), &key))?;
        from_dynamic(created)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        trace!(kind = %kind_of::<K>(), %key, rv = ?obj.resource_version(), "store: update");
        let updated = self
            .api::<K>(key.namespace.as_deref())
            .replace(&key.name, &Self::post_params(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_err(e, kind_of::<K>(), &key))?;
        from_dynamic(updated)
    }

    async fn update_status<K: StoreObject>(
        &self,
        obj: &K,
    ) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        trace!(kind = %kind_of::<K>(), %key, rv = ?obj.resource_version(), "store: update_status");
        let body = serde_json::to_vec(&to_dynamic(obj)?)?;
        let updated = self
            .api::<K>(key.namespace.as_deref())
            .replace_status(&key.name, &Self::post_params(), body)
            .await
            .map_err(|e| map_err(e, kind_of::<K>(), &key))?;
        from_dynamic(updated)
    }

    async fn delete<K: StoreObject>(
        &self,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        trace!(kind = %kind_of::<K>(), %key, "store: delete");
        self.api::<K>(key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
            .map_err(|e| map_err(e, kind_of::<K>(), key))?;
        Ok(())
    }
}
