use tracing::{info, instrument};

use super::ControllerContext;
use super::errors::ReconcileError;
use crate::store::{ObjectKey, ObjectStore, StoreObject, kind_of};
use crate::templates::{
    router_cluster_role, router_cluster_role_binding, router_namespace,
    router_service_account,
};

/// Get `desired` by key and create it when absent. Returns the persisted
/// object and whether this call created it. Existing objects are left as is.
pub(crate) async fn ensure_exists<S, K>(
    store: &S,
    desired: &K,
) -> Result<(K, bool), ReconcileError>
where
    S: ObjectStore,
    K: StoreObject,
{
    let key = ObjectKey::of(desired);
    let kind = kind_of::<K>().to_lowercase();
    match store.get::<K>(&key).await {
        Ok(existing) => Ok((existing, false)),
        Err(e) if e.is_not_found() => match store.create(desired).await {
            Ok(created) => {
                info!(%kind, %key, "created");
                Ok((created, true))
            }
            // lost a race with another writer; theirs is as good as ours
            Err(e) if e.is_already_exists() => store
                .get::<K>(&key)
                .await
                .map(|existing| (existing, false))
                .map_err(|e| {
                    ReconcileError::store(format!("get {} {}", kind, key), e)
                }),
            Err(e) => Err(ReconcileError::store(
                format!("create {} {}", kind, key),
                e,
            )),
        },
        Err(e) => Err(ReconcileError::store(format!("get {} {}", kind, key), e)),
    }
}

/// Cluster-wide objects every router instance depends on.
pub struct ResourceEnsurer<S> {
    ctx: ControllerContext<S>,
}

impl<S: ObjectStore> ResourceEnsurer<S> {
    pub fn new(ctx: ControllerContext<S>) -> Self {
        Self { ctx }
    }

    /// Ensure the router cluster role, namespace, service account and
    /// cluster role binding exist, in that order. Stops at the first failure
    /// since later objects live in or refer to earlier ones.
    #[instrument(skip_all)]
    pub async fn ensure_router_namespace(&self) -> Result<(), ReconcileError> {
        let store = self.ctx.store.as_ref();
        let ns = self.ctx.cfg.router_namespace.as_str();
        ensure_exists(store, &router_cluster_role()).await?;
        ensure_exists(store, &router_namespace(ns)).await?;
        ensure_exists(store, &router_service_account(ns)).await?;
        ensure_exists(store, &router_cluster_role_binding(ns)).await?;
        Ok(())
    }
}
