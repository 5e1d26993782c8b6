use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use tracing::{info, instrument};

use super::ControllerContext;
use super::errors::ReconcileError;
use super::events::{EventKind, REASON_DELETED, REASON_FINALIZED};
use super::finalizer::FinalizerManager;
use crate::crd::{DNSRecord, IngressController};
use crate::store::{ObjectKey, ObjectStore, StoreObject, kind_of};
use crate::templates::{
    OWNING_INGRESS_CONTROLLER_LABEL, load_balancer_service_name,
    router_deployment_name,
};

/// Delete an object, treating "already gone" as success. Returns whether a
/// delete was issued against an existing object.
pub(crate) async fn delete_if_present<S, K>(
    store: &S,
    key: &ObjectKey,
) -> Result<bool, ReconcileError>
where
    S: ObjectStore,
    K: StoreObject,
{
    match store.delete::<K>(key).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(ReconcileError::store(
            format!("delete {} {}", kind_of::<K>().to_lowercase(), key),
            e,
        )),
    }
}

/// Tears a terminating IngressController down: load balancer exposure and
/// DNS first, then the router deployment, then the finalizer.
pub struct DeletionSequencer<S> {
    ctx: ControllerContext<S>,
    finalizers: FinalizerManager<S>,
}

impl<S: ObjectStore> DeletionSequencer<S> {
    pub fn new(ctx: ControllerContext<S>) -> Self {
        Self {
            finalizers: FinalizerManager::new(ctx.clone()),
            ctx,
        }
    }

    fn router_key(&self, name: &str) -> (ObjectKey, ObjectKey) {
        let ns = self.ctx.cfg.router_namespace.as_str();
        (
            ObjectKey::namespaced(ns, &load_balancer_service_name(name)),
            ObjectKey::namespaced(ns, &router_deployment_name(name)),
        )
    }

    /// Delete the load balancer service and wait for the cloud provider to
    /// release it before removing DNS records that point at its address.
    async fn finalize_load_balancer(
        &self,
        ic: &IngressController,
    ) -> Result<(), ReconcileError> {
        let store = self.ctx.store.as_ref();
        let name = ic.name_any();
        let (lb_key, _) = self.router_key(&name);

        if delete_if_present::<_, Service>(store, &lb_key).await? {
            info!(service = %lb_key, "deleted load balancer service");
        }
        match store.get::<Service>(&lb_key).await {
            Ok(_) => {
                return Err(ReconcileError::LoadBalancerPending(
                    lb_key.to_string(),
                ));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(ReconcileError::store(
                    format!("get service {}", lb_key),
                    e,
                ));
            }
        }

        let selector = format!("{}={}", OWNING_INGRESS_CONTROLLER_LABEL, name);
        let records = store
            .list::<DNSRecord>(
                Some(self.ctx.cfg.router_namespace.as_str()),
                Some(&selector),
            )
            .await
            .map_err(|e| ReconcileError::store("list dnsrecords", e))?;
        for record in records {
            let key = ObjectKey::of(&record);
            if delete_if_present::<_, DNSRecord>(store, &key).await? {
                info!(record = %key, "deleted dns record");
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(name = %ic.name_any()))]
    pub async fn finalize(
        &self,
        ic: &mut IngressController,
    ) -> Result<(), ReconcileError> {
        if !ic.is_terminating() {
            return Ok(());
        }
        let name = ic.name_any();
        let oref = ic.object_ref(&());

        self.finalize_load_balancer(ic).await?;
        info!("finalized load balancer service");

        let (_, dep_key) = self.router_key(&name);
        if delete_if_present::<_, Deployment>(self.ctx.store.as_ref(), &dep_key)
            .await?
        {
            self.ctx
                .recorder
                .record(
                    &oref,
                    EventKind::Normal,
                    REASON_DELETED,
                    format!("deleted router deployment {}", dep_key),
                )
                .await;
        }
        info!(deployment = %dep_key, "deleted router deployment");

        self.finalizers.remove(ic).await?;
        self.ctx
            .recorder
            .record(
                &oref,
                EventKind::Normal,
                REASON_FINALIZED,
                "released ingresscontroller".to_string(),
            )
            .await;
        Ok(())
    }
}
