use kube::ResourceExt;
use tracing::info;

use super::ControllerContext;
use super::errors::ReconcileError;
use crate::crd::IngressController;
use crate::store::{ObjectKey, ObjectStore};

/// Guard token keeping an IngressController around until its router is torn
/// down.
pub const INGRESS_CONTROLLER_FINALIZER: &str =
    "ingresscontroller.operator.openshift.io/finalizer-ingresscontroller";

pub fn has_finalizer(ic: &IngressController) -> bool {
    ic.finalizers()
        .iter()
        .any(|f| f == INGRESS_CONTROLLER_FINALIZER)
}

pub struct FinalizerManager<S> {
    ctx: ControllerContext<S>,
}

impl<S: ObjectStore> FinalizerManager<S> {
    pub fn new(ctx: ControllerContext<S>) -> Self {
        Self { ctx }
    }

    /// Add the finalizer unless present. Terminating objects are left alone.
    pub async fn ensure(
        &self,
        ic: &mut IngressController,
    ) -> Result<(), ReconcileError> {
        if ic.is_terminating() || has_finalizer(ic) {
            return Ok(());
        }
        let key = ObjectKey::of(ic);
        let mut updated = ic.clone();
        updated
            .finalizers_mut()
            .push(INGRESS_CONTROLLER_FINALIZER.to_string());
        *ic = self.ctx.store.update(&updated).await.map_err(|e| {
            ReconcileError::store(
                format!("add finalizer to ingresscontroller {}", key),
                e,
            )
        })?;
        info!(ns = %ic.namespace().unwrap_or_default(), name = %ic.name_any(), "enforced finalizer");
        Ok(())
    }

    pub async fn remove(
        &self,
        ic: &mut IngressController,
    ) -> Result<(), ReconcileError> {
        if !has_finalizer(ic) {
            return Ok(());
        }
        let key = ObjectKey::of(ic);
        let mut updated = ic.clone();
        updated
            .finalizers_mut()
            .retain(|f| f != INGRESS_CONTROLLER_FINALIZER);
        *ic = self.ctx.store.update(&updated).await.map_err(|e| {
            ReconcileError::store(
                format!("remove finalizer from ingresscontroller {}", key),
                e,
            )
        })?;
        info!(ns = %ic.namespace().unwrap_or_default(), name = %ic.name_any(), "removed finalizer");
        Ok(())
    }
}
