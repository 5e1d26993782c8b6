use kube::{Resource, ResourceExt};
use tracing::{info, instrument};

use super::ControllerContext;
use super::errors::ReconcileError;
use super::events::{EventKind, REASON_STRATEGY_PUBLISHED};
use crate::crd::{
    EndpointPublishingStrategy, EndpointPublishingStrategyType, Infrastructure,
    IngressController, PlatformType,
};
use crate::store::{ObjectKey, ObjectStore};

/// Default exposure for a platform. Platforms without a cloud load balancer
/// fall back to host networking.
pub fn strategy_for_platform(
    platform: Option<PlatformType>,
) -> EndpointPublishingStrategyType {
    match platform {
        Some(
            PlatformType::AWS
            | PlatformType::Azure
            | PlatformType::GCP
            | PlatformType::IBMCloud
            | PlatformType::PowerVS
            | PlatformType::AlibabaCloud,
        ) => EndpointPublishingStrategyType::LoadBalancerService,
        _ => EndpointPublishingStrategyType::HostNetwork,
    }
}

pub struct EndpointStrategyEnforcer<S> {
    ctx: ControllerContext<S>,
}

impl<S: ObjectStore> EndpointStrategyEnforcer<S> {
    pub fn new(ctx: ControllerContext<S>) -> Self {
        Self { ctx }
    }

    /// Publish `status.endpointPublishingStrategy` once: the spec value
    /// verbatim when given, the platform default otherwise.
    #[instrument(skip_all, fields(name = %ic.name_any()))]
    pub async fn enforce(
        &self,
        ic: &mut IngressController,
        infra: &Infrastructure,
    ) -> Result<(), ReconcileError> {
        if ic.status_strategy().is_some() {
            return Ok(());
        }

        let strategy = match &ic.spec.endpoint_publishing_strategy {
            Some(s) => s.clone(),
            None => EndpointPublishingStrategy::of(strategy_for_platform(
                infra.platform(),
            )),
        };
        let mut updated = ic.clone();
        updated
            .status
            .get_or_insert_with(Default::default)
            .endpoint_publishing_strategy = Some(strategy.clone());

        let key = ObjectKey::of(ic);
        self.ctx.store.update_status(&updated).await.map_err(|e| {
            ReconcileError::store(
                format!("update status of ingresscontroller {}", key),
                e,
            )
        })?;
        *ic = self.ctx.store.get(&key).await.map_err(|e| {
            ReconcileError::store(format!("get ingresscontroller {}", key), e)
        })?;

        info!(strategy = %strategy.type_, "published endpoint publishing strategy");
        self.ctx
            .recorder
            .record(
                &ic.object_ref(&()),
                EventKind::Normal,
                REASON_STRATEGY_PUBLISHED,
                format!("published endpoint publishing strategy {}", strategy.type_),
            )
            .await;
        Ok(())
    }
}
