use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::ControllerContext;
use super::deletion::DeletionSequencer;
use super::domain::DomainEnforcer;
use super::ensure::DependentResourceEnsurer;
use super::errors::{AggregateError, ReconcileError};
use super::finalizer::FinalizerManager;
use super::scaffolding::ResourceEnsurer;
use super::status::StatusSyncer;
use super::strategy::EndpointStrategyEnforcer;
use crate::crd::{
    CLUSTER_CONFIG_NAME, DNS, Infrastructure, Ingress, IngressController,
};
use crate::store::{ObjectKey, ObjectStore, StoreObject, kind_of};

/// Result of one pass: an optional scheduled re-check and the combined error.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
    pub result: Result<(), ReconcileError>,
}

impl ReconcileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// The three cluster singletons enforcement depends on.
struct ClusterConfig {
    dns: DNS,
    infra: Infrastructure,
    ingress: Ingress,
}

/// Sequences every step of an IngressController pass, gates dependent
/// steps on their prerequisites and aggregates failures.
pub struct Reconciler<S> {
    ctx: ControllerContext<S>,
    scaffolding: ResourceEnsurer<S>,
    domain: DomainEnforcer<S>,
    strategy: EndpointStrategyEnforcer<S>,
    finalizers: FinalizerManager<S>,
    deletion: DeletionSequencer<S>,
    dependents: DependentResourceEnsurer<S>,
    status: StatusSyncer<S>,
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(ctx: ControllerContext<S>) -> Self {
        Self {
            scaffolding: ResourceEnsurer::new(ctx.clone()),
            domain: DomainEnforcer::new(ctx.clone()),
            strategy: EndpointStrategyEnforcer::new(ctx.clone()),
            finalizers: FinalizerManager::new(ctx.clone()),
            deletion: DeletionSequencer::new(ctx.clone()),
            dependents: DependentResourceEnsurer::new(ctx.clone()),
            status: StatusSyncer::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &ControllerContext<S> {
        &self.ctx
    }

    async fn get_config<K: StoreObject>(&self) -> Result<K, ReconcileError> {
        let key = ObjectKey::cluster(CLUSTER_CONFIG_NAME);
        self.ctx.store.get::<K>(&key).await.map_err(|e| {
            ReconcileError::ConfigurationIncomplete(format!(
                "failed to get {} '{}': {}",
                kind_of::<K>().to_lowercase(),
                CLUSTER_CONFIG_NAME,
                e
            ))
        })
    }

    async fn cluster_config(
        &self,
        errs: &mut AggregateError,
    ) -> Option<ClusterConfig> {
        let dns = errs.collect(self.get_config::<DNS>().await);
        let infra = errs.collect(self.get_config::<Infrastructure>().await);
        let ingress = errs.collect(self.get_config::<Ingress>().await);
        Some(ClusterConfig {
            dns: dns?,
            infra: infra?,
            ingress: ingress?,
        })
    }

    /// Everything between config fetch and status sync. Returns the
    /// requested re-check delay, if any.
    async fn enforce(
        &self,
        ic: &mut IngressController,
        config: &ClusterConfig,
        errs: &mut AggregateError,
    ) -> Option<Duration> {
        errs.collect(self.scaffolding.ensure_router_namespace().await);

        if let Err(e) = self.domain.enforce(ic, &config.ingress).await {
            errs.push(e);
            return None;
        }
        if !ic.is_status_domain_set() {
            debug!("domain not published; skipping remaining enforcement");
            return None;
        }
        if let Err(e) = self.strategy.enforce(ic, &config.infra).await {
            errs.push(e);
            return None;
        }

        if ic.is_terminating() {
            errs.collect(self.deletion.finalize(ic).await);
            return None;
        }
        if let Err(e) = self.finalizers.ensure(ic).await {
            errs.push(e);
            return None;
        }
        let ensured =
            errs.collect(self.dependents.ensure(ic, &config.dns).await)?;
        ensured
            .awaiting_address
            .then(|| self.ctx.cfg.lb_poll_interval())
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome {
        info!("reconciling");
        let mut errs = AggregateError::new();
        let mut requeue_after = None;

        let mut primary =
            match self.ctx.store.get::<IngressController>(key).await {
                Ok(ic) => Some(ic),
                Err(e) if e.is_not_found() => {
                    info!("ingresscontroller not found; skipping");
                    None
                }
                Err(e) => {
                    errs.push(ReconcileError::store(
                        format!("get ingresscontroller {}", key),
                        e,
                    ));
                    None
                }
            };

        if let Some(ic) = primary.as_mut() {
            match self.cluster_config(&mut errs).await {
                Some(config) => {
                    requeue_after = self.enforce(ic, &config, &mut errs).await;
                }
                None => warn!("cluster configuration incomplete; deferring"),
            }
            errs.collect(self.status.sync_ingress_controller(ic).await);
        }

        let operator = self.status.sync_operator_status(&errs).await;
        errs.collect(operator);

        let result = errs.into_result();
        if let Err(e) = &result {
            warn!(error = %e, "reconciliation failed");
            let retry = self.ctx.cfg.error_requeue();
            requeue_after = Some(requeue_after.map_or(retry, |d| d.min(retry)));
        }
        ReconcileOutcome {
            requeue_after,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::finalizer::has_finalizer;
    use crate::controller::status::CLUSTER_OPERATOR_NAME;
    use crate::controller::test_support::{
        context, dns_config, infrastructure, ingress_config,
        ingress_controller, with_status_domain,
    };
    use crate::crd::{
        ClusterOperator, EndpointPublishingStrategyType, PlatformType,
    };
    use crate::store::{MemoryStore, Verb};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Service;

    async fn seed_cluster(store: &MemoryStore, platform: PlatformType) {
        store
            .insert(&dns_config())
            .await
            .unwrap();
        store.insert(&infrastructure(Some(platform))).await.unwrap();
        store
            .insert(&ingress_config("apps.example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_primary_still_refreshes_operator_status() {
        let (ctx, store, _) = context();
        let outcome = Reconciler::new(ctx)
            .reconcile(&ObjectKey::namespaced("openshift-ingress-operator", "gone"))
            .await;
        assert!(outcome.is_ok());
        assert!(outcome.requeue_after.is_none());
        assert!(
            store
                .fetch::<ClusterOperator>(&ObjectKey::cluster(CLUSTER_OPERATOR_NAME))
                .await
                .is_some()
        );
        assert_eq!(store.count::<Deployment>(Verb::Create).await, 0);
    }

    #[tokio::test]
    async fn incomplete_configuration_defers_enforcement() {
        let (ctx, store, _) = context();
        store
            .insert(&ingress_config("apps.example.com"))
            .await
            .unwrap();
        let ic = store.insert(&ingress_controller("edge", None)).await.unwrap();

        let outcome = Reconciler::new(ctx).reconcile(&ObjectKey::of(&ic)).await;
        let err = outcome.result.unwrap_err();
        assert_eq!(err.cause_count(), 2);
        assert!(err.to_string().contains("cluster configuration incomplete"));
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(30)));

        let stored: IngressController =
            store.fetch(&ObjectKey::of(&ic)).await.unwrap();
        assert!(!stored.is_status_domain_set());
        assert_eq!(store.count::<Deployment>(Verb::Create).await, 0);
    }

    #[tokio::test]
    async fn first_pass_publishes_and_waits_for_load_balancer() {
        let (ctx, store, _) = context();
        seed_cluster(&store, PlatformType::AWS).await;
        let ic = store.insert(&ingress_controller("edge", None)).await.unwrap();

        let outcome = Reconciler::new(ctx).reconcile(&ObjectKey::of(&ic)).await;
        assert!(outcome.is_ok(), "{:?}", outcome.result);
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(15)));

        let stored: IngressController =
            store.fetch(&ObjectKey::of(&ic)).await.unwrap();
        assert_eq!(stored.status_domain(), Some("apps.example.com"));
        assert_eq!(
            stored.status_strategy(),
            Some(EndpointPublishingStrategyType::LoadBalancerService)
        );
        assert!(has_finalizer(&stored));
        assert_eq!(store.all::<Deployment>().await.len(), 1);
        assert_eq!(store.all::<Service>().await.len(), 2);
    }

    #[tokio::test]
    async fn conflicting_domain_blocks_everything_downstream() {
        let (ctx, store, _) = context();
        seed_cluster(&store, PlatformType::AWS).await;
        store
            .insert(&with_status_domain(
                ingress_controller("default", None),
                "apps.example.com",
            ))
            .await
            .unwrap();
        let ic = store.insert(&ingress_controller("edge", None)).await.unwrap();

        let outcome = Reconciler::new(ctx).reconcile(&ObjectKey::of(&ic)).await;
        assert!(outcome.is_ok(), "{:?}", outcome.result);

        let stored: IngressController =
            store.fetch(&ObjectKey::of(&ic)).await.unwrap();
        assert!(!stored.is_status_domain_set());
        assert!(stored.status_strategy().is_none());
        assert!(!has_finalizer(&stored));
        assert_eq!(store.count::<Deployment>(Verb::Create).await, 0);
    }
}
