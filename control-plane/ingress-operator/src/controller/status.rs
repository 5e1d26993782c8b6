use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event, Service};
use kube::ResourceExt;
use kube::api::ObjectMeta;
use tracing::{debug, info, instrument};

use super::ControllerContext;
use super::conditions::{now, same_conditions, set_condition};
use super::errors::{AggregateError, ReconcileError};
use crate::crd::cluster_config::{
    ClusterOperatorSpec, OperandVersion, RelatedObject,
};
use crate::crd::{
    ClusterOperator, ClusterOperatorStatus, Condition, ConditionStatus,
    ConditionType, EndpointPublishingStrategyType, IngressController,
    IngressControllerStatus,
};
use crate::store::{ObjectKey, ObjectStore, StoreError};
use crate::templates::{
    DEPLOYMENT_LABEL, OWNING_INGRESS_CONTROLLER_LABEL,
    dns::load_balancer_address, load_balancer_service_name,
    router_deployment_name,
};

pub const CLUSTER_OPERATOR_NAME: &str = "ingress";
pub const SYNC_LOAD_BALANCER_FAILED: &str = "SyncLoadBalancerFailed";

fn available_replicas(dep: &Deployment) -> Option<i32> {
    dep.status.as_ref().and_then(|s| s.available_replicas)
}

fn desired_replicas(dep: &Deployment) -> i32 {
    dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
}

pub fn deployment_available(dep: &Deployment) -> bool {
    available_replicas(dep).unwrap_or(0) > 0
}

/// `Available` for an IngressController from its router deployment.
pub fn compute_available(dep: Option<&Deployment>) -> Condition {
    match dep {
        None => Condition::new(
            ConditionType::Available,
            ConditionStatus::False,
            "DeploymentMissing",
            "router deployment does not exist",
        ),
        Some(d) if d.status.is_none() => Condition::new(
            ConditionType::Available,
            ConditionStatus::Unknown,
            "DeploymentPending",
            "router deployment has not reported status yet",
        ),
        Some(d) if deployment_available(d) => Condition::new(
            ConditionType::Available,
            ConditionStatus::True,
            "MinimumReplicasAvailable",
            format!(
                "{} of {} router replicas available",
                available_replicas(d).unwrap_or(0),
                desired_replicas(d)
            ),
        ),
        Some(_) => Condition::new(
            ConditionType::Available,
            ConditionStatus::False,
            "DeploymentUnavailable",
            "no router replicas are available",
        ),
    }
}

/// `Progressing` is true while the rollout has not caught up with spec.
pub fn compute_progressing(dep: Option<&Deployment>) -> Condition {
    let Some(dep) = dep else {
        return Condition::new(
            ConditionType::Progressing,
            ConditionStatus::True,
            "DeploymentMissing",
            "router deployment is being created",
        );
    };
    let want = desired_replicas(dep);
    let status = dep.status.clone().unwrap_or_default();
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);
    if updated >= want && available >= want {
        Condition::new(
            ConditionType::Progressing,
            ConditionStatus::False,
            "AsExpected",
            "router rollout is complete",
        )
    } else {
        Condition::new(
            ConditionType::Progressing,
            ConditionStatus::True,
            "RolloutInProgress",
            format!(
                "{} updated and {} available of {} desired replicas",
                updated, available, want
            ),
        )
    }
}

fn event_time(ev: &Event) -> Option<DateTime<Utc>> {
    ev.last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| ev.event_time.as_ref().map(|t| t.0))
        .or_else(|| ev.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

/// `LoadBalancerReady` for a load balancer service, explained by the newest
/// provisioning failure event when still pending.
pub fn compute_load_balancer_ready(
    svc: Option<&Service>,
    events: &[Event],
) -> Condition {
    let Some(svc) = svc else {
        return Condition::new(
            ConditionType::LoadBalancerReady,
            ConditionStatus::False,
            "ServiceNotFound",
            "load balancer service does not exist",
        );
    };
    if load_balancer_address(svc).is_some() {
        return Condition::new(
            ConditionType::LoadBalancerReady,
            ConditionStatus::True,
            "LoadBalancerProvisioned",
            "load balancer has been provisioned",
        );
    }
    let name = svc.name_any();
    let failure = events
        .iter()
        .filter(|e| e.reason.as_deref() == Some(SYNC_LOAD_BALANCER_FAILED))
        .filter(|e| e.involved_object.kind.as_deref() == Some("Service"))
        .filter(|e| e.involved_object.name.as_deref() == Some(name.as_str()))
        .max_by_key(|e| event_time(e));
    match failure {
        Some(ev) => Condition::new(
            ConditionType::LoadBalancerReady,
            ConditionStatus::False,
            SYNC_LOAD_BALANCER_FAILED,
            ev.message.clone().unwrap_or_default(),
        ),
        None => Condition::new(
            ConditionType::LoadBalancerReady,
            ConditionStatus::False,
            "LoadBalancerPending",
            "load balancer is being provisioned",
        ),
    }
}

fn material_change(
    old: &IngressControllerStatus,
    new: &IngressControllerStatus,
) -> bool {
    old.available_replicas != new.available_replicas
        || old.selector != new.selector
        || !same_conditions(&old.conditions, &new.conditions)
}

fn operator_status_changed(
    old: &ClusterOperatorStatus,
    new: &ClusterOperatorStatus,
) -> bool {
    old.versions != new.versions
        || old.related_objects != new.related_objects
        || !same_conditions(&old.conditions, &new.conditions)
}

/// Folds observed router state back into IngressController status and the
/// operator-wide ClusterOperator record.
pub struct StatusSyncer<S> {
    ctx: ControllerContext<S>,
}

impl<S: ObjectStore> StatusSyncer<S> {
    pub fn new(ctx: ControllerContext<S>) -> Self {
        Self { ctx }
    }

    async fn get_opt<K: crate::store::StoreObject>(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<K>, StoreError> {
        match self.ctx.store.get::<K>(key).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn recent_events(&self) -> Result<Vec<Event>, ReconcileError> {
        let ns = self.ctx.cfg.router_namespace.as_str();
        // a window reaching past the representable range keeps every event
        let since = chrono::Duration::from_std(self.ctx.cfg.event_window())
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let events = self
            .ctx
            .store
            .list::<Event>(Some(ns), None)
            .await
            .map_err(|e| {
                ReconcileError::store(format!("list events in namespace {}", ns), e)
            })?;
        Ok(events
            .into_iter()
            .filter(|e| event_time(e).is_none_or(|t| t >= since))
            .collect())
    }

    /// Recompute conditions and observed replicas of a live IngressController
    /// with a published domain. Writes only on material change.
    #[instrument(skip_all, fields(name = %ic.name_any()))]
    pub async fn sync_ingress_controller(
        &self,
        ic: &mut IngressController,
    ) -> Result<(), ReconcileError> {
        if ic.is_terminating() || !ic.is_status_domain_set() {
            return Ok(());
        }
        let name = ic.name_any();
        let ns = self.ctx.cfg.router_namespace.as_str();
        let mut errs = AggregateError::new();

        let dep_key = ObjectKey::namespaced(ns, &router_deployment_name(&name));
        let deployment = errs
            .collect(self.get_opt::<Deployment>(&dep_key).await.map_err(|e| {
                ReconcileError::store(format!("get deployment {}", dep_key), e)
            }))
            .flatten();

        let uses_lb = ic.status_strategy()
            == Some(EndpointPublishingStrategyType::LoadBalancerService);
        let (lb_service, events) = if uses_lb {
            let lb_key =
                ObjectKey::namespaced(ns, &load_balancer_service_name(&name));
            let svc = errs
                .collect(self.get_opt::<Service>(&lb_key).await.map_err(|e| {
                    ReconcileError::store(format!("get service {}", lb_key), e)
                }))
                .flatten();
            let events = errs.collect(self.recent_events().await).unwrap_or_default();
            (svc, events)
        } else {
            (None, Vec::new())
        };

        let old = ic.status.clone().unwrap_or_default();
        let mut new = old.clone();
        let ts = now();
        set_condition(&mut new.conditions, compute_available(deployment.as_ref()), &ts);
        set_condition(
            &mut new.conditions,
            compute_progressing(deployment.as_ref()),
            &ts,
        );
        if uses_lb {
            set_condition(
                &mut new.conditions,
                compute_load_balancer_ready(lb_service.as_ref(), &events),
                &ts,
            );
        } else {
            new.conditions
                .retain(|c| c.type_ != ConditionType::LoadBalancerReady);
        }
        new.available_replicas =
            Some(deployment.as_ref().and_then(available_replicas).unwrap_or(0));
        new.selector = Some(format!("{}={}", DEPLOYMENT_LABEL, name));

        if material_change(&old, &new) {
            let key = ObjectKey::of(ic);
            let mut updated = ic.clone();
            updated.status = Some(new);
            match self.ctx.store.update_status(&updated).await {
                Ok(fresh) => {
                    debug!("updated ingresscontroller status");
                    *ic = fresh;
                }
                Err(e) => errs.push(ReconcileError::store(
                    format!("update status of ingresscontroller {}", key),
                    e,
                )),
            }
        }
        errs.into_result()
    }

    fn compute_operator_status(
        &self,
        ingresses: &[IngressController],
        deployments: &[Deployment],
        pass_errors: &AggregateError,
        previous: &ClusterOperatorStatus,
    ) -> ClusterOperatorStatus {
        let ts = now();
        let by_owner: BTreeMap<String, &Deployment> = deployments
            .iter()
            .filter_map(|d| {
                d.labels()
                    .get(OWNING_INGRESS_CONTROLLER_LABEL)
                    .map(|owner| (owner.clone(), d))
            })
            .collect();
        let live: Vec<&IngressController> =
            ingresses.iter().filter(|ic| !ic.is_terminating()).collect();

        let unavailable: Vec<String> = live
            .iter()
            .filter(|ic| {
                !by_owner
                    .get(&ic.name_any())
                    .is_some_and(|d| deployment_available(d))
            })
            .map(|ic| ic.name_any())
            .collect();
        let progressing: Vec<String> = live
            .iter()
            .filter(|ic| {
                compute_progressing(by_owner.get(&ic.name_any()).copied())
                    .is_true()
            })
            .map(|ic| ic.name_any())
            .collect();

        let mut conditions = previous.conditions.clone();
        set_condition(
            &mut conditions,
            if unavailable.is_empty() {
                Condition::new(
                    ConditionType::Available,
                    ConditionStatus::True,
                    "AsExpected",
                    format!("{} ingress controllers available", live.len()),
                )
            } else {
                Condition::new(
                    ConditionType::Available,
                    ConditionStatus::False,
                    "IngressUnavailable",
                    format!("not all ingress controllers are available: {}", unavailable.join(", ")),
                )
            },
            &ts,
        );
        set_condition(
            &mut conditions,
            if progressing.is_empty() {
                Condition::new(
                    ConditionType::Progressing,
                    ConditionStatus::False,
                    "AsExpected",
                    "desired and current state match",
                )
            } else {
                Condition::new(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    "Reconciling",
                    format!("rolling out: {}", progressing.join(", ")),
                )
            },
            &ts,
        );
        set_condition(
            &mut conditions,
            if pass_errors.is_empty() {
                Condition::new(
                    ConditionType::Degraded,
                    ConditionStatus::False,
                    "AsExpected",
                    "no errors during the last reconciliation",
                )
            } else {
                Condition::new(
                    ConditionType::Degraded,
                    ConditionStatus::True,
                    "ReconcileFailed",
                    pass_errors.to_string(),
                )
            },
            &ts,
        );

        let mut versions = vec![OperandVersion {
            name: "operator".to_string(),
            version: self.ctx.cfg.release_version().to_string(),
        }];
        versions.push(OperandVersion {
            name: "ingress-controller".to_string(),
            version: self.ctx.cfg.router_image().to_string(),
        });

        ClusterOperatorStatus {
            conditions,
            versions,
            related_objects: vec![
                RelatedObject {
                    group: String::new(),
                    resource: "namespaces".to_string(),
                    namespace: None,
                    name: self.ctx.cfg.namespace.clone(),
                },
                RelatedObject {
                    group: String::new(),
                    resource: "namespaces".to_string(),
                    namespace: None,
                    name: self.ctx.cfg.router_namespace.clone(),
                },
            ],
        }
    }

    /// Recompute the `ingress` ClusterOperator from every IngressController,
    /// every router deployment and the errors of the current pass.
    #[instrument(skip_all)]
    pub async fn sync_operator_status(
        &self,
        pass_errors: &AggregateError,
    ) -> Result<(), ReconcileError> {
        let store = self.ctx.store.as_ref();
        let ingresses = store
            .list::<IngressController>(Some(self.ctx.cfg.namespace.as_str()), None)
            .await
            .map_err(|e| ReconcileError::store("list ingresscontrollers", e))?;
        let deployments = store
            .list::<Deployment>(
                Some(self.ctx.cfg.router_namespace.as_str()),
                Some(OWNING_INGRESS_CONTROLLER_LABEL),
            )
            .await
            .map_err(|e| ReconcileError::store("list router deployments", e))?;

        let key = ObjectKey::cluster(CLUSTER_OPERATOR_NAME);
        let current = match self.get_opt::<ClusterOperator>(&key).await {
            Ok(Some(co)) => co,
            Ok(None) => {
                let co = ClusterOperator {
                    metadata: ObjectMeta {
                        name: Some(CLUSTER_OPERATOR_NAME.to_string()),
                        ..Default::default()
                    },
                    spec: ClusterOperatorSpec {},
                    status: None,
                };
                let created = store.create(&co).await.map_err(|e| {
                    ReconcileError::store(
                        format!("create clusteroperator {}", key),
                        e,
                    )
                })?;
                info!("created clusteroperator {}", CLUSTER_OPERATOR_NAME);
                created
            }
            Err(e) => {
                return Err(ReconcileError::store(
                    format!("get clusteroperator {}", key),
                    e,
                ));
            }
        };

        let previous = current.status.clone().unwrap_or_default();
        let next = self.compute_operator_status(
            &ingresses,
            &deployments,
            pass_errors,
            &previous,
        );
        if current.status.is_some() && !operator_status_changed(&previous, &next) {
            return Ok(());
        }
        let mut updated = current;
        updated.status = Some(next);
        store.update_status(&updated).await.map_err(|e| {
            ReconcileError::store(
                format!("update status of clusteroperator {}", key),
                e,
            )
        })?;
        debug!("updated clusteroperator status");
        Ok(())
    }
}
