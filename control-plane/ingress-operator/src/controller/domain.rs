use kube::{Resource, ResourceExt};
use tracing::{info, instrument};

use super::ControllerContext;
use super::conditions::{carry_transition_time, find, now};
use super::errors::ReconcileError;
use super::events::{EventKind, REASON_DOMAIN_PUBLISHED, REASON_INVALID_DOMAIN};
use crate::crd::{
    Condition, ConditionStatus, ConditionType, Ingress, IngressController,
};
use crate::store::{ObjectKey, ObjectStore};

pub const REASON_INVALID_DOMAIN_CONDITION: &str = "InvalidDomain";

/// Domain an IngressController asks for: its own spec, else the cluster
/// default.
pub fn candidate_domain(ic: &IngressController, ingress_config: &Ingress) -> String {
    match ic.spec.domain.as_deref() {
        Some(d) if !d.is_empty() => d.to_string(),
        _ => ingress_config.spec.domain.clone(),
    }
}

/// Publishes `status.domain` once, provided no sibling already holds it.
pub struct DomainEnforcer<S> {
    ctx: ControllerContext<S>,
}

impl<S: ObjectStore> DomainEnforcer<S> {
    pub fn new(ctx: ControllerContext<S>) -> Self {
        Self { ctx }
    }

    /// Name of a sibling in the same namespace already holding `domain`.
    ///
    /// Siblings come from a list that may lag behind; two controllers
    /// created at the same time with the same domain can both pass.
    async fn conflicting_sibling(
        &self,
        ic: &IngressController,
        domain: &str,
    ) -> Result<Option<String>, ReconcileError> {
        let ns = ic.namespace();
        let siblings = self
            .ctx
            .store
            .list::<IngressController>(ns.as_deref(), None)
            .await
            .map_err(|e| ReconcileError::store("list ingresscontrollers", e))?;
        let me = ic.name_any();
        Ok(siblings
            .into_iter()
            .filter(|s| s.name_any() != me)
            .find(|s| s.status_domain() == Some(domain))
            .map(|s| s.name_any()))
    }

    #[instrument(skip_all, fields(name = %ic.name_any()))]
    pub async fn enforce(
        &self,
        ic: &mut IngressController,
        ingress_config: &Ingress,
    ) -> Result<(), ReconcileError> {
        if ic.is_status_domain_set() {
            return Ok(());
        }

        let domain = candidate_domain(ic, ingress_config);
        let rejection = if domain.is_empty() {
            Some("no ingress domain is configured for the cluster".to_string())
        } else {
            self.conflicting_sibling(ic, &domain).await?.map(|other| {
                info!(%domain, conflicting = %other, "domain not unique");
                format!(
                    "domain {:?} is already in use by another IngressController",
                    domain
                )
            })
        };

        let mut updated = ic.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        match &rejection {
            Some(message) => {
                let mut available = Condition::new(
                    ConditionType::Available,
                    ConditionStatus::False,
                    REASON_INVALID_DOMAIN_CONDITION,
                    message.clone(),
                );
                carry_transition_time(
                    &mut available,
                    find(&status.conditions, ConditionType::Available),
                    &now(),
                );
                status.conditions = vec![available];
            }
            None => status.domain = Some(domain.clone()),
        }

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

        let oref = ic.object_ref(&());
        match rejection {
            Some(message) => {
                self.ctx
                    .recorder
                    .record(&oref, EventKind::Warning, REASON_INVALID_DOMAIN, message)
                    .await
            }
            None => {
                info!(%domain, "published domain");
                self.ctx
                    .recorder
                    .record(
                        &oref,
                        EventKind::Normal,
                        REASON_DOMAIN_PUBLISHED,
                        format!("published domain {}", domain),
                    )
                    .await
            }
        }
        Ok(())
    }
}
