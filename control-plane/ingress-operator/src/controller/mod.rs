use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{
    Client,
    api::Api,
    runtime::{Controller, controller::Action, watcher::Config},
};
use tracing::{error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{DNSRecord, IngressController};
use crate::dispatch::OwnerIndex;
use crate::store::{KubeStore, ObjectKey};
use crate::templates::OWNING_INGRESS_CONTROLLER_LABEL;

pub mod conditions;
pub mod deletion;
pub mod domain;
pub mod ensure;
pub mod errors;
pub mod events;
pub mod finalizer;
pub mod reconcile;
pub mod scaffolding;
pub mod status;
pub mod strategy;

pub use errors::{AggregateError, ReconcileError};
pub use events::{EventRecorder, KubeEventRecorder, MemoryRecorder};
pub use reconcile::{ReconcileOutcome, Reconciler};

/// Name reported as the source of emitted events.
pub const CONTROLLER_NAME: &str = "ingress-operator";

/// Collaborators shared by every reconciliation step.
pub struct ControllerContext<S> {
    pub store: Arc<S>,
    pub recorder: Arc<dyn EventRecorder>,
    pub cfg: Arc<OperatorConfig>,
}

impl<S> ControllerContext<S> {
    pub fn new(
        store: Arc<S>,
        recorder: Arc<dyn EventRecorder>,
        cfg: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            store,
            recorder,
            cfg,
        }
    }
}

// derive would require S: Clone
impl<S> Clone for ControllerContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            recorder: self.recorder.clone(),
            cfg: self.cfg.clone(),
        }
    }
}

pub async fn run_controller(
    client: Client,
    cfg: Arc<OperatorConfig>,
) -> anyhow::Result<()> {
    let ctx = ControllerContext::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(KubeEventRecorder::new(client.clone(), CONTROLLER_NAME)),
        cfg.clone(),
    );
    let reconciler = Arc::new(Reconciler::new(ctx));

    let ingresses: Api<IngressController> =
        Api::namespaced(client.clone(), &cfg.namespace);
    let deployments: Api<Deployment> =
        Api::namespaced(client.clone(), &cfg.router_namespace);
    let services: Api<Service> =
        Api::namespaced(client.clone(), &cfg.router_namespace);
    let records: Api<DNSRecord> =
        Api::namespaced(client, &cfg.router_namespace);
    let owned = Config::default().labels(OWNING_INGRESS_CONTROLLER_LABEL);

    let index = OwnerIndex::new(&cfg.namespace);
    let (by_deployment, by_service, by_record) =
        (index.clone(), index.clone(), index);

    info!(
        namespace = %cfg.namespace,
        router_namespace = %cfg.router_namespace,
        "starting ingresscontroller controller"
    );
    Controller::new(ingresses, Config::default())
        .watches(deployments, owned.clone(), move |d| {
            by_deployment.requests_for(&d)
        })
        .watches(services, owned.clone(), move |s| by_service.requests_for(&s))
        .watches(records, owned, move |r| by_record.requests_for(&r))
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(%obj_ref, ?action, "reconciled")
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

async fn reconcile(
    ic: Arc<IngressController>,
    reconciler: Arc<Reconciler<KubeStore>>,
) -> Result<Action, ReconcileError> {
    let outcome = reconciler.reconcile(&ObjectKey::of(ic.as_ref())).await;
    outcome.result?;
    Ok(match outcome.requeue_after {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    })
}

fn error_policy(
    ic: Arc<IngressController>,
    err: &ReconcileError,
    reconciler: Arc<Reconciler<KubeStore>>,
) -> Action {
    let retry = reconciler.context().cfg.error_requeue();
    warn!(key = %ObjectKey::of(ic.as_ref()), error = %err, ?retry, "requeueing after failure");
    Action::requeue(retry)
}
