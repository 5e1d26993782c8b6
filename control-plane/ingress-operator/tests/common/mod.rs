#![allow(dead_code)]

use std::sync::Arc;

use ingress_operator::config::OperatorConfig;
use ingress_operator::controller::finalizer::INGRESS_CONTROLLER_FINALIZER;
use ingress_operator::controller::{
    ControllerContext, MemoryRecorder, ReconcileOutcome, Reconciler,
};
use ingress_operator::crd::cluster_config::DNSZone;
use ingress_operator::crd::{
    CLUSTER_CONFIG_NAME, DNS, DNSSpec, EndpointPublishingStrategy,
    EndpointPublishingStrategyType, Infrastructure, InfrastructureSpec,
    InfrastructureStatus, Ingress, IngressController, IngressControllerSpec,
    IngressControllerStatus, IngressSpec, PlatformType,
};
use ingress_operator::store::{MemoryStore, ObjectKey};
use kube::api::ObjectMeta;

pub const OPERATOR_NS: &str = "openshift-ingress-operator";
pub const ROUTER_NS: &str = "openshift-ingress";
pub const DEFAULT_DOMAIN: &str = "apps.example.com";

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

// Env guard utilities
pub struct EnvGuard {
    key: &'static str,
    old: Option<String>,
}
impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe {
            if let Some(ref v) = self.old {
                std::env::set_var(self.key, v);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }
}
pub fn set_env(key: &'static str, val: &str) -> EnvGuard {
    let old = std::env::var(key).ok();
    unsafe {
        std::env::set_var(key, val);
    }
    EnvGuard { key, old }
}

/// A reconciler wired to in-memory collaborators.
pub struct Harness {
    pub store: MemoryStore,
    pub recorder: MemoryRecorder,
    pub reconciler: Reconciler<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let recorder = MemoryRecorder::new();
        let ctx = ControllerContext::new(
            Arc::new(store.clone()),
            Arc::new(recorder.clone()),
            Arc::new(OperatorConfig::default()),
        );
        Self {
            reconciler: Reconciler::new(ctx),
            store,
            recorder,
        }
    }

    /// Harness with every cluster singleton present.
    pub async fn with_cluster(platform: PlatformType) -> Self {
        let h = Self::new();
        h.store
            .insert(&dns_config())
            .await
            .unwrap();
        h.store.insert(&infrastructure(platform)).await.unwrap();
        h.store
            .insert(&Ingress::new(
                CLUSTER_CONFIG_NAME,
                IngressSpec {
                    domain: DEFAULT_DOMAIN.into(),
                },
            ))
            .await
            .unwrap();
        h
    }

    pub async fn reconcile(&self, name: &str) -> ReconcileOutcome {
        self.reconciler.reconcile(&key(name)).await
    }

    pub async fn ingress(&self, name: &str) -> Option<IngressController> {
        self.store.fetch(&key(name)).await
    }
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(OPERATOR_NS, name)
}

pub fn router_key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(ROUTER_NS, name)
}

/// Cluster DNS config publishing to a single public zone.
pub fn dns_config() -> DNS {
    DNS::new(
        CLUSTER_CONFIG_NAME,
        DNSSpec {
            base_domain: "example.com".into(),
            public_zone: Some(DNSZone {
                id: Some("public-zone".into()),
                ..Default::default()
            }),
            private_zone: None,
        },
    )
}

pub fn infrastructure(platform: PlatformType) -> Infrastructure {
    let mut infra =
        Infrastructure::new(CLUSTER_CONFIG_NAME, InfrastructureSpec {});
    infra.status = Some(InfrastructureStatus {
        platform: Some(platform),
    });
    infra
}

pub fn ingress_controller(name: &str, domain: Option<&str>) -> IngressController {
    IngressController {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(OPERATOR_NS.into()),
            ..Default::default()
        },
        spec: IngressControllerSpec {
            domain: domain.map(String::from),
            ..Default::default()
        },
        status: None,
    }
}

pub fn published(
    name: &str,
    domain: &str,
    strategy: EndpointPublishingStrategyType,
) -> IngressController {
    let mut ic = ingress_controller(name, None);
    ic.metadata.finalizers = Some(vec![INGRESS_CONTROLLER_FINALIZER.into()]);
    ic.status = Some(IngressControllerStatus {
        domain: Some(domain.into()),
        endpoint_publishing_strategy: Some(EndpointPublishingStrategy::of(
            strategy,
        )),
        ..Default::default()
    });
    ic
}
