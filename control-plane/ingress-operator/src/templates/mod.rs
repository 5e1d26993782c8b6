//! Manifests for everything the operator creates on behalf of an
//! IngressController. Rendering is pure; the controller decides when and in
//! which order objects are persisted.

pub mod dns;
pub mod metrics;
pub mod router;
pub mod scaffolding;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

pub use dns::wildcard_dns_record;
pub use metrics::*;
pub use router::{
    RenderContext, internal_service, load_balancer_service, router_deployment,
};
pub use scaffolding::*;

/// Label carried by every dependent, naming the owning IngressController.
pub const OWNING_INGRESS_CONTROLLER_LABEL: &str =
    "ingresscontroller.operator.openshift.io/owning-ingresscontroller";
/// Pod selector label of a router deployment.
pub const DEPLOYMENT_LABEL: &str =
    "ingresscontroller.operator.openshift.io/deployment-ingresscontroller";

pub fn router_deployment_name(ic_name: &str) -> String {
    format!("router-{}", ic_name)
}

pub fn load_balancer_service_name(ic_name: &str) -> String {
    format!("router-{}", ic_name)
}

pub fn internal_service_name(ic_name: &str) -> String {
    format!("router-internal-{}", ic_name)
}

pub fn dns_record_name(ic_name: &str) -> String {
    format!("{}-wildcard", ic_name)
}

pub fn stats_secret_name(ic_name: &str) -> String {
    format!("router-stats-{}", ic_name)
}

pub fn service_monitor_name(ic_name: &str) -> String {
    format!("router-{}", ic_name)
}

pub fn owner_labels(ic_name: &str) -> BTreeMap<String, String> {
    let mut lbls = BTreeMap::new();
    lbls.insert(
        OWNING_INGRESS_CONTROLLER_LABEL.to_string(),
        ic_name.to_string(),
    );
    lbls
}

pub fn pod_selector_labels(ic_name: &str) -> BTreeMap<String, String> {
    let mut lbls = BTreeMap::new();
    lbls.insert(DEPLOYMENT_LABEL.to_string(), ic_name.to_string());
    lbls
}

/// Controller owner reference pointing at a persisted router deployment.
/// `None` until the deployment has been assigned a uid.
pub fn deployment_owner_ref(dep: &Deployment) -> Option<OwnerReference> {
    let uid = dep.metadata.uid.as_ref()?;
    Some(OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        name: dep.metadata.name.clone().unwrap_or_default(),
        uid: uid.clone(),
        controller: Some(true),
        block_owner_deletion: None,
    })
}
