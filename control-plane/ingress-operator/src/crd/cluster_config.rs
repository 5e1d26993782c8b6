//! Cluster-scoped configuration singletons consumed by the operator.
//!
//! All of them are named `cluster` and are never written by the reconciler,
//! with the exception of the operator's own [`ClusterOperator`] record.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::Condition;

/// Name shared by every cluster configuration singleton.
pub const CLUSTER_CONFIG_NAME: &str = "cluster";

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "DNS",
    plural = "dnses"
)]
#[serde(rename_all = "camelCase")]
pub struct DNSSpec {
    #[serde(default)]
    pub base_domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_zone: Option<DNSZone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_zone: Option<DNSZone>,
}

#[derive(
    Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq,
)]
pub struct DNSZone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl DNS {
    /// Configured zones, private first. Empty means records stay
    /// unpublished.
    pub fn zones(&self) -> Vec<DNSZone> {
        [&self.spec.private_zone, &self.spec.public_zone]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Infrastructure",
    plural = "infrastructures",
    status = "InfrastructureStatus"
)]
pub struct InfrastructureSpec {}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformType>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq,
)]
pub enum PlatformType {
    AWS,
    Azure,
    GCP,
    IBMCloud,
    PowerVS,
    AlibabaCloud,
    Libvirt,
    BareMetal,
    OpenStack,
    VSphere,
    #[serde(rename = "None")]
    NoPlatform,
    #[serde(other)]
    Unknown,
}

impl Infrastructure {
    pub fn platform(&self) -> Option<PlatformType> {
        self.status.as_ref().and_then(|s| s.platform)
    }
}

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Ingress",
    plural = "ingresses"
)]
pub struct IngressSpec {
    /// Default domain for ingress controllers that do not request one.
    #[serde(default)]
    pub domain: String,
}

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "ClusterOperator",
    plural = "clusteroperators",
    status = "ClusterOperatorStatus"
)]
pub struct ClusterOperatorSpec {}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperatorStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<OperandVersion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_objects: Vec<RelatedObject>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct OperandVersion {
    pub name: String,
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelatedObject {
    #[serde(default)]
    pub group: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}
