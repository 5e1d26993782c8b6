use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::Condition;

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "IngressController",
    plural = "ingresscontrollers",
    namespaced,
    status = "IngressControllerStatus",
    printcolumn = r#"{"name":"Domain","type":"string","jsonPath":".status.domain"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IngressControllerSpec {
    /// Requested ingress domain; the cluster default is used when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Requested exposure strategy; derived from the platform when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_publishing_strategy: Option<EndpointPublishingStrategy>,
    /// Desired router replicas (default 2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressControllerStatus {
    /// Effective domain. Written once and never changed afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Effective exposure strategy. Written once and never changed afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_publishing_strategy: Option<EndpointPublishingStrategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,
    /// Label selector of the router pods, in string form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct EndpointPublishingStrategy {
    #[serde(rename = "type")]
    pub type_: EndpointPublishingStrategyType,
}

impl EndpointPublishingStrategy {
    pub fn of(type_: EndpointPublishingStrategyType) -> Self {
        Self { type_ }
    }
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq,
)]
pub enum EndpointPublishingStrategyType {
    LoadBalancerService,
    HostNetwork,
    Private,
}

impl std::fmt::Display for EndpointPublishingStrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoadBalancerService => write!(f, "LoadBalancerService"),
            Self::HostNetwork => write!(f, "HostNetwork"),
            Self::Private => write!(f, "Private"),
        }
    }
}

impl IngressController {
    /// Published domain, if any. Empty strings count as unpublished.
    pub fn status_domain(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.domain.as_deref())
            .filter(|d| !d.is_empty())
    }

    pub fn is_status_domain_set(&self) -> bool {
        self.status_domain().is_some()
    }

    pub fn status_strategy(&self) -> Option<EndpointPublishingStrategyType> {
        self.status
            .as_ref()
            .and_then(|s| s.endpoint_publishing_strategy.as_ref())
            .map(|s| s.type_)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn desired_replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(2)
    }
}
