use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::cluster_config::DNSZone;

#[derive(
    CustomResource,
    Deserialize,
    Serialize,
    Clone,
    Debug,
    Default,
    JsonSchema,
    PartialEq,
)]
#[kube(
    group = "ingress.operator.openshift.io",
    version = "v1",
    kind = "DNSRecord",
    plural = "dnsrecords",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DNSRecordSpec {
    /// Fully qualified name, e.g. `*.apps.example.com.`
    pub dns_name: String,
    pub record_type: DNSRecordType,
    pub targets: Vec<String>,
    #[serde(rename = "recordTTL")]
    pub record_ttl: i64,
    /// Zones the record is published to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<DNSZone>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq,
    Eq,
)]
pub enum DNSRecordType {
    #[default]
    CNAME,
    A,
}
