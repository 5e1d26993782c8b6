pub mod cluster_config;
pub mod condition;
pub mod dns_record;
pub mod ingress_controller;
pub mod service_monitor;

pub use cluster_config::{
    CLUSTER_CONFIG_NAME, ClusterOperator, ClusterOperatorStatus, DNS, DNSSpec,
    Infrastructure, InfrastructureSpec, InfrastructureStatus, Ingress,
    IngressSpec, PlatformType,
};
pub use condition::{Condition, ConditionStatus, ConditionType};
pub use dns_record::{DNSRecord, DNSRecordSpec, DNSRecordType};
pub use ingress_controller::{
    EndpointPublishingStrategy, EndpointPublishingStrategyType,
    IngressController, IngressControllerSpec, IngressControllerStatus,
};
pub use service_monitor::ServiceMonitor;
