use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta, OwnerReference,
};
use kube::ResourceExt;

use super::scaffolding::rule;
use super::{
    internal_service_name, owner_labels, service_monitor_name,
    stats_secret_name,
};
use crate::crd::IngressController;
use crate::crd::service_monitor::{
    MonitorEndpoint, MonitorTlsConfig, NamespaceSelector, ServiceMonitor,
    ServiceMonitorSpec,
};

pub const MONITORING_NAMESPACE: &str = "openshift-monitoring";
pub const PROMETHEUS_SERVICE_ACCOUNT: &str = "prometheus-k8s";
pub const METRICS_CLUSTER_ROLE: &str = "router-monitoring";
pub const METRICS_ROLE: &str = "prometheus-k8s";

const ALPHANUMERIC: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n',
    'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1',
    '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Credentials guarding the router stats endpoint, generated once.
pub fn router_stats_secret(
    ic: &IngressController,
    namespace: &str,
    owner: &OwnerReference,
) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        "statsUsername".to_string(),
        nanoid::nanoid!(12, &ALPHANUMERIC),
    );
    data.insert(
        "statsPassword".to_string(),
        nanoid::nanoid!(24, &ALPHANUMERIC),
    );
    Secret {
        metadata: ObjectMeta {
            name: Some(stats_secret_name(&ic.name_any())),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(&ic.name_any())),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

pub fn metrics_cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(METRICS_CLUSTER_ROLE.to_string()),
            ..Default::default()
        },
        rules: Some(vec![rule(
            &["route.openshift.io"],
            &["routers/metrics"],
            &["get"],
        )]),
        ..Default::default()
    }
}

pub fn metrics_cluster_role_binding() -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(METRICS_CLUSTER_ROLE.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: METRICS_CLUSTER_ROLE.to_string(),
        },
        subjects: Some(vec![prometheus_subject()]),
    }
}

/// Lets Prometheus discover router endpoints in the router namespace.
pub fn metrics_role(namespace: &str) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(METRICS_ROLE.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        rules: Some(vec![rule(
            &[""],
            &["services", "endpoints", "pods"],
            &["get", "list", "watch"],
        )]),
    }
}

pub fn metrics_role_binding(namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(METRICS_ROLE.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: METRICS_ROLE.to_string(),
        },
        subjects: Some(vec![prometheus_subject()]),
    }
}

fn prometheus_subject() -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: PROMETHEUS_SERVICE_ACCOUNT.to_string(),
        namespace: Some(MONITORING_NAMESPACE.to_string()),
        ..Default::default()
    }
}

/// Scrape binding for the internal router service.
pub fn router_service_monitor(
    ic: &IngressController,
    namespace: &str,
    owner: &OwnerReference,
) -> ServiceMonitor {
    let name = ic.name_any();
    let service = internal_service_name(&name);
    let mut sm = ServiceMonitor::new(
        &service_monitor_name(&name),
        ServiceMonitorSpec {
            selector: LabelSelector {
                match_labels: Some(owner_labels(&name)),
                ..Default::default()
            },
            namespace_selector: Some(NamespaceSelector {
                match_names: vec![namespace.to_string()],
            }),
            endpoints: vec![MonitorEndpoint {
                port: "metrics".to_string(),
                scheme: Some("https".to_string()),
                interval: Some("30s".to_string()),
                bearer_token_file: Some(
                    "/var/run/secrets/kubernetes.io/serviceaccount/token"
                        .to_string(),
                ),
                tls_config: Some(MonitorTlsConfig {
                    ca_file: Some(
                        "/etc/prometheus/configmaps/serving-certs-ca-bundle/service-ca.crt"
                            .to_string(),
                    ),
                    server_name: Some(format!(
                        "{}.{}.svc",
                        service, namespace
                    )),
                }),
            }],
        },
    );
    sm.metadata.namespace = Some(namespace.to_string());
    sm.metadata.labels = Some(owner_labels(&name));
    sm.metadata.owner_references = Some(vec![owner.clone()]);
    sm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::IngressControllerSpec;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            name: "router-default".into(),
            uid: "u-1".into(),
            controller: Some(true),
            block_owner_deletion: None,
        }
    }

    #[test]
    fn stats_secret_generates_distinct_credentials() {
        let ic = IngressController::new("default", IngressControllerSpec::default());
        let a = router_stats_secret(&ic, "openshift-ingress", &owner());
        let b = router_stats_secret(&ic, "openshift-ingress", &owner());
        let a_data = a.string_data.unwrap();
        assert_eq!(a_data["statsPassword"].len(), 24);
        assert_ne!(a_data["statsPassword"], b.string_data.unwrap()["statsPassword"]);
        assert_eq!(a.metadata.name.as_deref(), Some("router-stats-default"));
    }

    #[test]
    fn service_monitor_targets_internal_service() {
        let ic = IngressController::new("default", IngressControllerSpec::default());
        let sm = router_service_monitor(&ic, "openshift-ingress", &owner());
        assert_eq!(sm.metadata.name.as_deref(), Some("router-default"));
        let tls = sm.spec.endpoints[0].tls_config.as_ref().unwrap();
        assert_eq!(
            tls.server_name.as_deref(),
            Some("router-internal-default.openshift-ingress.svc")
        );
    }
}
