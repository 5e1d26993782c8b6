use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, SecretKeySelector, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta, OwnerReference,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::{
    ROUTER_SERVICE_ACCOUNT, internal_service_name, load_balancer_service_name,
    owner_labels, pod_selector_labels, router_deployment_name,
    stats_secret_name,
};
use crate::crd::{EndpointPublishingStrategyType, IngressController};

pub const STATS_PORT: i32 = 1936;

#[derive(Clone, Debug)]
pub struct RenderContext<'a> {
    pub ic: &'a IngressController,
    pub router_namespace: &'a str,
    pub image: &'a str,
}

impl RenderContext<'_> {
    fn name(&self) -> String {
        self.ic.name_any()
    }

    fn domain(&self) -> &str {
        self.ic.status_domain().unwrap_or_default()
    }

    fn strategy(&self) -> Option<EndpointPublishingStrategyType> {
        self.ic.status_strategy()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn router_deployment(ctx: &RenderContext<'_>) -> Deployment {
    let name = ctx.name();
    let host_network =
        ctx.strategy() == Some(EndpointPublishingStrategyType::HostNetwork);
    let stats_secret = stats_secret_name(&name);

    let mut labels = owner_labels(&name);
    labels.extend(pod_selector_labels(&name));

    let health = Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/healthz".to_string()),
            port: IntOrString::Int(STATS_PORT),
            ..Default::default()
        }),
        ..Default::default()
    };

    let container = Container {
        name: "router".to_string(),
        image: Some(ctx.image.to_string()),
        env: Some(vec![
            env("ROUTER_SERVICE_NAME", name.clone()),
            env("ROUTER_SERVICE_NAMESPACE", ctx.router_namespace),
            env("ROUTER_CANONICAL_HOSTNAME", ctx.domain()),
            env("STATS_PORT", STATS_PORT.to_string()),
            secret_env("STATS_USERNAME", &stats_secret, "statsUsername"),
            secret_env("STATS_PASSWORD", &stats_secret, "statsPassword"),
        ]),
        ports: Some(vec![
            ContainerPort {
                name: Some("http".to_string()),
                container_port: 80,
                ..Default::default()
            },
            ContainerPort {
                name: Some("https".to_string()),
                container_port: 443,
                ..Default::default()
            },
            ContainerPort {
                name: Some("metrics".to_string()),
                container_port: STATS_PORT,
                ..Default::default()
            },
        ]),
        liveness_probe: Some(health.clone()),
        readiness_probe: Some(health),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(router_deployment_name(&name)),
            namespace: Some(ctx.router_namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(ctx.ic.desired_replicas()),
            selector: LabelSelector {
                match_labels: Some(pod_selector_labels(&name)),
                ..Default::default()
            },
            // host ports can't be shared by surge pods
            strategy: host_network.then(|| DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(
                        ROUTER_SERVICE_ACCOUNT.to_string(),
                    ),
                    host_network: host_network.then_some(true),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(
    ctx: &RenderContext<'_>,
    name: String,
    owner: &OwnerReference,
    spec: ServiceSpec,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(ctx.router_namespace.to_string()),
            labels: Some(owner_labels(&ctx.name())),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

pub fn load_balancer_service(
    ctx: &RenderContext<'_>,
    owner: &OwnerReference,
) -> Service {
    let name = ctx.name();
    service(
        ctx,
        load_balancer_service_name(&name),
        owner,
        ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            external_traffic_policy: Some("Local".to_string()),
            selector: Some(pod_selector_labels(&name)),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: 80,
                    target_port: Some(IntOrString::Int(80)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("https".to_string()),
                    port: 443,
                    target_port: Some(IntOrString::Int(443)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        },
    )
}

pub fn internal_service(
    ctx: &RenderContext<'_>,
    owner: &OwnerReference,
) -> Service {
    let name = ctx.name();
    service(
        ctx,
        internal_service_name(&name),
        owner,
        ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(pod_selector_labels(&name)),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: 80,
                    target_port: Some(IntOrString::String("http".into())),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("https".to_string()),
                    port: 443,
                    target_port: Some(IntOrString::String("https".into())),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("metrics".to_string()),
                    port: STATS_PORT,
                    target_port: Some(IntOrString::String("metrics".into())),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        },
    )
}
