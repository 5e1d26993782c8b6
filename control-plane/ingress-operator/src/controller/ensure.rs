use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::ControllerContext;
use super::deletion::delete_if_present;
use super::errors::{AggregateError, ReconcileError};
use super::events::{EventKind, REASON_CREATED, REASON_UPDATED};
use super::scaffolding::ensure_exists;
use crate::crd::{
    DNS, DNSRecord, EndpointPublishingStrategyType, IngressController,
};
use crate::store::{ObjectKey, ObjectStore, StoreObject, kind_of};
use crate::templates::{
    RenderContext, deployment_owner_ref, dns::load_balancer_address,
    dns_record_name, internal_service, load_balancer_service,
    metrics_cluster_role, metrics_cluster_role_binding, metrics_role,
    metrics_role_binding, router_deployment, router_service_monitor,
    router_stats_secret, wildcard_dns_record,
};

/// What the ensure pass left behind, for requeue decisions.
#[derive(Clone, Debug, Default)]
pub struct EnsuredResources {
    pub deployment: Option<Deployment>,
    pub lb_service: Option<Service>,
    /// A load balancer exists but has no address yet.
    pub awaiting_address: bool,
}

/// Converges the router deployment and everything hanging off it for a
/// live IngressController with a published domain and strategy.
pub struct DependentResourceEnsurer<S> {
    ctx: ControllerContext<S>,
}

/// Whether the fields the operator manages on a router deployment drifted.
fn deployment_drifted(current: &Deployment, desired: &Deployment) -> bool {
    let replicas = |d: &Deployment| d.spec.as_ref().and_then(|s| s.replicas);
    let image = |d: &Deployment| {
        d.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.image.clone())
    };
    replicas(current) != replicas(desired) || image(current) != image(desired)
}

fn merge_deployment(current: &mut Deployment, desired: &Deployment) {
    let Some(want) = desired.spec.as_ref() else {
        return;
    };
    let spec = current.spec.get_or_insert_with(Default::default);
    spec.replicas = want.replicas;
    spec.template = want.template.clone();
}

/// Ports as the operator renders them. The API server fills in node ports,
/// protocols and cluster IPs, none of which count as drift.
fn managed_ports(svc: &Service) -> Vec<(Option<String>, i32, IntOrString)> {
    svc.spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| {
                    let target = p
                        .target_port
                        .clone()
                        .unwrap_or(IntOrString::Int(p.port));
                    (p.name.clone(), p.port, target)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn service_drifted(current: &Service, desired: &Service) -> bool {
    let (Some(have), Some(want)) = (current.spec.as_ref(), desired.spec.as_ref())
    else {
        return desired.spec.is_some();
    };
    have.type_ != want.type_
        || have.selector != want.selector
        || (want.external_traffic_policy.is_some()
            && have.external_traffic_policy != want.external_traffic_policy)
        || managed_ports(current) != managed_ports(desired)
}

fn merge_service(current: &mut Service, desired: &Service) {
    let Some(want) = desired.spec.as_ref() else {
        return;
    };
    let spec = current.spec.get_or_insert_with(Default::default);
    let allocated: Vec<ServicePort> = spec.ports.take().unwrap_or_default();
    spec.type_ = want.type_.clone();
    spec.selector = want.selector.clone();
    if want.external_traffic_policy.is_some() {
        spec.external_traffic_policy = want.external_traffic_policy.clone();
    }
    // keep node ports the cloud provider already allocated
    spec.ports = want.ports.as_ref().map(|ports| {
        ports
            .iter()
            .map(|p| {
                let mut port = p.clone();
                port.node_port = allocated
                    .iter()
                    .find(|a| a.name == p.name)
                    .and_then(|a| a.node_port);
                port
            })
            .collect()
    });
}

fn record_drifted(current: &DNSRecord, desired: &DNSRecord) -> bool {
    current.spec != desired.spec
}

fn merge_record(current: &mut DNSRecord, desired: &DNSRecord) {
    current.spec = desired.spec.clone();
}

impl<S: ObjectStore> DependentResourceEnsurer<S> {
    pub fn new(ctx: ControllerContext<S>) -> Self {
        Self { ctx }
    }

    async fn ensure_owned<K: StoreObject>(
        &self,
        ic: &IngressController,
        desired: &K,
    ) -> Result<K, ReconcileError> {
        let (obj, created) =
            ensure_exists(self.ctx.store.as_ref(), desired).await?;
        if created {
            self.ctx
                .recorder
                .record(
                    &ic.object_ref(&()),
                    EventKind::Normal,
                    REASON_CREATED,
                    format!(
                        "created {} {}",
                        kind_of::<K>().to_lowercase(),
                        ObjectKey::of(&obj)
                    ),
                )
                .await;
        }
        Ok(obj)
    }

    /// Get-or-create, then write the operator-managed fields back when the
    /// persisted object no longer matches the rendered one.
    async fn ensure_managed<K: StoreObject>(
        &self,
        ic: &IngressController,
        desired: &K,
        drifted: fn(&K, &K) -> bool,
        merge: fn(&mut K, &K),
    ) -> Result<K, ReconcileError> {
        let mut current = self.ensure_owned(ic, desired).await?;
        if !drifted(&current, desired) {
            return Ok(current);
        }
        let kind = kind_of::<K>().to_lowercase();
        let key = ObjectKey::of(&current);
        merge(&mut current, desired);
        let updated = self.ctx.store.update(&current).await.map_err(|e| {
            ReconcileError::store(format!("update {} {}", kind, key), e)
        })?;
        info!(%kind, object = %key, "corrected drift");
        self.ctx
            .recorder
            .record(
                &ic.object_ref(&()),
                EventKind::Normal,
                REASON_UPDATED,
                format!("updated {} {}", kind, key),
            )
            .await;
        Ok(updated)
    }

    /// Remove a previously published wildcard record once no zone is left
    /// to publish it to.
    async fn withdraw_dns_record(
        &self,
        ic: &IngressController,
    ) -> Result<(), ReconcileError> {
        let key = ObjectKey::namespaced(
            &self.ctx.cfg.router_namespace,
            &dns_record_name(&ic.name_any()),
        );
        if delete_if_present::<_, DNSRecord>(self.ctx.store.as_ref(), &key)
            .await?
        {
            info!(record = %key, "withdrew dns record without zones");
        }
        Ok(())
    }

    /// Stats credentials, monitoring access grants and the scrape binding.
    /// Every piece is attempted; failures are collected.
    async fn ensure_metrics_integration(
        &self,
        ic: &IngressController,
        owner: &OwnerReference,
    ) -> Result<(), ReconcileError> {
        let ns = self.ctx.cfg.router_namespace.as_str();
        let mut errs = AggregateError::new();
        errs.collect(
            self.ensure_owned(ic, &router_stats_secret(ic, ns, owner))
                .await,
        );
        errs.collect(self.ensure_owned(ic, &metrics_cluster_role()).await);
        errs.collect(
            self.ensure_owned(ic, &metrics_cluster_role_binding()).await,
        );
        errs.collect(self.ensure_owned(ic, &metrics_role(ns)).await);
        errs.collect(self.ensure_owned(ic, &metrics_role_binding(ns)).await);
        errs.collect(
            self.ensure_owned(ic, &router_service_monitor(ic, ns, owner))
                .await,
        );
        errs.into_result()
    }

    /// Load balancer service and the wildcard record tracking its address.
    async fn ensure_load_balancer(
        &self,
        ic: &IngressController,
        render: &RenderContext<'_>,
        owner: &OwnerReference,
        dns: &DNS,
        ensured: &mut EnsuredResources,
    ) -> Result<(), ReconcileError> {
        let lb = self
            .ensure_managed(
                ic,
                &load_balancer_service(render, owner),
                service_drifted,
                merge_service,
            )
            .await?;
        let result = if load_balancer_address(&lb).is_none() {
            debug!("load balancer has no address yet");
            ensured.awaiting_address = true;
            Ok(())
        } else {
            match wildcard_dns_record(ic, &lb, owner, dns) {
                Some(record) => self
                    .ensure_managed(ic, &record, record_drifted, merge_record)
                    .await
                    .map(|_| ()),
                None => {
                    debug!("no dns zones configured");
                    self.withdraw_dns_record(ic).await
                }
            }
        };
        ensured.lb_service = Some(lb);
        result
    }

    #[instrument(skip_all, fields(name = %ic.name_any()))]
    pub async fn ensure(
        &self,
        ic: &IngressController,
        dns: &DNS,
    ) -> Result<EnsuredResources, ReconcileError> {
        let mut ensured = EnsuredResources::default();
        if ic.is_terminating() || !ic.is_status_domain_set() {
            warn!("not eligible for ensure; skipping");
            return Ok(ensured);
        }
        let Some(strategy) = ic.status_strategy() else {
            warn!("no published endpoint publishing strategy; skipping");
            return Ok(ensured);
        };

        let render = RenderContext {
            ic,
            router_namespace: &self.ctx.cfg.router_namespace,
            image: self.ctx.cfg.router_image(),
        };
        let mut errs = AggregateError::new();

        // everything below hangs off the deployment's owner reference
        let deployment = self
            .ensure_managed(
                ic,
                &router_deployment(&render),
                deployment_drifted,
                merge_deployment,
            )
            .await?;
        let Some(owner) = deployment_owner_ref(&deployment) else {
            debug!("router deployment has no uid yet");
            ensured.deployment = Some(deployment);
            return Ok(ensured);
        };
        ensured.deployment = Some(deployment);

        if strategy == EndpointPublishingStrategyType::LoadBalancerService {
            errs.collect(
                self.ensure_load_balancer(
                    ic,
                    &render,
                    &owner,
                    dns,
                    &mut ensured,
                )
                .await,
            );
        }

        if errs
            .collect(
                self.ensure_managed(
                    ic,
                    &internal_service(&render, &owner),
                    service_drifted,
                    merge_service,
                )
                .await,
            )
            .is_some()
        {
            errs.collect(self.ensure_metrics_integration(ic, &owner).await);
        }

        errs.into_result().map(|_| ensured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::{
        context, dns_config, published_ingress_controller, zone,
    };
    use crate::crd::{DNSRecordType, DNSSpec, ServiceMonitor};
    use crate::store::{MemoryStore, Verb};
    use crate::templates::OWNING_INGRESS_CONTROLLER_LABEL;
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, Secret, ServiceStatus,
    };
    use k8s_openapi::api::rbac::v1::{Role, RoleBinding};

    fn router_ns_key(name: &str) -> ObjectKey {
        ObjectKey::namespaced("openshift-ingress", name)
    }

    async fn assign(store: &MemoryStore, name: &str, ingress: LoadBalancerIngress) {
        let mut svc: Service = store.get(&router_ns_key(name)).await.unwrap();
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![ingress]),
            }),
            ..Default::default()
        });
        store.update_status(&svc).await.unwrap();
    }

    async fn assign_address(store: &MemoryStore, name: &str) {
        assign(
            store,
            name,
            LoadBalancerIngress {
                hostname: Some("lb.example.net".into()),
                ..Default::default()
            },
        )
        .await;
    }

    async fn load_balanced(store: &MemoryStore) -> IngressController {
        store
            .insert(&published_ingress_controller(
                "edge",
                "apps.example.com",
                EndpointPublishingStrategyType::LoadBalancerService,
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_graph_is_created_and_owned() {
        let (ctx, store, _) = context();
        let ic = store
            .insert(&published_ingress_controller(
                "edge",
                "apps.example.com",
                EndpointPublishingStrategyType::LoadBalancerService,
            ))
            .await
            .unwrap();
        let ensured = DependentResourceEnsurer::new(ctx).ensure(&ic, &dns_config()).await.unwrap();
        assert!(ensured.awaiting_address);

        let dep = ensured.deployment.unwrap();
        let uid = dep.metadata.uid.clone().unwrap();
        let services = store.all::<Service>().await;
        assert_eq!(services.len(), 2);
        for svc in services {
            let refs = svc.metadata.owner_references.unwrap();
            assert_eq!(refs[0].uid, uid);
            assert_eq!(
                svc.metadata.labels.unwrap()[OWNING_INGRESS_CONTROLLER_LABEL],
                "edge"
            );
        }
        assert_eq!(store.all::<Secret>().await.len(), 1);
        assert_eq!(store.all::<Role>().await.len(), 1);
        assert_eq!(store.all::<RoleBinding>().await.len(), 1);
        assert_eq!(store.all::<ServiceMonitor>().await.len(), 1);
        // no address yet, so no record
        assert!(store.all::<DNSRecord>().await.is_empty());
    }

    #[tokio::test]
    async fn dns_record_follows_load_balancer_address() {
        let (ctx, store, _) = context();
        let ic = store
            .insert(&published_ingress_controller(
                "edge",
                "apps.example.com",
                EndpointPublishingStrategyType::LoadBalancerService,
            ))
            .await
            .unwrap();
        let ensurer = DependentResourceEnsurer::new(ctx);
        ensurer.ensure(&ic, &dns_config()).await.unwrap();
        assign_address(&store, "router-edge").await;

        let ensured = ensurer.ensure(&ic, &dns_config()).await.unwrap();
        assert!(!ensured.awaiting_address);
        let records = store.all::<DNSRecord>().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].spec.dns_name, "*.apps.example.com.");
        assert_eq!(records[0].spec.targets, vec!["lb.example.net".to_string()]);
    }

    #[tokio::test]
    async fn host_network_has_no_load_balancer() {
        let (ctx, store, _) = context();
        let ic = store
            .insert(&published_ingress_controller(
                "edge",
                "apps.example.com",
                EndpointPublishingStrategyType::HostNetwork,
            ))
            .await
            .unwrap();
        let ensured = DependentResourceEnsurer::new(ctx).ensure(&ic, &dns_config()).await.unwrap();
        assert!(ensured.lb_service.is_none());
        assert!(!ensured.awaiting_address);
        let services = store.all::<Service>().await;
        assert_eq!(services.len(), 1);
        assert_eq!(
            services[0].metadata.name.as_deref(),
            Some("router-internal-edge")
        );
    }

    #[tokio::test]
    async fn second_pass_creates_nothing() {
        let (ctx, store, _) = context();
        let ic = store
            .insert(&published_ingress_controller(
                "edge",
                "apps.example.com",
                EndpointPublishingStrategyType::LoadBalancerService,
            ))
            .await
            .unwrap();
        let ensurer = DependentResourceEnsurer::new(ctx);
        ensurer.ensure(&ic, &dns_config()).await.unwrap();
        let owners_before: Vec<_> = store
            .all::<Service>()
            .await
            .into_iter()
            .map(|s| s.metadata.owner_references)
            .collect();
        store.reset_calls().await;

        ensurer.ensure(&ic, &dns_config()).await.unwrap();
        assert_eq!(store.count_verb(Verb::Create).await, 0);
        assert_eq!(store.count_verb(Verb::Update).await, 0);
        let owners_after: Vec<_> = store
            .all::<Service>()
            .await
            .into_iter()
            .map(|s| s.metadata.owner_references)
            .collect();
        assert_eq!(owners_before, owners_after);
    }

    #[tokio::test]
    async fn metrics_failure_does_not_block_services() {
        let (ctx, store, _) = context();
        let ic = store
            .insert(&published_ingress_controller(
                "edge",
                "apps.example.com",
                EndpointPublishingStrategyType::LoadBalancerService,
            ))
            .await
            .unwrap();
        store.fail::<Secret>(Verb::Create).await;
        store.fail::<ServiceMonitor>(Verb::Get).await;

        let err = DependentResourceEnsurer::new(ctx)
            .ensure(&ic, &dns_config())
            .await
            .unwrap_err();
        assert_eq!(err.cause_count(), 2);
        assert_eq!(store.all::<Service>().await.len(), 2);
        // siblings of the failing pieces still converge
        assert_eq!(store.all::<Role>().await.len(), 1);
        assert_eq!(store.all::<RoleBinding>().await.len(), 1);
    }

    #[tokio::test]
    async fn deployment_failure_stops_the_pass() {
        let (ctx, store, _) = context();
        let ic = store
            .insert(&published_ingress_controller(
                "edge",
                "apps.example.com",
                EndpointPublishingStrategyType::LoadBalancerService,
            ))
            .await
            .unwrap();
        store.fail::<Deployment>(Verb::Create).await;
        assert!(DependentResourceEnsurer::new(ctx).ensure(&ic, &dns_config()).await.is_err());
        assert!(store.all::<Service>().await.is_empty());
    }

    #[tokio::test]
    async fn replica_drift_is_corrected() {
        let (ctx, store, _) = context();
        let mut ic = published_ingress_controller(
            "edge",
            "apps.example.com",
            EndpointPublishingStrategyType::HostNetwork,
        );
        ic = store.insert(&ic).await.unwrap();
        let ensurer = DependentResourceEnsurer::new(ctx);
        ensurer.ensure(&ic, &dns_config()).await.unwrap();

        ic.spec.replicas = Some(5);
        let ensured = ensurer.ensure(&ic, &dns_config()).await.unwrap();
        let dep = ensured.deployment.unwrap();
        assert_eq!(dep.spec.unwrap().replicas, Some(5));
        assert_eq!(store.count::<Deployment>(Verb::Update).await, 1);
        assert_eq!(store.count::<Deployment>(Verb::Create).await, 1);
    }

    #[tokio::test]
    async fn dns_record_tracks_a_new_address() {
        let (ctx, store, recorder) = context();
        let ic = load_balanced(&store).await;
        let ensurer = DependentResourceEnsurer::new(ctx);
        ensurer.ensure(&ic, &dns_config()).await.unwrap();
        assign_address(&store, "router-edge").await;
        ensurer.ensure(&ic, &dns_config()).await.unwrap();

        assign(
            &store,
            "router-edge",
            LoadBalancerIngress {
                ip: Some("198.51.100.7".into()),
                ..Default::default()
            },
        )
        .await;
        store.reset_calls().await;
        ensurer.ensure(&ic, &dns_config()).await.unwrap();

        let record: DNSRecord =
            store.get(&router_ns_key("edge-wildcard")).await.unwrap();
        assert_eq!(record.spec.record_type, DNSRecordType::A);
        assert_eq!(record.spec.targets, vec!["198.51.100.7".to_string()]);
        assert_eq!(store.count::<DNSRecord>(Verb::Update).await, 1);
        assert_eq!(store.count::<DNSRecord>(Verb::Create).await, 0);
        assert!(
            recorder
                .reasons()
                .await
                .iter()
                .any(|r| r == REASON_UPDATED)
        );
    }

    #[tokio::test]
    async fn dns_record_follows_configured_zones() {
        let (ctx, store, _) = context();
        let ic = load_balanced(&store).await;
        let ensurer = DependentResourceEnsurer::new(ctx);
        ensurer.ensure(&ic, &dns_config()).await.unwrap();
        assign_address(&store, "router-edge").await;
        ensurer.ensure(&ic, &dns_config()).await.unwrap();

        let record: DNSRecord =
            store.get(&router_ns_key("edge-wildcard")).await.unwrap();
        assert_eq!(
            record.spec.zones,
            vec![zone("private-zone"), zone("public-zone")]
        );

        // public zone dropped from the cluster config
        let mut dns = dns_config();
        dns.spec.public_zone = None;
        ensurer.ensure(&ic, &dns).await.unwrap();
        let record: DNSRecord =
            store.get(&router_ns_key("edge-wildcard")).await.unwrap();
        assert_eq!(record.spec.zones, vec![zone("private-zone")]);

        // no zones left: the record is withdrawn and not recreated
        let unzoned = DNS::new("cluster", DNSSpec::default());
        let ensured = ensurer.ensure(&ic, &unzoned).await.unwrap();
        assert!(!ensured.awaiting_address);
        assert!(store.all::<DNSRecord>().await.is_empty());
        store.reset_calls().await;
        ensurer.ensure(&ic, &unzoned).await.unwrap();
        assert_eq!(store.count::<DNSRecord>(Verb::Create).await, 0);
    }

    #[tokio::test]
    async fn load_balancer_service_drift_is_corrected() {
        let (ctx, store, _) = context();
        let ic = load_balanced(&store).await;
        let ensurer = DependentResourceEnsurer::new(ctx);
        ensurer.ensure(&ic, &dns_config()).await.unwrap();

        let mut lb: Service = store.get(&router_ns_key("router-edge")).await.unwrap();
        let spec = lb.spec.as_mut().unwrap();
        spec.type_ = Some("NodePort".into());
        let ports = spec.ports.as_mut().unwrap();
        ports[0].node_port = Some(30080);
        ports[1].port = 8443;
        store.update(&lb).await.unwrap();
        store.reset_calls().await;

        ensurer.ensure(&ic, &dns_config()).await.unwrap();
        let lb: Service = store.get(&router_ns_key("router-edge")).await.unwrap();
        let spec = lb.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        let ports = spec.ports.unwrap();
        assert_eq!(ports[1].port, 443);
        // allocated node ports survive the correction
        assert_eq!(ports[0].node_port, Some(30080));
        assert_eq!(store.count::<Service>(Verb::Update).await, 1);
    }

    #[tokio::test]
    async fn internal_service_drift_is_corrected() {
        let (ctx, store, _) = context();
        let ic = load_balanced(&store).await;
        let ensurer = DependentResourceEnsurer::new(ctx);
        ensurer.ensure(&ic, &dns_config()).await.unwrap();

        let key = router_ns_key("router-internal-edge");
        let mut svc: Service = store.get(&key).await.unwrap();
        let spec = svc.spec.as_mut().unwrap();
        spec.selector = Some([("app".to_string(), "other".to_string())].into());
        spec.ports.as_mut().unwrap().pop();
        store.update(&svc).await.unwrap();
        store.reset_calls().await;

        ensurer.ensure(&ic, &dns_config()).await.unwrap();
        let svc: Service = store.get(&key).await.unwrap();
        let spec = svc.spec.unwrap();
        assert_eq!(
            spec.selector.unwrap()[crate::templates::DEPLOYMENT_LABEL],
            "edge"
        );
        let names: Vec<_> = spec
            .ports
            .unwrap()
            .into_iter()
            .filter_map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["http", "https", "metrics"]);
        assert_eq!(store.count::<Service>(Verb::Update).await, 1);
    }

    #[test]
    fn server_defaults_are_not_drift() {
        let mut desired = Service::default();
        desired.spec = Some(k8s_openapi::api::core::v1::ServiceSpec {
            type_: Some("ClusterIP".into()),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        });
        let mut current = desired.clone();
        let spec = current.spec.as_mut().unwrap();
        spec.cluster_ip = Some("10.0.0.12".into());
        let port = &mut spec.ports.as_mut().unwrap()[0];
        port.protocol = Some("TCP".into());
        port.target_port = Some(IntOrString::Int(80));
        assert!(!service_drifted(&current, &desired));
    }
}
