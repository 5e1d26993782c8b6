use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use super::{dns_record_name, owner_labels};
use crate::crd::{
    DNS, DNSRecord, DNSRecordSpec, DNSRecordType, IngressController,
};

pub const DEFAULT_RECORD_TTL: i64 = 30;

/// First address the cloud provider assigned to a load balancer service.
/// Hostnames win over IPs, matching what providers publish.
pub fn load_balancer_address(svc: &Service) -> Option<(DNSRecordType, String)> {
    let ingress = svc.status.as_ref()?.load_balancer.as_ref()?.ingress.as_ref()?;
    ingress.iter().find_map(|i| {
        match (i.hostname.as_deref(), i.ip.as_deref()) {
            (Some(h), _) if !h.is_empty() => {
                Some((DNSRecordType::CNAME, h.to_string()))
            }
            (_, Some(ip)) if !ip.is_empty() => {
                Some((DNSRecordType::A, ip.to_string()))
            }
            _ => None,
        }
    })
}

/// Wildcard record for the published domain pointing at the load balancer,
/// published to every zone of the cluster DNS config. `None` while the domain
/// is unpublished, no address is assigned yet or no zone is configured.
pub fn wildcard_dns_record(
    ic: &IngressController,
    lb_service: &Service,
    owner: &OwnerReference,
    dns: &DNS,
) -> Option<DNSRecord> {
    let domain = ic.status_domain()?;
    let (record_type, target) = load_balancer_address(lb_service)?;
    let zones = dns.zones();
    if zones.is_empty() {
        return None;
    }
    let name = ic.name_any();
    let mut record = DNSRecord::new(
        &dns_record_name(&name),
        DNSRecordSpec {
            dns_name: format!("*.{}.", domain),
            record_type,
            targets: vec![target],
            record_ttl: DEFAULT_RECORD_TTL,
            zones,
        },
    );
    record.metadata.namespace = lb_service.metadata.namespace.clone();
    record.metadata.labels = Some(owner_labels(&name));
    record.metadata.owner_references = Some(vec![owner.clone()]);
    Some(record)
}
