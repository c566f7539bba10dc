//! Load balancer status derived from pool metadata.

use super::Owner;
use edgelb_client::PoolMetadata;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus};
use k8s_openapi::api::networking::v1::{IngressLoadBalancerIngress, IngressLoadBalancerStatus};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Addresses `owner`'s frontends are reachable at: public ones when the pool
/// reports any, private ones otherwise. Sorted and deduplicated.
pub fn frontend_addresses(metadata: &PoolMetadata, owner: &Owner) -> Vec<String> {
    let endpoints = metadata
        .frontends
        .iter()
        .filter(|f| owner.owns(&f.name))
        .flat_map(|f| f.endpoints.iter());

    let mut public = BTreeSet::new();
    let mut private = BTreeSet::new();
    for endpoint in endpoints {
        public.extend(endpoint.public.iter().cloned());
        private.extend(endpoint.private.iter().cloned());
    }

    if public.is_empty() {
        private.into_iter().collect()
    } else {
        public.into_iter().collect()
    }
}

fn is_ip(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok()
}

pub fn service_status(addresses: &[String]) -> LoadBalancerStatus {
    LoadBalancerStatus {
        ingress: Some(
            addresses
                .iter()
                .map(|a| {
                    if is_ip(a) {
                        LoadBalancerIngress {
                            ip: Some(a.clone()),
                            ..Default::default()
                        }
                    } else {
                        LoadBalancerIngress {
                            hostname: Some(a.clone()),
                            ..Default::default()
                        }
                    }
                })
                .collect(),
        ),
    }
}

pub fn ingress_status(addresses: &[String]) -> IngressLoadBalancerStatus {
    IngressLoadBalancerStatus {
        ingress: Some(
            addresses
                .iter()
                .map(|a| {
                    if is_ip(a) {
                        IngressLoadBalancerIngress {
                            ip: Some(a.clone()),
                            ..Default::default()
                        }
                    } else {
                        IngressLoadBalancerIngress {
                            hostname: Some(a.clone()),
                            ..Default::default()
                        }
                    }
                })
                .collect(),
        ),
    }
}

/// Whether the Service already reports exactly these addresses
pub fn service_status_matches(current: Option<&LoadBalancerStatus>, desired: &LoadBalancerStatus) -> bool {
    let current = current.and_then(|s| s.ingress.clone()).unwrap_or_default();
    current == desired.ingress.clone().unwrap_or_default()
}

/// Whether the Ingress already reports exactly these addresses
pub fn ingress_status_matches(
    current: Option<&IngressLoadBalancerStatus>,
    desired: &IngressLoadBalancerStatus,
) -> bool {
    let current = current.and_then(|s| s.ingress.clone()).unwrap_or_default();
    current == desired.ingress.clone().unwrap_or_default()
}
