//! Pool specification for `Service` resources of type `LoadBalancer`.

use crate::annotations;
use crate::error::SpecError;
use crate::pool::{DefaultingContext, PoolConfig, PoolSpec};
use k8s_openapi::api::core::v1::{Service, ServicePort};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Service type handled by dklb
pub const LOAD_BALANCER: &str = "LoadBalancer";

/// Whether the Service asks for a load balancer.
pub fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == LOAD_BALANCER)
}

/// Frontend mapping as written by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceFrontendConfig {
    pub service_port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// The `dklb-config` block of a Service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub pool: PoolConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontends: Option<Vec<ServiceFrontendConfig>>,
}

/// Exposes `service_port` of the Service on `port` of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFrontend {
    pub port: i32,
    pub service_port: i32,
}

/// Fully defaulted and validated pool specification of a Service
#[derive(Debug, Clone, PartialEq)]
pub struct ServicePoolSpec {
    pub pool: PoolSpec,
    /// One entry per TCP service port, in service port order
    pub frontends: Vec<ServiceFrontend>,
}

impl ServicePoolSpec {
    /// Value of the `dklb-config` annotation describing this specification.
    ///
    /// Only remapped ports are written; ports bound to their own number are
    /// the default and follow the Service as its ports change.
    pub fn to_annotation_value(&self) -> Result<String, SpecError> {
        let remapped: Vec<ServiceFrontendConfig> = self
            .frontends
            .iter()
            .filter(|f| f.port != f.service_port)
            .map(|f| ServiceFrontendConfig {
                service_port: f.service_port,
                port: Some(f.port),
            })
            .collect();
        let config = ServiceConfig {
            pool: self.pool.to_config(),
            frontends: (!remapped.is_empty()).then_some(remapped),
        };
        Ok(serde_yaml::to_string(&config)?)
    }
}

fn is_tcp(port: &ServicePort) -> bool {
    port.protocol.as_deref().is_none_or(|p| p == "TCP")
}

/// Parse, default and validate the pool specification of a Service.
pub fn compute_service_spec(
    service: &Service,
    ctx: &DefaultingContext<'_>,
) -> Result<ServicePoolSpec, SpecError> {
    let meta = &service.metadata;
    let mut config: ServiceConfig = match annotations::get(meta, annotations::CONFIG) {
        Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str(raw)?,
        _ => ServiceConfig::default(),
    };
    config.pool.overlay_annotations(meta)?;

    let ports: Vec<&ServicePort> = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map(|ports| ports.iter().filter(|p| is_tcp(p)).collect())
        .unwrap_or_default();

    // Mappings in the config block outlive ports removed from the Service
    let mut mappings: Vec<ServiceFrontendConfig> = config
        .frontends
        .unwrap_or_default()
        .into_iter()
        .filter(|m| ports.iter().any(|p| p.port == m.service_port))
        .collect();
    let mut explicit = Vec::new();
    for (key, value) in meta.annotations.iter().flatten() {
        let Some(suffix) = key.strip_prefix(annotations::SERVICE_PORT_MAP_PREFIX) else {
            continue;
        };
        let service_port = suffix
            .parse::<i32>()
            .map_err(|_| SpecError::parse(suffix, "a service port"))?;
        let port = value.trim().parse::<i32>().map_err(|_| {
            SpecError::parse(value, format!("the frontend port for service port {}", service_port))
        })?;
        if !ports.iter().any(|p| p.port == service_port) {
            return Err(SpecError::Invalid(format!(
                "service port {} referenced by a frontend is not a TCP port of the service",
                service_port
            )));
        }
        mappings.retain(|m| m.service_port != service_port);
        explicit.push(ServiceFrontendConfig {
            service_port,
            port: Some(port),
        });
    }
    mappings.extend(explicit);

    let pool = config.pool.resolve(meta, ctx);
    pool.validate()?;

    let mut frontends = Vec::with_capacity(ports.len());
    let mut bound = HashSet::new();
    for service_port in ports {
        let port = mappings
            .iter()
            .find(|m| m.service_port == service_port.port)
            .and_then(|m| m.port)
            .unwrap_or(service_port.port);
        if !(1..=65535).contains(&port) {
            return Err(SpecError::Invalid(format!(
                "{} is not a valid frontend port: it must be between 1 and 65535",
                port
            )));
        }
        if !bound.insert(port) {
            return Err(SpecError::Invalid(format!(
                "frontend port {} is used more than once",
                port
            )));
        }
        frontends.push(ServiceFrontend {
            port,
            service_port: service_port.port,
        });
    }

    Ok(ServicePoolSpec { pool, frontends })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn service(annotations: &[(&str, &str)], ports: &[(i32, &str)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("redis".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some(LOAD_BALANCER.to_string()),
                ports: Some(
                    ports
                        .iter()
                        .map(|(port, protocol)| ServicePort {
                            port: *port,
                            protocol: Some(protocol.to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            status: None,
        }
    }

    const CTX: DefaultingContext<'static> = DefaultingContext {
        cluster_name: "dev",
        random_suffix: None,
    };

    #[test]
    fn test_default_frontends_follow_tcp_ports() {
        let svc = service(&[], &[(6379, "TCP"), (53, "UDP"), (8080, "TCP")]);
        let spec = compute_service_spec(&svc, &CTX).unwrap();
        assert_eq!(
            spec.frontends,
            vec![
                ServiceFrontend { port: 6379, service_port: 6379 },
                ServiceFrontend { port: 8080, service_port: 8080 },
            ]
        );
        assert!(is_load_balancer(&svc));
    }

    #[test]
    fn test_port_map_annotation() {
        let svc = service(
            &[("kubernetes.dcos.io/edgelb-pool-portmap.6379", "16379")],
            &[(6379, "TCP")],
        );
        let spec = compute_service_spec(&svc, &CTX).unwrap();
        assert_eq!(spec.frontends[0].port, 16379);
    }

    #[test]
    fn test_port_map_must_reference_existing_port() {
        let svc = service(
            &[("kubernetes.dcos.io/edgelb-pool-portmap.80", "8080")],
            &[(6379, "TCP")],
        );
        let err = compute_service_spec(&svc, &CTX).unwrap_err();
        assert!(err.to_string().contains("service port 80"));
    }

    #[test]
    fn test_duplicate_frontend_ports() {
        let svc = service(
            &[("kubernetes.dcos.io/edgelb-pool-portmap.80", "443")],
            &[(80, "TCP"), (443, "TCP")],
        );
        let err = compute_service_spec(&svc, &CTX).unwrap_err();
        assert!(err.to_string().contains("used more than once"));
    }

    #[test]
    fn test_invalid_cpus() {
        let svc = service(&[(annotations::POOL_CPUS, "foo")], &[(80, "TCP")]);
        let err = compute_service_spec(&svc, &CTX).unwrap_err();
        assert!(err.to_string().contains("foo"));
        assert!(err.to_string().contains("cpus"));
    }

    #[test]
    fn test_annotation_value_round_trip() {
        let svc = service(
            &[(annotations::POOL_SIZE, "2")],
            &[(6379, "TCP"), (6380, "TCP")],
        );
        let ctx = DefaultingContext {
            cluster_name: "dev",
            random_suffix: Some("abcde"),
        };
        let spec = compute_service_spec(&svc, &ctx).unwrap();
        assert!(spec.pool.name.ends_with("--abcde"));

        let value = spec.to_annotation_value().unwrap();
        let persisted = service(&[(annotations::CONFIG, &value)], &[(6379, "TCP"), (6380, "TCP")]);
        let recomputed = compute_service_spec(&persisted, &CTX).unwrap();
        assert_eq!(recomputed, spec);
    }

    #[test]
    fn test_removing_a_port_after_defaulting() {
        let svc = service(&[], &[(80, "TCP"), (443, "TCP")]);
        let value = compute_service_spec(&svc, &CTX)
            .unwrap()
            .to_annotation_value()
            .unwrap();
        assert!(!value.contains("frontends"));

        let shrunk = service(&[(annotations::CONFIG, &value)], &[(80, "TCP")]);
        let spec = compute_service_spec(&shrunk, &CTX).unwrap();
        assert_eq!(spec.frontends, vec![ServiceFrontend { port: 80, service_port: 80 }]);
    }

    #[test]
    fn test_stale_remapping_in_config_block_is_dropped() {
        let svc = service(
            &[("kubernetes.dcos.io/edgelb-pool-portmap.443", "8443")],
            &[(80, "TCP"), (443, "TCP")],
        );
        let value = compute_service_spec(&svc, &CTX)
            .unwrap()
            .to_annotation_value()
            .unwrap();
        assert!(value.contains("8443"));

        let shrunk = service(&[(annotations::CONFIG, &value)], &[(80, "TCP")]);
        let spec = compute_service_spec(&shrunk, &CTX).unwrap();
        assert_eq!(spec.frontends, vec![ServiceFrontend { port: 80, service_port: 80 }]);

        // A remapped port that comes back keeps its persisted frontend port
        let restored = service(&[(annotations::CONFIG, &value)], &[(80, "TCP"), (443, "TCP")]);
        let spec = compute_service_spec(&restored, &CTX).unwrap();
        assert_eq!(spec.frontends[1], ServiceFrontend { port: 8443, service_port: 443 });
    }

    #[test]
    fn test_invalid_config_block() {
        let svc = service(&[(annotations::CONFIG, "cpus: [1")], &[(80, "TCP")]);
        assert!(matches!(
            compute_service_spec(&svc, &CTX),
            Err(SpecError::Config(_))
        ));
    }
}
