//! Service → pool entries: one TCP frontend and backend per exposed port.

use super::{Contribution, Owner, node_port_service};
use crate::config::Config;
use crate::error::ControllerError;
use dklb_spec::ServicePoolSpec;
use edgelb_client::{Backend, Frontend, LinkBackend, Protocol};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

/// Entries `service` contributes to its pool
pub fn service_contribution(
    owner: Owner,
    service: &Service,
    spec: &ServicePoolSpec,
    config: &Config,
) -> Result<Contribution, ControllerError> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_deref())
        .unwrap_or_default();

    let mut frontends = Vec::with_capacity(spec.frontends.len());
    let mut backends = Vec::with_capacity(spec.frontends.len());
    for frontend in &spec.frontends {
        let node_port = ports
            .iter()
            .find(|p| p.port == frontend.service_port)
            .and_then(|p| p.node_port)
            .ok_or_else(|| {
                ControllerError::MissingDependency(format!(
                    "no node port allocated for port {} of service {}/{}",
                    frontend.service_port,
                    service.namespace().unwrap_or_default(),
                    service.name_any()
                ))
            })?;

        let name = owner.entry_name(&frontend.service_port.to_string());
        backends.push(Backend {
            name: name.clone(),
            protocol: Protocol::Tcp,
            balance: Some("roundrobin".to_string()),
            services: vec![node_port_service(config, node_port)],
            extra: Default::default(),
        });
        frontends.push(Frontend {
            name: name.clone(),
            bind_address: Some("0.0.0.0".to_string()),
            bind_port: frontend.port,
            protocol: Protocol::Tcp,
            certificates: Vec::new(),
            redirect_to_https: None,
            link_backend: LinkBackend {
                default_backend: Some(name),
                ..Default::default()
            },
            extra: Default::default(),
        });
    }

    Ok(Contribution {
        owner,
        spec: spec.pool.clone(),
        frontends,
        backends,
    })
}
