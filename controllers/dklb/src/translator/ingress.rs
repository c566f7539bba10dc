//! Ingress → pool entries: an HTTP and/or HTTPS frontend routing hosts and
//! paths to one HTTP backend per referenced service port.

use super::{Contribution, Owner, node_port_service};
use crate::cache::{CacheError, ResourceCache};
use crate::config::Config;
use crate::error::ControllerError;
use dklb_spec::{HttpMode, IngressPoolSpec, SpecError};
use edgelb_client::{
    Backend, BackendMapping, Frontend, LinkBackend, Protocol, RedirectToHttps,
};
use k8s_openapi::api::networking::v1::{Ingress, IngressServiceBackend};
use kube::ResourceExt;
use std::collections::BTreeMap;

/// A service port referenced by an Ingress
struct BackendRef<'a> {
    service: &'a str,
    port: PortRef<'a>,
}

enum PortRef<'a> {
    Number(i32),
    Name(&'a str),
}

impl<'a> BackendRef<'a> {
    fn from_backend(backend: &'a IngressServiceBackend) -> Option<Self> {
        let port = backend.port.as_ref()?;
        let port = match (port.number, port.name.as_deref()) {
            (Some(number), _) => PortRef::Number(number),
            (None, Some(name)) => PortRef::Name(name),
            (None, None) => return None,
        };
        Some(Self {
            service: &backend.name,
            port,
        })
    }

    fn label(&self) -> String {
        match self.port {
            PortRef::Number(n) => format!("{}:{}", self.service, n),
            PortRef::Name(n) => format!("{}:{}", self.service, n),
        }
    }
}

/// Host/path rule of an Ingress, in declaration order
struct Route<'a> {
    host: Option<&'a str>,
    path: Option<&'a str>,
    backend: BackendRef<'a>,
}

fn default_backend(ingress: &Ingress) -> Option<BackendRef<'_>> {
    ingress
        .spec
        .as_ref()?
        .default_backend
        .as_ref()?
        .service
        .as_ref()
        .and_then(BackendRef::from_backend)
}

fn routes(ingress: &Ingress) -> Vec<Route<'_>> {
    let Some(rules) = ingress.spec.as_ref().and_then(|s| s.rules.as_ref()) else {
        return Vec::new();
    };
    rules
        .iter()
        .flat_map(|rule| {
            rule.http
                .iter()
                .flat_map(|http| http.paths.iter())
                .filter_map(move |path| {
                    let backend = path.backend.service.as_ref().and_then(BackendRef::from_backend)?;
                    Some(Route {
                        host: rule.host.as_deref(),
                        path: path.path.as_deref(),
                        backend,
                    })
                })
        })
        .collect()
}

/// Whether the Ingress routes any traffic to the named Service
pub fn references_service(ingress: &Ingress, service_name: &str) -> bool {
    default_backend(ingress).is_some_and(|b| b.service == service_name)
        || routes(ingress).iter().any(|r| r.backend.service == service_name)
}

fn resolve_node_port(
    cache: &dyn ResourceCache,
    namespace: &str,
    backend: &BackendRef<'_>,
) -> Result<i32, ControllerError> {
    let service = cache
        .get_service(namespace, backend.service)
        .map_err(|CacheError::NotFound { .. }| {
            ControllerError::MissingDependency(format!(
                "service {}/{} referenced by the ingress does not exist",
                namespace, backend.service
            ))
        })?;
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| {
            ports.iter().find(|p| match backend.port {
                PortRef::Number(n) => p.port == n,
                PortRef::Name(name) => p.name.as_deref() == Some(name),
            })
        })
        .and_then(|p| p.node_port)
        .ok_or_else(|| {
            ControllerError::MissingDependency(format!(
                "service port {} has no node port",
                backend.label()
            ))
        })
}

/// Name of the DC/OS secret a Kubernetes TLS secret is mirrored to
pub fn dcos_secret_name(cluster_name: &str, namespace: &str, secret: &str) -> String {
    format!("{}__{}__{}", cluster_name.replace('/', "."), namespace, secret)
}

/// Entries `ingress` contributes to its pool
pub fn ingress_contribution(
    owner: Owner,
    ingress: &Ingress,
    spec: &IngressPoolSpec,
    cache: &dyn ResourceCache,
    config: &Config,
) -> Result<Contribution, ControllerError> {
    let namespace = ingress.namespace().unwrap_or_default();
    let default = default_backend(ingress);
    let routes = routes(ingress);
    if default.is_none() && routes.is_empty() {
        return Err(SpecError::Invalid(
            "the ingress does not reference any service backend".to_string(),
        )
        .into());
    }

    let mut backends = BTreeMap::new();
    for backend in default.iter().chain(routes.iter().map(|r| &r.backend)) {
        let name = owner.entry_name(&backend.label());
        if backends.contains_key(&name) {
            continue;
        }
        let node_port = resolve_node_port(cache, &namespace, backend)?;
        backends.insert(
            name.clone(),
            Backend {
                name,
                protocol: Protocol::Http,
                balance: Some("roundrobin".to_string()),
                services: vec![node_port_service(config, node_port)],
                extra: Default::default(),
            },
        );
    }

    let mut map: Vec<BackendMapping> = routes
        .iter()
        .map(|route| BackendMapping {
            host_eq: route.host.map(str::to_string),
            path_beg: route.path.map(str::to_string),
            backend: owner.entry_name(&route.backend.label()),
            ..Default::default()
        })
        .collect();
    // HAProxy takes the first match; longer prefixes must win.
    map.sort_by_key(|m| std::cmp::Reverse(m.path_beg.as_ref().map_or(0, String::len)));

    let link_backend = LinkBackend {
        default_backend: default.as_ref().map(|b| owner.entry_name(&b.label())),
        map,
        ..Default::default()
    };

    let mut frontends = Vec::new();
    if spec.http.mode != HttpMode::Disabled {
        frontends.push(Frontend {
            name: owner.entry_name("http"),
            bind_address: Some("0.0.0.0".to_string()),
            bind_port: spec.http.port,
            protocol: Protocol::Http,
            certificates: Vec::new(),
            redirect_to_https: (spec.http.mode == HttpMode::Redirect)
                .then(RedirectToHttps::default),
            link_backend: link_backend.clone(),
            extra: Default::default(),
        });
    }
    if spec.tls {
        let mut certificates = Vec::new();
        let tls = ingress.spec.as_ref().and_then(|s| s.tls.as_ref());
        for secret in tls.into_iter().flatten().filter_map(|t| t.secret_name.as_deref()) {
            cache.get_secret(&namespace, secret).map_err(|CacheError::NotFound { .. }| {
                ControllerError::MissingDependency(format!(
                    "tls secret {}/{} does not exist",
                    namespace, secret
                ))
            })?;
            certificates.push(format!(
                "$SECRETS/{}",
                dcos_secret_name(&config.cluster_name, &namespace, secret)
            ));
        }
        certificates.sort();
        certificates.dedup();
        frontends.push(Frontend {
            name: owner.entry_name("https"),
            bind_address: Some("0.0.0.0".to_string()),
            bind_port: spec.https.port,
            protocol: Protocol::Https,
            certificates,
            redirect_to_https: None,
            link_backend,
            extra: Default::default(),
        });
    }

    Ok(Contribution {
        owner,
        spec: spec.pool.clone(),
        frontends,
        backends: backends.into_values().collect(),
    })
}
