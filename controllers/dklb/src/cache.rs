//! Read-only view of the cluster state the controllers work from.

use crate::engine::CacheSync;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Cache lookup errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// The object is not in the cache; a normal outcome for deleted objects
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
}

impl CacheError {
    pub(crate) fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Snapshot access to Ingresses, Services and Secrets.
///
/// Returned objects are shared snapshots; clone before mutating.
pub trait ResourceCache: CacheSync {
    fn get_ingress(&self, namespace: &str, name: &str) -> Result<Arc<Ingress>, CacheError>;
    fn list_ingresses(&self, namespace: &str) -> Result<Vec<Arc<Ingress>>, CacheError>;
    fn get_service(&self, namespace: &str, name: &str) -> Result<Arc<Service>, CacheError>;
    fn list_services(&self, namespace: &str) -> Result<Vec<Arc<Service>>, CacheError>;
    fn get_secret(&self, namespace: &str, name: &str) -> Result<Arc<Secret>, CacheError>;
}

/// [`ResourceCache`] backed by informer stores
#[derive(Clone)]
pub struct KubeCache {
    ingresses: Store<Ingress>,
    services: Store<Service>,
    secrets: Store<Secret>,
    synced: Vec<Arc<AtomicBool>>,
}

impl KubeCache {
    pub fn new(
        ingresses: (Store<Ingress>, Arc<AtomicBool>),
        services: (Store<Service>, Arc<AtomicBool>),
        secrets: (Store<Secret>, Arc<AtomicBool>),
    ) -> Self {
        Self {
            ingresses: ingresses.0,
            services: services.0,
            secrets: secrets.0,
            synced: vec![ingresses.1, services.1, secrets.1],
        }
    }
}

fn get<K>(store: &Store<K>, kind: &'static str, namespace: &str, name: &str) -> Result<Arc<K>, CacheError>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .get(&ObjectRef::new(name).within(namespace))
        .ok_or_else(|| CacheError::not_found(kind, namespace, name))
}

fn list<K>(store: &Store<K>, namespace: &str) -> Vec<Arc<K>>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .state()
        .into_iter()
        .filter(|obj| obj.namespace().as_deref() == Some(namespace))
        .collect()
}

impl CacheSync for KubeCache {
    fn has_synced(&self) -> bool {
        self.synced.iter().all(|s| s.load(Ordering::SeqCst))
    }
}

impl ResourceCache for KubeCache {
    fn get_ingress(&self, namespace: &str, name: &str) -> Result<Arc<Ingress>, CacheError> {
        get(&self.ingresses, "Ingress", namespace, name)
    }

    fn list_ingresses(&self, namespace: &str) -> Result<Vec<Arc<Ingress>>, CacheError> {
        Ok(list(&self.ingresses, namespace))
    }

    fn get_service(&self, namespace: &str, name: &str) -> Result<Arc<Service>, CacheError> {
        get(&self.services, "Service", namespace, name)
    }

    fn list_services(&self, namespace: &str) -> Result<Vec<Arc<Service>>, CacheError> {
        Ok(list(&self.services, namespace))
    }

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Arc<Secret>, CacheError> {
        get(&self.secrets, "Secret", namespace, name)
    }
}
