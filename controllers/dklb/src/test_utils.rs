//! Test utilities for unit testing translators and reconcilers
//!
//! In-memory stand-ins for the cluster cache, the Kubernetes writer and the
//! event publisher, plus builders for the objects dklb watches.

use crate::cache::{CacheError, ResourceCache};
use crate::config::Config;
use crate::engine::CacheSync;
use crate::error::ControllerError;
use crate::events::EventPublisher;
use crate::reconciler::Context;
use crate::translator::{SourceKind, Translator};
use crate::writer::KubeWriter;
use async_trait::async_trait;
use dklb_spec::annotations;
use edgelb_client::{EdgeLBClientTrait, MockEdgeLBClient};
use k8s_openapi::api::core::v1::{
    LoadBalancerStatus, ObjectReference, Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressLoadBalancerStatus,
    IngressRule, IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube_runtime::events::EventType;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const CLUSTER: &str = "dev/kubernetes01";

/// Configuration used by every test
pub fn test_config() -> Config {
    let mut config = Config::from_lookup(|key| match key {
        "DKLB_CLUSTER_NAME" => Some(CLUSTER.to_string()),
        "DKLB_ADMISSION_DISABLED" => Some("true".to_string()),
        _ => None,
    })
    .unwrap();
    config.backend_framework_name = "kubernetes-cluster".to_string();
    config
}

type Objects<K> = Mutex<BTreeMap<(String, String), Arc<K>>>;

/// In-memory [`ResourceCache`]
pub struct FakeCache {
    ingresses: Objects<Ingress>,
    services: Objects<Service>,
    secrets: Objects<Secret>,
    synced: AtomicBool,
}

impl Default for FakeCache {
    fn default() -> Self {
        Self {
            ingresses: Mutex::default(),
            services: Mutex::default(),
            secrets: Mutex::default(),
            synced: AtomicBool::new(true),
        }
    }
}

fn key_of<K: ResourceExt>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

impl FakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub fn add_ingress(&self, ingress: Ingress) {
        self.ingresses.lock().insert(key_of(&ingress), Arc::new(ingress));
    }

    pub fn remove_ingress(&self, namespace: &str, name: &str) {
        self.ingresses.lock().remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn add_service(&self, service: Service) {
        self.services.lock().insert(key_of(&service), Arc::new(service));
    }

    pub fn remove_service(&self, namespace: &str, name: &str) {
        self.services.lock().remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn add_secret(&self, namespace: &str, name: &str) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.secrets.lock().insert(key_of(&secret), Arc::new(secret));
    }
}

fn get<K>(objects: &Objects<K>, kind: &'static str, namespace: &str, name: &str) -> Result<Arc<K>, CacheError> {
    objects
        .lock()
        .get(&(namespace.to_string(), name.to_string()))
        .cloned()
        .ok_or_else(|| CacheError::not_found(kind, namespace, name))
}

fn list<K>(objects: &Objects<K>, namespace: &str) -> Vec<Arc<K>> {
    objects
        .lock()
        .iter()
        .filter(|((ns, _), _)| ns == namespace)
        .map(|(_, obj)| Arc::clone(obj))
        .collect()
}

impl CacheSync for FakeCache {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

impl ResourceCache for FakeCache {
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

/// A write recorded by [`RecordingWriter`]
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    ServiceStatus(String, LoadBalancerStatus),
    IngressStatus(String, IngressLoadBalancerStatus),
    Annotation {
        kind: SourceKind,
        object: String,
        key: String,
        /// `None` when the annotation was removed
        value: Option<String>,
    },
}

/// [`KubeWriter`] that only records what it was asked to write
#[derive(Default)]
pub struct RecordingWriter {
    writes: Mutex<Vec<Write>>,
}

impl RecordingWriter {
    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().clone()
    }

    /// Last value written to `key` on any object, `None` if it was never
    /// written or was removed since
    pub fn annotation(&self, key: &str) -> Option<String> {
        self.writes
            .lock()
            .iter()
            .rev()
            .find_map(|w| match w {
                Write::Annotation { key: k, value, .. } if k == key => Some(value.clone()),
                _ => None,
            })
            .flatten()
    }

    /// Whether `key` was removed from `object` (`namespace/name`)
    pub fn removed_annotation(&self, object: &str, key: &str) -> bool {
        self.writes.lock().iter().any(|w| {
            matches!(w, Write::Annotation { object: o, key: k, value: None, .. } if o == object && k == key)
        })
    }
}

#[async_trait]
impl KubeWriter for RecordingWriter {
    async fn update_service_status(
        &self,
        namespace: &str,
        name: &str,
        status: &LoadBalancerStatus,
    ) -> Result<(), ControllerError> {
        self.writes
            .lock()
            .push(Write::ServiceStatus(format!("{}/{}", namespace, name), status.clone()));
        Ok(())
    }

    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IngressLoadBalancerStatus,
    ) -> Result<(), ControllerError> {
        self.writes
            .lock()
            .push(Write::IngressStatus(format!("{}/{}", namespace, name), status.clone()));
        Ok(())
    }

    async fn set_annotation(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), ControllerError> {
        self.writes.lock().push(Write::Annotation {
            kind,
            object: format!("{}/{}", namespace, name),
            key: key.to_string(),
            value: value.map(str::to_string),
        });
        Ok(())
    }
}

/// An event recorded by [`RecordingEvents`]
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub object: String,
    pub type_: EventType,
    pub reason: String,
    pub note: Option<String>,
}

/// [`EventPublisher`] that only records events
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        self.events.lock().push(RecordedEvent {
            object: format!(
                "{}/{}",
                object.namespace.as_deref().unwrap_or_default(),
                object.name.as_deref().unwrap_or_default()
            ),
            type_,
            reason: reason.to_string(),
            note,
        });
    }
}

/// Set annotations on any object
pub fn annotate<K: ResourceExt>(mut obj: K, pairs: &[(&str, &str)]) -> K {
    for (key, value) in pairs {
        obj.annotations_mut().insert(key.to_string(), value.to_string());
    }
    obj
}

/// A LoadBalancer Service exposing `(port, node_port)` pairs over TCP
pub fn lb_service(namespace: &str, name: &str, ports: &[(i32, i32)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(
                ports
                    .iter()
                    .map(|&(port, node_port)| ServicePort {
                        name: Some(format!("p{}", port)),
                        port,
                        node_port: Some(node_port),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

/// A ClusterIP Service, as referenced by Ingress backends
pub fn node_port_service(namespace: &str, name: &str, ports: &[(i32, i32)]) -> Service {
    let mut service = lb_service(namespace, name, ports);
    if let Some(spec) = service.spec.as_mut() {
        spec.type_ = Some("NodePort".to_string());
    }
    service
}

fn backend(service: &str, port: i32) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: service.to_string(),
            port: Some(ServiceBackendPort {
                number: Some(port),
                name: None,
            }),
        }),
        resource: None,
    }
}

/// An Ingress claimed by dklb, with `(host, path, service, port)` rules
pub fn edgelb_ingress(
    namespace: &str,
    name: &str,
    rules: &[(Option<&str>, &str, &str, i32)],
) -> Ingress {
    let rules = rules
        .iter()
        .map(|&(host, path, service, port)| IngressRule {
            host: host.map(str::to_string),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some(path.to_string()),
                    path_type: "Prefix".to_string(),
                    backend: backend(service, port),
                }],
            }),
        })
        .collect();
    let ingress = Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(rules),
            ..Default::default()
        }),
        status: None,
    };
    annotate(
        ingress,
        &[(annotations::INGRESS_CLASS, annotations::EDGELB_INGRESS_CLASS)],
    )
}

pub fn with_default_backend(mut ingress: Ingress, service: &str, port: i32) -> Ingress {
    if let Some(spec) = ingress.spec.as_mut() {
        spec.default_backend = Some(backend(service, port));
    }
    ingress
}

pub fn with_tls(mut ingress: Ingress, secret: &str) -> Ingress {
    if let Some(spec) = ingress.spec.as_mut() {
        spec.tls = Some(vec![IngressTLS {
            hosts: None,
            secret_name: Some(secret.to_string()),
        }]);
    }
    ingress
}

/// A reconciler [`Context`] wired to in-memory doubles
pub struct Harness {
    pub cache: Arc<FakeCache>,
    pub edgelb: MockEdgeLBClient,
    pub writer: Arc<RecordingWriter>,
    pub events: Arc<RecordingEvents>,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new() -> Self {
        let config = Arc::new(test_config());
        let cache = Arc::new(FakeCache::new());
        let edgelb = MockEdgeLBClient::new();
        let writer = Arc::new(RecordingWriter::default());
        let events = Arc::new(RecordingEvents::default());
        let client: Arc<dyn EdgeLBClientTrait> = Arc::new(edgelb.clone());
        let ctx = Arc::new(Context {
            cache: Arc::clone(&cache) as Arc<dyn ResourceCache>,
            translator: Arc::new(Translator::new(client, Arc::clone(&config))),
            writer: Arc::clone(&writer) as Arc<dyn KubeWriter>,
            events: Arc::clone(&events) as Arc<dyn EventPublisher>,
            config,
        });
        Self {
            cache,
            edgelb,
            writer,
            events,
            ctx,
        }
    }
}
