//! Writes back to the Kubernetes API: load balancer status and the pool
//! record annotation.

use crate::error::ControllerError;
use crate::translator::SourceKind;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LoadBalancerStatus, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressLoadBalancerStatus};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

/// Kubernetes write operations needed by the controllers
#[async_trait]
pub trait KubeWriter: Send + Sync {
    async fn update_service_status(
        &self,
        namespace: &str,
        name: &str,
        status: &LoadBalancerStatus,
    ) -> Result<(), ControllerError>;

    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IngressLoadBalancerStatus,
    ) -> Result<(), ControllerError>;

    /// Set `key` to `value`, or remove it when `value` is `None`.
    async fn set_annotation(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), ControllerError>;
}

/// [`KubeWriter`] talking to the API server
pub struct KubeClusterWriter {
    client: Client,
}

impl KubeClusterWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeWriter for KubeClusterWriter {
    async fn update_service_status(
        &self,
        namespace: &str,
        name: &str,
        status: &LoadBalancerStatus,
    ) -> Result<(), ControllerError> {
        debug!("Updating status of Service {}/{}", namespace, name);
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": { "loadBalancer": status } });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IngressLoadBalancerStatus,
    ) -> Result<(), ControllerError> {
        debug!("Updating status of Ingress {}/{}", namespace, name);
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": { "loadBalancer": status } });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
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
        match value {
            Some(_) => debug!("Setting annotation {} on {} {}/{}", key, kind, namespace, name),
            None => debug!("Removing annotation {} from {} {}/{}", key, kind, namespace, name),
        }
        // A null value deletes the key in a merge patch
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        let params = PatchParams::default();
        match kind {
            SourceKind::Service => {
                Api::<Service>::namespaced(self.client.clone(), namespace)
                    .patch(name, &params, &Patch::Merge(&patch))
                    .await?;
            }
            SourceKind::Ingress => {
                Api::<Ingress>::namespaced(self.client.clone(), namespace)
                    .patch(name, &params, &Patch::Merge(&patch))
                    .await?;
            }
        }
        Ok(())
    }
}
