//! Kubernetes Events emitted on translated Ingresses and Services.
//!
//! Publishing is fire-and-forget: a failed event is logged and never fails
//! the reconciliation that produced it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Name under which dklb reports events
pub const REPORTING_CONTROLLER: &str = "dklb";

/// Publishes Kubernetes Events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] backed by `kube_runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: REPORTING_CONTROLLER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: actions::TRANSLATE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    pub const TRANSLATION_PAUSED: &str = "TranslationPaused";
    pub const INVALID_ANNOTATIONS: &str = "InvalidAnnotations";
    pub const TRANSLATION_ERROR: &str = "TranslationError";
    pub const POOL_CREATED: &str = "PoolCreated";
    pub const POOL_UPDATED: &str = "PoolUpdated";
    pub const POOL_DELETED: &str = "PoolDeleted";
    /// The creation strategy forbids creating the missing pool
    pub const POOL_NOT_CREATED: &str = "PoolNotCreated";
}

pub mod actions {
    pub const TRANSLATE: &str = "Translate";
}
