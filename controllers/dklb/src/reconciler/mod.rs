//! Ingress and Service reconciliation.
//!
//! Event handlers turn informer notifications into [`WorkItem`]s; the
//! reconcilers process one key at a time, either translating the object into
//! its pool or releasing what it contributed.

pub mod ingress;
pub mod service;


use crate::cache::ResourceCache;
use crate::config::Config;
use crate::error::ControllerError;
use crate::events::{EventPublisher, reasons};
use crate::translator::{PoolAction, SourceKind, Translator};
use crate::workqueue::Keyed;
use crate::writer::KubeWriter;
use dklb_spec::annotations::POOL_RECORD;
use dklb_spec::{DefaultingContext, PoolRecord, PoolSpec, SpecError, generate_pool_name};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube_runtime::events::EventType;
use std::sync::Arc;
use tracing::{debug, warn};

/// A unit of work for a reconciler
#[derive(Debug, Clone)]
pub enum WorkItem<K> {
    /// Look the object up in the cache
    Live(String),
    /// The object was deleted; its last known state
    Deleted(String, Arc<K>),
}

impl<K> WorkItem<K> {
    pub fn tombstone(&self) -> Option<&Arc<K>> {
        match self {
            Self::Live(_) => None,
            Self::Deleted(_, last) => Some(last),
        }
    }
}

impl<K: Clone + Send + Sync + 'static> Keyed for WorkItem<K> {
    fn key(&self) -> &str {
        match self {
            Self::Live(key) | Self::Deleted(key, _) => key,
        }
    }
}

/// Queue key of an object
pub fn key_for<K: ResourceExt>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Split a `namespace/name` key
pub fn split_key(key: &str) -> Result<(&str, &str), ControllerError> {
    match key.split_once('/') {
        Some((namespace, name))
            if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((namespace, name))
        }
        _ => Err(ControllerError::InvalidKey(key.to_string())),
    }
}

/// Everything a reconciler needs, shared by both kinds
pub struct Context {
    pub cache: Arc<dyn ResourceCache>,
    pub translator: Arc<Translator>,
    pub writer: Arc<dyn KubeWriter>,
    pub events: Arc<dyn EventPublisher>,
    pub config: Arc<Config>,
}

impl Context {
    /// Defaulting inputs used by the controllers. Pool names are never
    /// suffixed here: a suffixed name only exists once admission persisted it.
    pub fn defaulting(&self) -> DefaultingContext<'_> {
        DefaultingContext {
            cluster_name: &self.config.cluster_name,
            random_suffix: None,
        }
    }

    /// Pool an object's entries must be removed from.
    ///
    /// Prefers the pool it was last applied to, then the pool its current
    /// annotations name, then the name it would have been given by default.
    pub fn pool_to_release(&self, meta: &ObjectMeta, computed: Result<String, SpecError>) -> String {
        match PoolRecord::from_meta(meta) {
            Ok(Some(record)) => return record.name,
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable pool record: {}", e),
        }
        computed.unwrap_or_else(|e| {
            debug!("Falling back to the default pool name: {}", e);
            generate_pool_name(
                &self.config.cluster_name,
                meta.namespace.as_deref().unwrap_or_default(),
                meta.name.as_deref().unwrap_or_default(),
                None,
            )
        })
    }

    /// Persist the identity of the pool the object now lives in, if it changed.
    pub async fn record_pool(
        &self,
        kind: SourceKind,
        meta: &ObjectMeta,
        spec: &PoolSpec,
    ) -> Result<(), ControllerError> {
        let record = PoolRecord::from(spec);
        if PoolRecord::from_meta(meta).ok().flatten().as_ref() == Some(&record) {
            return Ok(());
        }
        self.writer
            .set_annotation(
                kind,
                meta.namespace.as_deref().unwrap_or_default(),
                meta.name.as_deref().unwrap_or_default(),
                POOL_RECORD,
                Some(&record.to_annotation_value()?),
            )
            .await
    }

    /// Drop the pool record of an object that no longer lives in a pool, so
    /// it may be re-enabled with a different one.
    pub async fn forget_pool(&self, kind: SourceKind, meta: &ObjectMeta) -> Result<(), ControllerError> {
        if !meta.annotations.as_ref().is_some_and(|a| a.contains_key(POOL_RECORD)) {
            return Ok(());
        }
        self.writer
            .set_annotation(
                kind,
                meta.namespace.as_deref().unwrap_or_default(),
                meta.name.as_deref().unwrap_or_default(),
                POOL_RECORD,
                None,
            )
            .await
    }

    pub async fn announce(&self, object: &ObjectReference, action: &PoolAction, pool: &str) {
        let (type_, reason, note) = match action {
            PoolAction::Created => (
                EventType::Normal,
                reasons::POOL_CREATED,
                format!("created pool {}", pool),
            ),
            PoolAction::Updated => (
                EventType::Normal,
                reasons::POOL_UPDATED,
                format!("updated pool {}", pool),
            ),
            PoolAction::Deleted => (
                EventType::Normal,
                reasons::POOL_DELETED,
                format!("deleted pool {}", pool),
            ),
            PoolAction::NotCreated(strategy) => (
                EventType::Warning,
                reasons::POOL_NOT_CREATED,
                format!(
                    "pool {} does not exist and creation strategy {} does not allow creating it",
                    pool, strategy
                ),
            ),
            PoolAction::Unchanged | PoolAction::Absent => return,
        };
        self.events.publish(object, type_, reason, Some(note)).await;
    }

    pub async fn paused(&self, object: &ObjectReference) {
        self.events
            .publish(
                object,
                EventType::Normal,
                reasons::TRANSLATION_PAUSED,
                Some("translation is paused".to_string()),
            )
            .await;
    }

    pub async fn report_error(&self, object: &ObjectReference, err: &ControllerError) {
        let reason = match err {
            ControllerError::Spec(_) => reasons::INVALID_ANNOTATIONS,
            _ => reasons::TRANSLATION_ERROR,
        };
        self.events
            .publish(object, EventType::Warning, reason, Some(err.to_string()))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("default/web").unwrap(), ("default", "web"));
        for bad in ["web", "/web", "default/", "a/b/c"] {
            assert!(matches!(split_key(bad), Err(ControllerError::InvalidKey(_))));
        }
    }

    #[test]
    fn test_work_item_key() {
        let svc = Arc::new(Service::default());
        let live: WorkItem<Service> = WorkItem::Live("default/web".to_string());
        let gone = WorkItem::Deleted("default/web".to_string(), Arc::clone(&svc));
        assert_eq!(live.key(), gone.key());
        assert!(live.tombstone().is_none());
        assert!(gone.tombstone().is_some());
    }
}
