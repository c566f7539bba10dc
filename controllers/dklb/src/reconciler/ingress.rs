//! Ingress controller.
//!
//! Besides its own objects it follows Services: a backend Service gaining or
//! losing a node port changes the pool of every Ingress routing to it.

use super::{Context, WorkItem, key_for, split_key};
use crate::cache::{CacheError, ResourceCache};
use crate::engine::SyncHandler;
use crate::error::ControllerError;
use crate::translator::ingress::{ingress_contribution, references_service};
use crate::translator::status::{ingress_status, ingress_status_matches};
use crate::translator::{Owner, SourceKind};
use crate::watcher::EventHandler;
use crate::workqueue::{Keyed, WorkQueue};
use async_trait::async_trait;
use dklb_spec::annotations::is_paused;
use dklb_spec::{PoolRecord, compute_ingress_spec, is_edgelb_ingress};
use k8s_openapi::api::core::v1::{ObjectReference, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Queues Ingresses claimed by dklb
pub struct IngressEventHandler {
    queue: WorkQueue<WorkItem<Ingress>>,
}

impl IngressEventHandler {
    pub fn new(queue: WorkQueue<WorkItem<Ingress>>) -> Self {
        Self { queue }
    }
}

impl EventHandler<Ingress> for IngressEventHandler {
    fn on_add(&self, obj: &Arc<Ingress>) {
        if is_edgelb_ingress(obj) {
            self.queue.add(WorkItem::Live(key_for(obj.as_ref())));
        }
    }

    fn on_update(&self, old: &Arc<Ingress>, new: &Arc<Ingress>) {
        if is_edgelb_ingress(old) || is_edgelb_ingress(new) {
            self.queue.add(WorkItem::Live(key_for(new.as_ref())));
        }
    }

    fn on_delete(&self, obj: &Arc<Ingress>) {
        if is_edgelb_ingress(obj) {
            self.queue
                .add(WorkItem::Deleted(key_for(obj.as_ref()), Arc::clone(obj)));
        }
    }
}

/// Queues the Ingresses routing to a Service whenever that Service changes
pub struct ServiceFanout {
    queue: WorkQueue<WorkItem<Ingress>>,
    cache: Arc<dyn ResourceCache>,
}

impl ServiceFanout {
    pub fn new(queue: WorkQueue<WorkItem<Ingress>>, cache: Arc<dyn ResourceCache>) -> Self {
        Self { queue, cache }
    }

    fn enqueue_dependents(&self, service: &Service) {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        let ingresses = match self.cache.list_ingresses(&namespace) {
            Ok(ingresses) => ingresses,
            Err(e) => {
                warn!("Cannot list Ingresses depending on Service {}/{}: {}", namespace, name, e);
                return;
            }
        };
        for ingress in ingresses
            .iter()
            .filter(|i| is_edgelb_ingress(i) && references_service(i, &name))
        {
            debug!(
                "Service {}/{} changed; queueing Ingress {}",
                namespace,
                name,
                ingress.name_any()
            );
            self.queue.add(WorkItem::Live(key_for(ingress.as_ref())));
        }
    }
}

impl EventHandler<Service> for ServiceFanout {
    fn on_add(&self, obj: &Arc<Service>) {
        self.enqueue_dependents(obj);
    }

    fn on_update(&self, _old: &Arc<Service>, new: &Arc<Service>) {
        self.enqueue_dependents(new);
    }

    fn on_delete(&self, obj: &Arc<Service>) {
        self.enqueue_dependents(obj);
    }
}

/// Translates Ingresses into EdgeLB pools
pub struct IngressReconciler {
    ctx: Arc<Context>,
}

impl IngressReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn translate(
        &self,
        ingress: &Ingress,
        object: &ObjectReference,
        owner: Owner,
    ) -> Result<(), ControllerError> {
        let spec = compute_ingress_spec(ingress, &self.ctx.defaulting())?;
        let record = PoolRecord::from_meta(&ingress.metadata)?;
        let contribution = ingress_contribution(
            owner.clone(),
            ingress,
            &spec,
            self.ctx.cache.as_ref(),
            &self.ctx.config,
        )?;

        let action = self
            .ctx
            .translator
            .apply(&contribution, record.as_ref())
            .await?;
        self.ctx.announce(object, &action, &spec.pool.name).await;
        if !action.is_applied() {
            return Ok(());
        }

        self.ctx
            .record_pool(SourceKind::Ingress, &ingress.metadata, &spec.pool)
            .await?;

        let addresses = self
            .ctx
            .translator
            .frontend_addresses(&spec.pool.name, &owner)
            .await?;
        let status = ingress_status(&addresses);
        let current = ingress.status.as_ref().and_then(|s| s.load_balancer.as_ref());
        if !ingress_status_matches(current, &status) {
            let namespace = ingress.namespace().unwrap_or_default();
            self.ctx
                .writer
                .update_ingress_status(&namespace, &ingress.name_any(), &status)
                .await?;
        }
        Ok(())
    }

    async fn release(
        &self,
        ingress: &Ingress,
        object: &ObjectReference,
        owner: &Owner,
        deleted: bool,
    ) -> Result<(), ControllerError> {
        let computed = compute_ingress_spec(ingress, &self.ctx.defaulting()).map(|s| s.pool.name);
        let pool = self.ctx.pool_to_release(&ingress.metadata, computed);
        let action = self.ctx.translator.release(&pool, owner).await?;
        self.ctx.announce(object, &action, &pool).await;
        if deleted {
            return Ok(());
        }
        self.ctx.forget_pool(SourceKind::Ingress, &ingress.metadata).await
    }
}

#[async_trait]
impl SyncHandler for IngressReconciler {
    type Item = WorkItem<Ingress>;

    async fn sync(&self, item: &WorkItem<Ingress>) -> Result<(), ControllerError> {
        let key = item.key();
        let (namespace, name) = split_key(key)?;

        let (snapshot, deleted) = match self.ctx.cache.get_ingress(namespace, name) {
            Ok(ingress) => (ingress, false),
            Err(CacheError::NotFound { .. }) => match item.tombstone() {
                Some(last) => (Arc::clone(last), true),
                None => return Err(ControllerError::MissingTombstone(key.to_string())),
            },
        };

        let object = snapshot.object_ref(&());
        if is_paused(&snapshot.metadata) {
            info!("Translation of Ingress {} is paused", key);
            self.ctx.paused(&object).await;
            return Ok(());
        }

        let ingress = Ingress::clone(&snapshot);
        let owner = Owner::new(SourceKind::Ingress, &self.ctx.config.cluster_name, namespace, name);
        let releasing = deleted
            || ingress.metadata.deletion_timestamp.is_some()
            || !is_edgelb_ingress(&ingress);

        debug!(releasing, "Syncing Ingress {}", key);
        let result = if releasing {
            self.release(&ingress, &object, &owner, deleted).await
        } else {
            self.translate(&ingress, &object, owner).await
        };
        if let Err(e) = &result {
            self.ctx.report_error(&object, e).await;
        }
        result
    }
}
