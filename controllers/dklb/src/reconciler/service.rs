//! Service (type LoadBalancer) controller.

use super::{Context, WorkItem, key_for, split_key};
use crate::cache::CacheError;
use crate::engine::SyncHandler;
use crate::error::ControllerError;
use crate::translator::service::service_contribution;
use crate::translator::status::{service_status, service_status_matches};
use crate::translator::{Owner, SourceKind};
use crate::watcher::EventHandler;
use crate::workqueue::{Keyed, WorkQueue};
use async_trait::async_trait;
use dklb_spec::annotations::is_paused;
use dklb_spec::{PoolRecord, compute_service_spec, is_load_balancer};
use k8s_openapi::api::core::v1::{ObjectReference, Service};
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Queues LoadBalancer Services
pub struct ServiceEventHandler {
    queue: WorkQueue<WorkItem<Service>>,
}

impl ServiceEventHandler {
    pub fn new(queue: WorkQueue<WorkItem<Service>>) -> Self {
        Self { queue }
    }
}

impl EventHandler<Service> for ServiceEventHandler {
    fn on_add(&self, obj: &Arc<Service>) {
        if is_load_balancer(obj) {
            self.queue.add(WorkItem::Live(key_for(obj.as_ref())));
        }
    }

    fn on_update(&self, old: &Arc<Service>, new: &Arc<Service>) {
        // A Service that stopped being a LoadBalancer still has to give up its entries
        if is_load_balancer(old) || is_load_balancer(new) {
            self.queue.add(WorkItem::Live(key_for(new.as_ref())));
        }
    }

    fn on_delete(&self, obj: &Arc<Service>) {
        if is_load_balancer(obj) {
            self.queue
                .add(WorkItem::Deleted(key_for(obj.as_ref()), Arc::clone(obj)));
        }
    }
}

/// Translates Services into EdgeLB pools
pub struct ServiceReconciler {
    ctx: Arc<Context>,
}

impl ServiceReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn translate(
        &self,
        service: &Service,
        object: &ObjectReference,
        owner: Owner,
    ) -> Result<(), ControllerError> {
        let spec = compute_service_spec(service, &self.ctx.defaulting())?;
        let record = PoolRecord::from_meta(&service.metadata)?;
        let contribution = service_contribution(owner.clone(), service, &spec, &self.ctx.config)?;

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
            .record_pool(SourceKind::Service, &service.metadata, &spec.pool)
            .await?;

        let addresses = self
            .ctx
            .translator
            .frontend_addresses(&spec.pool.name, &owner)
            .await?;
        let status = service_status(&addresses);
        let current = service.status.as_ref().and_then(|s| s.load_balancer.as_ref());
        if !service_status_matches(current, &status) {
            let namespace = service.namespace().unwrap_or_default();
            self.ctx
                .writer
                .update_service_status(&namespace, &service.name_any(), &status)
                .await?;
        }
        Ok(())
    }

    async fn release(
        &self,
        service: &Service,
        object: &ObjectReference,
        owner: &Owner,
        deleted: bool,
    ) -> Result<(), ControllerError> {
        let computed = compute_service_spec(service, &self.ctx.defaulting()).map(|s| s.pool.name);
        let pool = self.ctx.pool_to_release(&service.metadata, computed);
        let action = self.ctx.translator.release(&pool, owner).await?;
        self.ctx.announce(object, &action, &pool).await;
        if deleted {
            return Ok(());
        }
        self.ctx.forget_pool(SourceKind::Service, &service.metadata).await
    }
}

#[async_trait]
impl SyncHandler for ServiceReconciler {
    type Item = WorkItem<Service>;

    async fn sync(&self, item: &WorkItem<Service>) -> Result<(), ControllerError> {
        let key = item.key();
        let (namespace, name) = split_key(key)?;

        let (snapshot, deleted) = match self.ctx.cache.get_service(namespace, name) {
            Ok(svc) => (svc, false),
            Err(CacheError::NotFound { .. }) => match item.tombstone() {
                Some(last) => (Arc::clone(last), true),
                None => return Err(ControllerError::MissingTombstone(key.to_string())),
            },
        };

        let object = snapshot.object_ref(&());
        if is_paused(&snapshot.metadata) {
            info!("Translation of Service {} is paused", key);
            self.ctx.paused(&object).await;
            return Ok(());
        }

        let service = Service::clone(&snapshot);
        let owner = Owner::new(SourceKind::Service, &self.ctx.config.cluster_name, namespace, name);
        let releasing = deleted
            || service.metadata.deletion_timestamp.is_some()
            || !is_load_balancer(&service);

        debug!(releasing, "Syncing Service {}", key);
        let result = if releasing {
            self.release(&service, &object, &owner, deleted).await
        } else {
            self.translate(&service, &object, owner).await
        };
        if let Err(e) = &result {
            self.ctx.report_error(&object, e).await;
        }
        result
    }
}
