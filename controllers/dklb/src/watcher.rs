//! Kubernetes resource informers.
//!
//! An [`Informer`] runs a `kube_runtime::watcher` stream for one resource
//! kind, mirrors it into a reflector store, and tells registered
//! [`EventHandler`]s what changed. Handlers see add/update/delete with the
//! previous state of the object, which a bare watcher stream does not give.

use crate::error::ControllerError;
use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::reflector::{ObjectRef, Store, store::Writer};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives change notifications from an [`Informer`].
///
/// Called inline from the informer task; implementations must not block.
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &Arc<K>);
    fn on_update(&self, old: &Arc<K>, new: &Arc<K>);
    fn on_delete(&self, obj: &Arc<K>);
}

/// Watches one resource kind and keeps a local cache of it
pub struct Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    kind: &'static str,
    api: Api<K>,
    writer: Writer<K>,
    store: Store<K>,
    handlers: Vec<Arc<dyn EventHandler<K>>>,
    resync_period: Option<Duration>,
    synced: Arc<AtomicBool>,
    /// Objects of a relist in progress
    relist: Vec<K>,
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(kind: &'static str, api: Api<K>, resync_period: Option<Duration>) -> Self {
        let writer = Writer::default();
        let store = writer.as_reader();
        Self {
            kind,
            api,
            writer,
            store,
            handlers: Vec::new(),
            resync_period,
            synced: Arc::new(AtomicBool::new(false)),
            relist: Vec::new(),
        }
    }

    /// Read handle on the cache
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Becomes true once the first full listing has been applied
    pub fn synced(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.synced)
    }

    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler<K>>) {
        self.handlers.push(handler);
    }

    /// Watch until cancelled. Watch errors are retried with backoff; the
    /// stream ending is fatal.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ControllerError> {
        info!("Starting {} informer", self.kind);

        let mut stream = pin!(watcher(self.api.clone(), watcher::Config::default()).default_backoff());
        let mut resync = self
            .resync_period
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Stopping {} informer", self.kind);
                    return Ok(());
                }
                () = tick(&mut resync) => self.resync(),
                event = stream.next() => match event {
                    Some(Ok(event)) => self.handle(event),
                    Some(Err(e)) => warn!("{} watch error: {}", self.kind, e),
                    None => {
                        return Err(ControllerError::Watch(format!(
                            "{} watch stream ended",
                            self.kind
                        )));
                    }
                },
            }
        }
    }

    fn handle(&mut self, event: watcher::Event<K>) {
        match &event {
            watcher::Event::Apply(obj) => {
                let obj_ref = ObjectRef::from_obj(obj);
                let old = self.store.get(&obj_ref);
                self.writer.apply_watcher_event(&event);
                let new = self.store.get(&obj_ref).unwrap_or_else(|| Arc::new(obj.clone()));
                match old {
                    Some(old) => self.dispatch(|h| h.on_update(&old, &new)),
                    None => self.dispatch(|h| h.on_add(&new)),
                }
            }
            watcher::Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                let last = Arc::new(obj.clone());
                self.dispatch(|h| h.on_delete(&last));
            }
            watcher::Event::Init => {
                debug!("{} relist started", self.kind);
                self.relist.clear();
                self.writer.apply_watcher_event(&event);
            }
            watcher::Event::InitApply(obj) => {
                self.relist.push(obj.clone());
                self.writer.apply_watcher_event(&event);
            }
            watcher::Event::InitDone => {
                let mut previous: HashMap<ObjectRef<K>, Arc<K>> = self
                    .store
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(obj.as_ref()), obj))
                    .collect();
                self.writer.apply_watcher_event(&event);

                for obj in std::mem::take(&mut self.relist) {
                    let obj_ref = ObjectRef::from_obj(&obj);
                    let new = self.store.get(&obj_ref).unwrap_or_else(|| Arc::new(obj));
                    match previous.remove(&obj_ref) {
                        Some(old) => self.dispatch(|h| h.on_update(&old, &new)),
                        None => self.dispatch(|h| h.on_add(&new)),
                    }
                }
                // Whatever the relist did not return was deleted while we
                // were not watching.
                for gone in previous.into_values() {
                    self.dispatch(|h| h.on_delete(&gone));
                }

                if !self.synced.swap(true, Ordering::SeqCst) {
                    info!("{} cache synced", self.kind);
                }
            }
        }
    }

    fn resync(&self) {
        let objects = self.store.state();
        debug!("Resyncing {} {} objects", objects.len(), self.kind);
        for obj in &objects {
            self.dispatch(|h| h.on_update(obj, obj));
        }
    }

    fn dispatch(&self, f: impl Fn(&dyn EventHandler<K>)) {
        for handler in &self.handlers {
            f(handler.as_ref());
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}
