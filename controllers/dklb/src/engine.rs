//! Generic controller engine.
//!
//! Runs a pool of workers draining a [`WorkQueue`] into a [`SyncHandler`].
//! The engine waits for its caches to sync before starting any worker, keeps
//! workers alive across handler panics, and requeues retryable failures with
//! per-key backoff.

use crate::error::ControllerError;
use crate::workqueue::{Keyed, WorkQueue};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often cache sync is polled at startup
const CACHE_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of a [`GenericController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Created,
    WaitingForCacheSync,
    Running,
    ShuttingDown,
    Stopped,
}

/// Anything that can report whether its initial listing is complete
pub trait CacheSync: Send + Sync {
    fn has_synced(&self) -> bool;
}

/// Processes one work item
#[async_trait::async_trait]
pub trait SyncHandler: Send + Sync + 'static {
    type Item: Keyed;

    async fn sync(&self, item: &Self::Item) -> Result<(), ControllerError>;
}

/// Work-queue driven controller
pub struct GenericController<H: SyncHandler> {
    name: &'static str,
    queue: WorkQueue<H::Item>,
    handler: Arc<H>,
    workers: usize,
    caches: Vec<Arc<dyn CacheSync>>,
    state: Arc<Mutex<ControllerState>>,
}

impl<H: SyncHandler> GenericController<H> {
    pub fn new(
        name: &'static str,
        queue: WorkQueue<H::Item>,
        handler: Arc<H>,
        workers: usize,
        caches: Vec<Arc<dyn CacheSync>>,
    ) -> Self {
        Self {
            name,
            queue,
            handler,
            workers: workers.max(1),
            caches,
            state: Arc::new(Mutex::new(ControllerState::Created)),
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    fn set_state(&self, state: ControllerState) {
        debug!(controller = self.name, ?state, "Controller state changed");
        *self.state.lock() = state;
    }

    /// Run until `cancel` fires.
    ///
    /// Fails if cancellation arrives before every cache has synced.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        self.set_state(ControllerState::WaitingForCacheSync);
        info!("Waiting for {} controller caches to sync", self.name);

        if !self.wait_for_cache_sync(&cancel).await {
            self.queue.shut_down();
            self.set_state(ControllerState::Stopped);
            return Err(ControllerError::CacheSync);
        }

        self.set_state(ControllerState::Running);
        info!("Starting {} {} controller workers", self.workers, self.name);

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let queue = self.queue.clone();
            let handler = Arc::clone(&self.handler);
            let name = self.name;
            workers.spawn(async move { worker(name, id, queue, handler).await });
        }

        cancel.cancelled().await;

        self.set_state(ControllerState::ShuttingDown);
        info!("Shutting down {} controller", self.name);
        self.queue.shut_down();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("{} controller worker ended abnormally: {}", self.name, e);
            }
        }

        self.set_state(ControllerState::Stopped);
        info!("{} controller stopped", self.name);
        Ok(())
    }

    async fn wait_for_cache_sync(&self, cancel: &CancellationToken) -> bool {
        loop {
            if self.caches.iter().all(|c| c.has_synced()) {
                return true;
            }
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(CACHE_SYNC_POLL_INTERVAL) => {}
            }
        }
    }
}

async fn worker<H: SyncHandler>(
    name: &'static str,
    id: usize,
    queue: WorkQueue<H::Item>,
    handler: Arc<H>,
) {
    debug!(controller = name, worker = id, "Worker started");
    while let Some(item) = queue.get().await {
        process_item(name, &queue, handler.as_ref(), item).await;
    }
    debug!(controller = name, worker = id, "Worker stopped");
}

async fn process_item<H: SyncHandler>(
    name: &'static str,
    queue: &WorkQueue<H::Item>,
    handler: &H,
    item: H::Item,
) {
    let key = item.key().to_string();
    let outcome = AssertUnwindSafe(handler.sync(&item)).catch_unwind().await;

    match outcome {
        Ok(Ok(())) => {
            queue.forget(&key);
        }
        Ok(Err(e)) if !e.is_retryable() => {
            warn!("{} {}: giving up: {}", name, key, e);
            queue.forget(&key);
        }
        Ok(Err(e)) => {
            error!(
                "{} {}: sync failed (attempt {}): {}",
                name,
                key,
                queue.num_requeues(&key) + 1,
                e
            );
            queue.add_rate_limited(item);
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("{} {}: sync panicked: {}", name, key, message);
            queue.add_rate_limited(item);
        }
    }

    queue.done(&key);
}
