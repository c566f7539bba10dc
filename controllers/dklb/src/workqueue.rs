//! Deduplicating, rate-limited work queue.
//!
//! Items are identified by a string key (`namespace/name`). Guarantees:
//! - a key is queued at most once; adding it again replaces the queued payload
//! - a key handed out by `get` is not handed out again until `done` is called
//!   for it; adds in the meantime are held back and re-queued on `done`
//! - no ordering across keys

use crate::backoff::{ExponentialBackoff, ItemRateLimiter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Something that can be put on a [`WorkQueue`]
pub trait Keyed: Clone + Send + Sync + 'static {
    fn key(&self) -> &str;
}

struct State<T> {
    queue: VecDeque<String>,
    /// Latest payload of every key waiting to be processed
    dirty: HashMap<String, T>,
    processing: HashSet<String>,
    shutting_down: bool,
}

struct Inner<T> {
    name: &'static str,
    state: Mutex<State<T>>,
    notify: Notify,
    limiter: ItemRateLimiter,
}

/// Work queue shared between event handlers and workers
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Keyed> WorkQueue<T> {
    pub fn new(name: &'static str, backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashMap::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                limiter: ItemRateLimiter::new(backoff),
            }),
        }
    }

    /// Queue an item, replacing any payload already waiting under its key
    pub fn add(&self, item: T) {
        let key = item.key().to_string();
        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            if state.dirty.insert(key.clone(), item).is_some() {
                // Already waiting; only the payload changed.
                return;
            }
            if state.processing.contains(&key) {
                // Re-queued by `done`.
                return;
            }
            state.queue.push_back(key);
        }
        self.inner.notify.notify_one();
    }

    /// Queue an item after `delay`
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Queue an item after its key's backoff delay, and bump that delay
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.inner.limiter.when(item.key());
        trace!(queue = self.inner.name, key = item.key(), ?delay, "Requeueing with backoff");
        self.add_after(item, delay);
    }

    /// Reset the backoff of a key
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    /// Failures recorded for a key since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a concurrent add or
            // shut_down cannot slip in unnoticed.
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                while let Some(key) = state.queue.pop_front() {
                    let Some(item) = state.dirty.remove(&key) else {
                        continue;
                    };
                    state.processing.insert(key);
                    if !state.queue.is_empty() {
                        // Pass the wake-up on to another idle worker.
                        self.inner.notify.notify_one();
                    }
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Mark a key as processed, re-queueing it if it was added meanwhile
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.inner.state.lock();
            state.processing.remove(key);
            if state.dirty.contains_key(key) && !state.shutting_down {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out items and wake every waiting worker
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        key: String,
        payload: u32,
    }

    impl Keyed for Item {
        fn key(&self) -> &str {
            &self.key
        }
    }

    fn item(key: &str, payload: u32) -> Item {
        Item {
            key: key.to_string(),
            payload,
        }
    }

    fn queue() -> WorkQueue<Item> {
        WorkQueue::new(
            "test",
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_add_deduplicates_and_keeps_latest_payload() {
        let queue = queue();
        queue.add(item("default/a", 1));
        queue.add(item("default/a", 2));
        queue.add(item("default/a", 3));
        queue.add(item("default/b", 1));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await, Some(item("default/a", 3)));
        assert_eq!(queue.get().await, Some(item("default/b", 1)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_in_flight_is_not_handed_out_twice() {
        let queue = queue();
        queue.add(item("default/a", 1));
        let first = queue.get().await.unwrap();

        queue.add(item("default/a", 2));
        assert!(queue.is_empty());
        let again = tokio::time::timeout(Duration::from_millis(50), queue.get()).await;
        assert!(again.is_err(), "key handed out while still in flight");

        queue.done(first.key());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(item("default/a", 2)));
    }

    #[tokio::test]
    async fn test_done_without_new_add_does_not_requeue() {
        let queue = queue();
        queue.add(item("default/a", 1));
        let first = queue.get().await.unwrap();
        queue.done(first.key());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = queue();
        let producer = queue.clone();
        let handle = tokio::spawn(async move { queue.get().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.add(item("default/a", 1));

        let got = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(item("default/a", 1)));
    }

    #[tokio::test]
    async fn test_shut_down_releases_waiters() {
        let queue = queue();
        let waiter = queue.clone();
        let handle = tokio::spawn(async move { waiter.get().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shut_down();

        let got = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, None);

        queue.add(item("default/a", 1));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_add_rate_limited_delays_and_backs_off() {
        let queue = queue();
        queue.add_rate_limited(item("default/a", 1));
        assert!(queue.is_empty());
        assert_eq!(queue.num_requeues("default/a"), 1);

        let got = tokio::time::timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        assert_eq!(got, Some(item("default/a", 1)));

        queue.forget("default/a");
        assert_eq!(queue.num_requeues("default/a"), 0);
    }
}
