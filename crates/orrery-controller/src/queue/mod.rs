//! Deduplicating, delayable, rate-limited work queue.
//!
//! Keys move through three sets:
//!
//! - `dirty`: keys that need processing.
//! - `queue`: dirty keys that are not being processed, in insertion order.
//! - `processing`: keys handed out by [`WorkQueue::get`] and not yet
//!   released with [`WorkQueue::done`].
//!
//! A key added while it is being processed is only marked dirty, and is put
//! back on the queue when the worker calls `done`. This gives single-flight
//! processing per key while coalescing bursts of adds into one sync.

mod rate_limit;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

pub use rate_limit::ExponentialBackoff;

use crate::config::QueueConfig;

/// Bounds required of queue keys.
pub trait QueueKey: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {}

impl<T> QueueKey for T where T: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    waiting: HashMap<K, Instant>,
    shutting_down: bool,
}

impl<K: QueueKey> QueueState<K> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            waiting: HashMap::new(),
            shutting_down: false,
        }
    }

    /// Returns true if the key became visible to `get`.
    fn insert(&mut self, key: K) -> bool {
        if self.shutting_down || self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }
}

struct Shared<K: QueueKey> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    limiter: ExponentialBackoff<K>,
}

/// Work queue handle. Clones share the same queue.
pub struct WorkQueue<K: QueueKey> {
    shared: Arc<Shared<K>>,
}

impl<K: QueueKey> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: QueueKey> WorkQueue<K> {
    /// Create a queue with the given retry configuration.
    #[must_use]
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::new()),
                notify: Notify::new(),
                limiter: ExponentialBackoff::new(config.base_delay(), config.max_delay()),
            }),
        }
    }

    /// Mark `key` as needing processing.
    ///
    /// Adding a key that is already queued is a no-op. Adding a key that is
    /// being processed schedules exactly one more pass after `done`.
    pub fn add(&self, key: K) {
        let visible = {
            let mut state = self.shared.state.lock();
            trace!(key = %key, "queue add");
            state.insert(key)
        };
        if visible {
            counter!("orrery.queue.adds").increment(1);
            self.shared.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed.
    ///
    /// When the key already has a pending delayed add with an earlier
    /// deadline, this call does nothing.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return;
            }
            match state.waiting.get(&key) {
                Some(existing) if *existing <= deadline => return,
                _ => {
                    state.waiting.insert(key.clone(), deadline);
                }
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let due = {
                let mut state = queue.shared.state.lock();
                if state.waiting.get(&key) == Some(&deadline) {
                    state.waiting.remove(&key);
                    true
                } else {
                    false
                }
            };
            if due {
                queue.add(key);
            }
        });
    }

    /// Add `key` after the backoff delay for its failure count.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.shared.limiter.when(&key);
        counter!("orrery.queue.retries").increment(1);
        self.add_after(key, delay);
    }

    /// Number of rate-limited requeues of `key` since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared.limiter.num_requeues(key)
    }

    /// Reset the failure count of `key`.
    pub fn forget(&self, key: &K) {
        self.shared.limiter.forget(key);
    }

    /// Wait for the next key and mark it as being processed.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.shared.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing.
    ///
    /// If the key was added again while it was being processed, it is queued.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.shared.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.shared.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting `get`.
    pub fn shut_down(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutting_down = true;
            state.waiting.clear();
        }
        self.shared.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] has been called.
    #[must_use]
    pub fn shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }

    /// Number of keys ready to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Whether no key is ready to be handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
