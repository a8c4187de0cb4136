//! Worker pool draining the work queue into the sync engine.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::QueueConfig;
use crate::error::ControllerResult;
use crate::queue::WorkQueue;
use crate::sync::SyncEngine;

/// What the retry policy did with a key after a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Sync succeeded, or failed in a way that needs no retry.
    Done,
    /// Sync failed and the key was requeued with backoff.
    Requeued,
    /// Sync failed too many times in a row and the key was dropped.
    Dropped,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "ok",
            Self::Requeued => "requeued",
            Self::Dropped => "dropped",
        }
    }
}

/// Apply the retry policy to the result of syncing `key`.
///
/// Errors are retried with backoff while fewer than `max_retries` requeues
/// have happened since the key last succeeded. Beyond that the key is
/// forgotten and only a new notification brings it back.
pub fn handle_result(
    queue: &WorkQueue<String>,
    key: &String,
    result: ControllerResult<()>,
    max_retries: u32,
) -> Outcome {
    let err = match result {
        Ok(()) => {
            queue.forget(key);
            return Outcome::Done;
        }
        Err(e) if e.is_namespace_terminating() => {
            queue.forget(key);
            return Outcome::Done;
        }
        Err(e) => e,
    };

    if queue.num_requeues(key) < max_retries {
        debug!(workload = %key, error = %err, "error syncing workload");
        queue.add_rate_limited(key.clone());
        return Outcome::Requeued;
    }

    error!(workload = %key, error = %err, "dropping workload out of the queue");
    counter!("orrery.queue.drops").increment(1);
    queue.forget(key);
    Outcome::Dropped
}

/// Runs a fixed number of workers, each looping `get`, sync, `done`.
pub struct Controller {
    engine: Arc<SyncEngine>,
    queue: WorkQueue<String>,
    max_retries: u32,
}

impl Controller {
    /// Create a controller feeding `queue` into `engine`.
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>, queue: WorkQueue<String>, config: &QueueConfig) -> Self {
        Self {
            engine,
            queue,
            max_retries: config.max_retries,
        }
    }

    /// Run `workers` workers until the queue is shut down and drained.
    ///
    /// In-flight syncs are never interrupted; a worker only stops between
    /// items.
    pub async fn run(self: Arc<Self>, workers: usize) {
        info!(workers, "starting workers");
        let mut set = JoinSet::new();
        for id in 0..workers {
            let controller = Arc::clone(&self);
            set.spawn(async move { controller.worker(id).await });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task failed");
            }
        }
        info!("all workers stopped");
    }

    async fn worker(&self, id: usize) {
        debug!(worker_id = id, "worker started");
        while self.process_next_work_item().await {}
        debug!(worker_id = id, "worker stopped");
    }

    /// Take one key off the queue and sync it.
    ///
    /// Returns false once the queue has shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let started = Instant::now();
        let result = self.engine.sync(&key).await;
        histogram!("orrery.sync.duration_seconds").record(started.elapsed().as_secs_f64());

        let outcome = handle_result(&self.queue, &key, result, self.max_retries);
        counter!("orrery.sync.total", "outcome" => outcome.as_str()).increment(1);

        self.queue.done(&key);
        true
    }
}

#[cfg(test)]
mod tests {
    use orrery_core::ObjectKey;

    use super::*;
    use crate::error::ControllerError;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new(&QueueConfig {
            base_delay_ms: 0,
            ..QueueConfig::default()
        })
    }

    fn conflict() -> ControllerResult<()> {
        Err(ControllerError::conflict(
            "Workload",
            ObjectKey::new("default", "web"),
            "stale resource version",
        ))
    }

    #[tokio::test]
    async fn failures_are_dropped_after_max_retries() {
        let queue = queue();
        let key = "default/web".to_owned();

        for attempt in 0..15 {
            assert_eq!(
                handle_result(&queue, &key, conflict(), 15),
                Outcome::Requeued,
                "attempt {attempt}"
            );
        }
        assert_eq!(queue.num_requeues(&key), 15);

        assert_eq!(handle_result(&queue, &key, conflict(), 15), Outcome::Dropped);
        assert_eq!(queue.num_requeues(&key), 0);
    }

    #[tokio::test]
    async fn success_resets_the_attempt_counter() {
        let queue = queue();
        let key = "default/web".to_owned();

        handle_result(&queue, &key, conflict(), 15);
        handle_result(&queue, &key, conflict(), 15);
        assert_eq!(queue.num_requeues(&key), 2);

        assert_eq!(handle_result(&queue, &key, Ok(()), 15), Outcome::Done);
        assert_eq!(queue.num_requeues(&key), 0);
    }

    #[tokio::test]
    async fn terminating_namespace_is_not_retried() {
        let queue = queue();
        let key = "default/web".to_owned();

        handle_result(&queue, &key, conflict(), 15);
        let result = Err(ControllerError::NamespaceTerminating("default".to_owned()));
        assert_eq!(handle_result(&queue, &key, result, 15), Outcome::Done);
        assert_eq!(queue.num_requeues(&key), 0);
    }

    #[tokio::test]
    async fn requeued_key_comes_back() {
        let queue = queue();
        let key = "default/web".to_owned();

        handle_result(&queue, &key, conflict(), 15);
        let next = tokio::time::timeout(std::time::Duration::from_secs(1), queue.get())
            .await
            .expect("requeued key within a second");
        assert_eq!(next, Some(key));
    }
}
