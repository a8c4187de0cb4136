//! Keeps an [`ObjectCache`] in step with a [`ListWatch`] source and forwards
//! every change to a consumer.

use std::collections::HashSet;
use std::sync::Arc;

use orrery_core::{ObjectKey, Resource};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Lister, ObjectCache};
use crate::store::ListWatch;
use crate::watch::{DeletedObject, WatchEvent};

/// Feeds one object kind from a source into a cache and a channel.
///
/// The cache is always updated before the event is forwarded, so consumers
/// observing an event see at least that state when they read the cache.
pub struct Informer<T> {
    source: Arc<dyn ListWatch<T>>,
    cache: Arc<ObjectCache<T>>,
    events: mpsc::Sender<WatchEvent<T>>,
}

impl<T: Resource> Informer<T> {
    /// Create an informer.
    #[must_use]
    pub fn new(
        source: Arc<dyn ListWatch<T>>,
        cache: Arc<ObjectCache<T>>,
        events: mpsc::Sender<WatchEvent<T>>,
    ) -> Self {
        Self {
            source,
            cache,
            events,
        }
    }

    /// List, then watch until cancelled or the consumer goes away.
    ///
    /// If the watch falls behind, the informer relists and reports objects
    /// that disappeared in the meantime as tombstones.
    pub async fn run(self, cancel: CancellationToken) {
        let mut watch = self.source.watch();
        if !self.relist().await {
            return;
        }
        info!(kind = T::KIND, objects = self.cache.len(), "cache synced");

        loop {
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = watch.recv() => received,
            };

            match received {
                Ok(event) => {
                    self.cache.apply(&event);
                    if self.events.send(event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(kind = T::KIND, missed, "watch fell behind, relisting");
                    watch = self.source.watch();
                    if !self.relist().await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }

        debug!(kind = T::KIND, "informer stopped");
    }

    /// Replace the cache with a full listing and emit the difference.
    ///
    /// Returns false once the consumer has gone away.
    async fn relist(&self) -> bool {
        let fresh = self.source.list();
        let fresh_keys: HashSet<ObjectKey> = fresh.iter().map(|obj| obj.key()).collect();

        let mut events = Vec::with_capacity(fresh.len());
        for cached in self.cache.snapshot() {
            let key = cached.key();
            if !fresh_keys.contains(&key) {
                events.push(WatchEvent::Deleted(DeletedObject::Tombstone {
                    key,
                    last_known: cached,
                }));
            }
        }
        for obj in &fresh {
            let meta = obj.meta();
            let event = match self.cache.get(&meta.namespace, &meta.name) {
                Some(old) => WatchEvent::Updated {
                    old,
                    new: Arc::clone(obj),
                },
                None => WatchEvent::Added(Arc::clone(obj)),
            };
            events.push(event);
        }

        self.cache.replace(fresh);

        for event in events {
            if self.events.send(event).await.is_err() {
                return false;
            }
        }
        true
    }
}
