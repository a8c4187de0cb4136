//! Local object caches fed by watch events.
//!
//! Cached objects are shared as `Arc<T>` and must never be mutated. Code
//! that needs to change an object clones it and writes the clone through
//! the [`ClusterClient`](crate::store::ClusterClient).

use std::sync::Arc;

use dashmap::DashMap;
use orrery_core::{LabelSelector, ObjectKey, Resource};
use tokio::sync::watch;

use crate::watch::WatchEvent;

/// Read access to a possibly lagging local view of one object kind.
pub trait Lister<T>: Send + Sync {
    /// Objects in `namespace` whose labels match `selector`, ordered by name.
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<T>>;

    /// Object by namespace and name.
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<T>>;
}

/// In-process cache of one object kind.
pub struct ObjectCache<T> {
    objects: DashMap<ObjectKey, Arc<T>>,
    synced: watch::Sender<bool>,
}

impl<T: Resource> ObjectCache<T> {
    /// Create an empty, unsynced cache.
    #[must_use]
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            objects: DashMap::new(),
            synced,
        }
    }

    /// Apply a watch event.
    pub fn apply(&self, event: &WatchEvent<T>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Updated { new: obj, .. } => {
                self.objects.insert(obj.key(), Arc::clone(obj));
            }
            WatchEvent::Deleted(deleted) => {
                self.objects.remove(&deleted.key());
            }
        }
    }

    /// Replace the cache contents with a full listing and mark it synced.
    pub fn replace(&self, objects: impl IntoIterator<Item = Arc<T>>) {
        self.objects.clear();
        for obj in objects {
            self.objects.insert(obj.key(), obj);
        }
        self.synced.send_replace(true);
    }

    /// Whether the cache has completed its initial listing.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the initial listing has completed.
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = rx.wait_for(|synced| *synced).await;
    }

    /// Every cached object.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.objects
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of cached objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the cache holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<T: Resource> Default for ObjectCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> Lister<T> for ObjectCache<T> {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<T>> {
        let mut out: Vec<Arc<T>> = self
            .objects
            .iter()
            .filter(|entry| {
                entry.key().namespace == namespace && selector.matches(&entry.value().meta().labels)
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        out.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
        out
    }

    fn get(&self, namespace: &str, name: &str) -> Option<Arc<T>> {
        self.objects
            .get(&ObjectKey::new(namespace, name))
            .map(|entry| Arc::clone(entry.value()))
    }
}
