//! Change notifications delivered to the controller.

use std::sync::Arc;

use orrery_core::{ObjectKey, Resource};

/// A change to a watched object.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    /// Object was created, or first seen during a relist.
    Added(Arc<T>),
    /// Object was modified.
    Updated {
        /// Previous cached version.
        old: Arc<T>,
        /// New version.
        new: Arc<T>,
    },
    /// Object was deleted.
    Deleted(DeletedObject<T>),
}

/// Payload of a delete notification.
#[derive(Debug, Clone)]
pub enum DeletedObject<T> {
    /// The delete was observed directly.
    Live(Arc<T>),
    /// The delete was inferred during a relist; only the last known state
    /// is available and it may be stale.
    Tombstone {
        /// Key of the deleted object.
        key: ObjectKey,
        /// Last state the cache held.
        last_known: Arc<T>,
    },
}

impl<T: Resource> DeletedObject<T> {
    /// Unwrap the deleted object, whichever way the delete was observed.
    #[must_use]
    pub fn into_object(self) -> Arc<T> {
        match self {
            Self::Live(obj) | Self::Tombstone { last_known: obj, .. } => obj,
        }
    }

    /// Key of the deleted object.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Live(obj) => obj.key(),
            Self::Tombstone { key, .. } => key.clone(),
        }
    }
}
