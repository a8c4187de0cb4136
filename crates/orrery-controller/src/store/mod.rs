//! Authoritative object store.
//!
//! The controller reads through local caches and writes through a
//! [`ClusterClient`]. Every update carries the `resource_version` the caller
//! read; a store rejects the write with [`ControllerError::Conflict`] when
//! the object has changed since.
//!
//! [`ControllerError::Conflict`]: crate::error::ControllerError::Conflict

mod memory;

pub use memory::MemoryCluster;

use std::sync::Arc;

use async_trait::async_trait;
use orrery_core::{ReplicaGroup, Uid, Workload};
use tokio::sync::broadcast;

use crate::error::ControllerResult;
use crate::watch::WatchEvent;

/// Writes and uncached reads against the authoritative store.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Read a workload straight from the store, bypassing any cache.
    async fn get_workload(&self, namespace: &str, name: &str) -> ControllerResult<Workload>;

    /// Update a workload's metadata and spec. Status is left untouched.
    async fn update_workload(&self, workload: &Workload) -> ControllerResult<Workload>;

    /// Update a workload's status. Metadata and spec are left untouched.
    async fn update_workload_status(&self, workload: &Workload) -> ControllerResult<Workload>;

    /// Create a replica group.
    async fn create_replica_group(&self, group: &ReplicaGroup) -> ControllerResult<ReplicaGroup>;

    /// Update a replica group's metadata and spec.
    async fn update_replica_group(&self, group: &ReplicaGroup) -> ControllerResult<ReplicaGroup>;

    /// Delete a replica group, provided its uid still matches.
    async fn delete_replica_group(
        &self,
        namespace: &str,
        name: &str,
        uid: &Uid,
    ) -> ControllerResult<()>;
}

/// A source of full listings and change notifications for one object kind.
pub trait ListWatch<T>: Send + Sync {
    /// Every object of this kind.
    fn list(&self) -> Vec<Arc<T>>;

    /// Subscribe to changes made after this call.
    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>>;
}
