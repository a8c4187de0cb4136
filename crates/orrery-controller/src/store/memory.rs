//! In-memory cluster for tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use orrery_core::{
    ObjectKey, ReplicaGroup, ReplicaGroupStatus, Resource, Uid, Unit, Workload,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{ControllerError, ControllerResult};
use crate::watch::{DeletedObject, WatchEvent};

use super::{ClusterClient, ListWatch};

/// Objects of one kind plus the channel their changes are published on.
struct Table<T> {
    objects: HashMap<ObjectKey, Arc<T>>,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T: Resource> Table<T> {
    fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            objects: HashMap::new(),
            events,
        }
    }

    fn get(&self, key: &ObjectKey) -> ControllerResult<Arc<T>> {
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(T::KIND, key.clone()))
    }

    /// Current version of `obj`, provided the caller read the latest one.
    fn check_version(&self, obj: &T) -> ControllerResult<Arc<T>> {
        let key = obj.key();
        let current = self.get(&key)?;
        let (cur, req) = (current.meta(), obj.meta());
        if !req.uid.as_str().is_empty() && cur.uid != req.uid {
            return Err(ControllerError::conflict(
                T::KIND,
                key,
                format!("uid {} does not match {}", req.uid, cur.uid),
            ));
        }
        if cur.resource_version != req.resource_version {
            return Err(ControllerError::conflict(
                T::KIND,
                key,
                format!(
                    "resource version {} is stale, latest is {}",
                    req.resource_version, cur.resource_version
                ),
            ));
        }
        Ok(current)
    }

    fn create(&mut self, mut obj: T, version: u64) -> ControllerResult<Arc<T>> {
        let key = obj.key();
        if self.objects.contains_key(&key) {
            return Err(ControllerError::AlreadyExists { kind: T::KIND, key });
        }
        let meta = obj.meta_mut();
        if meta.uid.as_str().is_empty() {
            meta.uid = Uid::generate();
        }
        meta.resource_version = version;
        meta.deletion_timestamp = None;
        let obj = Arc::new(obj);
        self.objects.insert(key, Arc::clone(&obj));
        let _ = self.events.send(WatchEvent::Added(Arc::clone(&obj)));
        Ok(obj)
    }

    fn store(&mut self, mut obj: T, version: u64) -> Arc<T> {
        obj.meta_mut().resource_version = version;
        let new = Arc::new(obj);
        let event = match self.objects.insert(new.key(), Arc::clone(&new)) {
            Some(old) => WatchEvent::Updated {
                old,
                new: Arc::clone(&new),
            },
            None => WatchEvent::Added(Arc::clone(&new)),
        };
        let _ = self.events.send(event);
        new
    }

    fn remove(&mut self, key: &ObjectKey) -> ControllerResult<Arc<T>> {
        let obj = self
            .objects
            .remove(key)
            .ok_or_else(|| ControllerError::not_found(T::KIND, key.clone()))?;
        let _ = self
            .events
            .send(WatchEvent::Deleted(DeletedObject::Live(Arc::clone(&obj))));
        Ok(obj)
    }

    fn in_namespace(&self, namespace: &str) -> Vec<Arc<T>> {
        let mut out: Vec<_> = self
            .objects
            .values()
            .filter(|o| o.meta().namespace == namespace)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
        out
    }
}

struct Inner {
    resource_version: u64,
    terminating: HashSet<String>,
    workloads: Table<Workload>,
    groups: Table<ReplicaGroup>,
    units: Table<Unit>,
}

impl Inner {
    fn next_version(&mut self) -> u64 {
        self.resource_version += 1;
        self.resource_version
    }

    fn check_namespace(&self, namespace: &str) -> ControllerResult<()> {
        if self.terminating.contains(namespace) {
            return Err(ControllerError::NamespaceTerminating(namespace.to_owned()));
        }
        Ok(())
    }
}

/// Single-process stand-in for the authoritative store.
///
/// Implements [`ClusterClient`] for the controller, and exposes inherent
/// methods for the external actors (users, the unit runtime) that create,
/// edit and delete objects. Every change is published to watchers.
pub struct MemoryCluster {
    inner: Mutex<Inner>,
    writes: AtomicU64,
}

impl MemoryCluster {
    /// Create an empty cluster whose watch channels buffer `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                resource_version: 0,
                terminating: HashSet::new(),
                workloads: Table::new(capacity),
                groups: Table::new(capacity),
                units: Table::new(capacity),
            }),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of successful writes made through [`ClusterClient`].
    #[must_use]
    pub fn controller_writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark a namespace as terminating. Creates in it fail from now on.
    pub fn terminate_namespace(&self, namespace: &str) {
        self.inner.lock().terminating.insert(namespace.to_owned());
    }

    /// Create a workload with generation 1.
    pub fn create_workload(&self, mut workload: Workload) -> ControllerResult<Workload> {
        let mut inner = self.inner.lock();
        inner.check_namespace(&workload.metadata.namespace)?;
        workload.metadata.generation = 1;
        let version = inner.next_version();
        Ok((*inner.workloads.create(workload, version)?).clone())
    }

    /// Edit a workload as a user would. The generation is bumped when the
    /// spec changes.
    pub fn edit_workload(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut Workload),
    ) -> ControllerResult<Workload> {
        let mut inner = self.inner.lock();
        let current = inner.workloads.get(&ObjectKey::new(namespace, name))?;
        let mut next = (*current).clone();
        edit(&mut next);
        if next.spec != current.spec {
            next.metadata.generation = current.metadata.generation + 1;
        }
        let version = inner.next_version();
        Ok((*inner.workloads.store(next, version)).clone())
    }

    /// Set the deletion marker on a workload without removing it.
    pub fn mark_workload_deleting(&self, namespace: &str, name: &str) -> ControllerResult<Workload> {
        self.edit_workload(namespace, name, |w| {
            w.metadata.deletion_timestamp = Some(Utc::now());
        })
    }

    /// Remove a workload.
    pub fn remove_workload(&self, namespace: &str, name: &str) -> ControllerResult<()> {
        self.inner
            .lock()
            .workloads
            .remove(&ObjectKey::new(namespace, name))
            .map(drop)
    }

    /// Create a replica group as an external actor.
    pub fn add_replica_group(&self, group: ReplicaGroup) -> ControllerResult<ReplicaGroup> {
        let mut inner = self.inner.lock();
        let version = inner.next_version();
        Ok((*inner.groups.create(group, version)?).clone())
    }

    /// Edit a replica group as an external actor.
    pub fn edit_replica_group(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut ReplicaGroup),
    ) -> ControllerResult<ReplicaGroup> {
        let mut inner = self.inner.lock();
        let mut next = (*inner.groups.get(&ObjectKey::new(namespace, name))?).clone();
        edit(&mut next);
        let version = inner.next_version();
        Ok((*inner.groups.store(next, version)).clone())
    }

    /// Report observed state for a replica group.
    pub fn set_replica_group_status(
        &self,
        namespace: &str,
        name: &str,
        status: ReplicaGroupStatus,
    ) -> ControllerResult<ReplicaGroup> {
        self.edit_replica_group(namespace, name, |g| g.status = status)
    }

    /// Remove a replica group.
    pub fn remove_replica_group(&self, namespace: &str, name: &str) -> ControllerResult<()> {
        self.inner
            .lock()
            .groups
            .remove(&ObjectKey::new(namespace, name))
            .map(drop)
    }

    /// Create a unit.
    pub fn create_unit(&self, unit: Unit) -> ControllerResult<Unit> {
        let mut inner = self.inner.lock();
        let version = inner.next_version();
        Ok((*inner.units.create(unit, version)?).clone())
    }

    /// Edit a unit.
    pub fn edit_unit(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut Unit),
    ) -> ControllerResult<Unit> {
        let mut inner = self.inner.lock();
        let mut next = (*inner.units.get(&ObjectKey::new(namespace, name))?).clone();
        edit(&mut next);
        let version = inner.next_version();
        Ok((*inner.units.store(next, version)).clone())
    }

    /// Remove a unit.
    pub fn remove_unit(&self, namespace: &str, name: &str) -> ControllerResult<()> {
        self.inner
            .lock()
            .units
            .remove(&ObjectKey::new(namespace, name))
            .map(drop)
    }

    /// Current state of a workload.
    #[must_use]
    pub fn workload(&self, namespace: &str, name: &str) -> Option<Workload> {
        self.inner
            .lock()
            .workloads
            .get(&ObjectKey::new(namespace, name))
            .ok()
            .map(|w| (*w).clone())
    }

    /// Current state of a replica group.
    #[must_use]
    pub fn replica_group(&self, namespace: &str, name: &str) -> Option<ReplicaGroup> {
        self.inner
            .lock()
            .groups
            .get(&ObjectKey::new(namespace, name))
            .ok()
            .map(|g| (*g).clone())
    }

    /// Replica groups in a namespace, ordered by name.
    #[must_use]
    pub fn replica_groups(&self, namespace: &str) -> Vec<ReplicaGroup> {
        self.inner
            .lock()
            .groups
            .in_namespace(namespace)
            .into_iter()
            .map(|g| (*g).clone())
            .collect()
    }

    /// Units in a namespace, ordered by name.
    #[must_use]
    pub fn units(&self, namespace: &str) -> Vec<Unit> {
        self.inner
            .lock()
            .units
            .in_namespace(namespace)
            .into_iter()
            .map(|u| (*u).clone())
            .collect()
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get_workload(&self, namespace: &str, name: &str) -> ControllerResult<Workload> {
        let inner = self.inner.lock();
        let workload = inner.workloads.get(&ObjectKey::new(namespace, name))?;
        Ok((*workload).clone())
    }

    async fn update_workload(&self, workload: &Workload) -> ControllerResult<Workload> {
        let mut inner = self.inner.lock();
        let current = inner.workloads.check_version(workload)?;

        let mut next = workload.clone();
        next.status = current.status.clone();
        next.metadata.uid = current.metadata.uid.clone();
        next.metadata.creation_timestamp = current.metadata.creation_timestamp;
        next.metadata.deletion_timestamp = current.metadata.deletion_timestamp;
        next.metadata.generation = if next.spec == current.spec {
            current.metadata.generation
        } else {
            current.metadata.generation + 1
        };

        let version = inner.next_version();
        let stored = inner.workloads.store(next, version);
        drop(inner);
        self.record_write();
        Ok((*stored).clone())
    }

    async fn update_workload_status(&self, workload: &Workload) -> ControllerResult<Workload> {
        let mut inner = self.inner.lock();
        let current = inner.workloads.check_version(workload)?;

        let mut next = (*current).clone();
        next.status = workload.status.clone();

        let version = inner.next_version();
        let stored = inner.workloads.store(next, version);
        drop(inner);
        self.record_write();
        Ok((*stored).clone())
    }

    async fn create_replica_group(&self, group: &ReplicaGroup) -> ControllerResult<ReplicaGroup> {
        let mut inner = self.inner.lock();
        inner.check_namespace(&group.metadata.namespace)?;

        let mut next = group.clone();
        next.metadata.uid = Uid::default();
        next.metadata.generation = 1;
        next.metadata.creation_timestamp = Utc::now();

        let version = inner.next_version();
        let stored = inner.groups.create(next, version)?;
        drop(inner);
        self.record_write();
        Ok((*stored).clone())
    }

    async fn update_replica_group(&self, group: &ReplicaGroup) -> ControllerResult<ReplicaGroup> {
        let mut inner = self.inner.lock();
        let current = inner.groups.check_version(group)?;

        let mut next = group.clone();
        next.status = current.status.clone();
        next.metadata.uid = current.metadata.uid.clone();
        next.metadata.creation_timestamp = current.metadata.creation_timestamp;
        next.metadata.deletion_timestamp = current.metadata.deletion_timestamp;
        next.metadata.generation = if next.spec == current.spec {
            current.metadata.generation
        } else {
            current.metadata.generation + 1
        };

        let version = inner.next_version();
        let stored = inner.groups.store(next, version);
        drop(inner);
        self.record_write();
        Ok((*stored).clone())
    }

    async fn delete_replica_group(
        &self,
        namespace: &str,
        name: &str,
        uid: &Uid,
    ) -> ControllerResult<()> {
        let key = ObjectKey::new(namespace, name);
        let mut inner = self.inner.lock();
        let current = inner.groups.get(&key)?;
        if &current.metadata.uid != uid {
            return Err(ControllerError::conflict(
                ReplicaGroup::KIND,
                key,
                format!("uid {uid} does not match {}", current.metadata.uid),
            ));
        }
        inner.groups.remove(&key)?;
        drop(inner);
        self.record_write();
        Ok(())
    }
}

impl ListWatch<Workload> for MemoryCluster {
    fn list(&self) -> Vec<Arc<Workload>> {
        self.inner.lock().workloads.objects.values().cloned().collect()
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<Workload>> {
        self.inner.lock().workloads.events.subscribe()
    }
}

impl ListWatch<ReplicaGroup> for MemoryCluster {
    fn list(&self) -> Vec<Arc<ReplicaGroup>> {
        self.inner.lock().groups.objects.values().cloned().collect()
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<ReplicaGroup>> {
        self.inner.lock().groups.events.subscribe()
    }
}

impl ListWatch<Unit> for MemoryCluster {
    fn list(&self) -> Vec<Arc<Unit>> {
        self.inner.lock().units.objects.values().cloned().collect()
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<Unit>> {
        self.inner.lock().units.events.subscribe()
    }
}
