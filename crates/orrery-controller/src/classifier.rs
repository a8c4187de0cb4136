//! Turns change notifications into workload keys to sync.

use std::sync::Arc;

use orrery_core::{
    LabelSelector, OwnerReference, ReplicaGroup, Resource, StrategyType, Unit, Workload,
};
use tracing::debug;

use crate::cache::Lister;
use crate::grouping::{group_units, unit_count};
use crate::queue::WorkQueue;
use crate::watch::{DeletedObject, WatchEvent};

/// Maps workload, replica group and unit events onto workload keys.
pub struct EventClassifier {
    workloads: Arc<dyn Lister<Workload>>,
    groups: Arc<dyn Lister<ReplicaGroup>>,
    units: Arc<dyn Lister<Unit>>,
    queue: WorkQueue<String>,
}

impl EventClassifier {
    /// Create a classifier reading from the given caches.
    #[must_use]
    pub fn new(
        workloads: Arc<dyn Lister<Workload>>,
        groups: Arc<dyn Lister<ReplicaGroup>>,
        units: Arc<dyn Lister<Unit>>,
        queue: WorkQueue<String>,
    ) -> Self {
        Self {
            workloads,
            groups,
            units,
            queue,
        }
    }

    fn enqueue(&self, workload: &Workload) {
        self.queue.add(workload.key().to_string());
    }

    /// Handle a workload notification.
    pub fn on_workload(&self, event: &WatchEvent<Workload>) {
        match event {
            WatchEvent::Added(w) => {
                debug!(workload = %w.key(), "workload added");
                self.enqueue(w);
            }
            WatchEvent::Updated { new, .. } => {
                debug!(workload = %new.key(), "workload updated");
                self.enqueue(new);
            }
            WatchEvent::Deleted(deleted) => {
                let key = deleted.key();
                debug!(workload = %key, "workload deleted");
                self.queue.add(key.to_string());
            }
        }
    }

    /// Handle a replica group notification.
    pub fn on_replica_group(&self, event: &WatchEvent<ReplicaGroup>) {
        match event {
            WatchEvent::Added(group) => self.replica_group_added(group),
            WatchEvent::Updated { old, new } => self.replica_group_updated(old, new),
            WatchEvent::Deleted(deleted) => {
                let group = deleted.clone().into_object();
                self.replica_group_deleted(&group);
            }
        }
    }

    /// Handle a unit notification. Only deletes matter.
    pub fn on_unit(&self, event: &WatchEvent<Unit>) {
        if let WatchEvent::Deleted(deleted) = event {
            self.unit_deleted(deleted);
        }
    }

    fn replica_group_added(&self, group: &ReplicaGroup) {
        // Seen for the first time already being deleted, e.g. after a restart.
        if group.metadata.is_deleting() {
            self.replica_group_deleted(group);
            return;
        }

        if let Some(owner) = group.controller_ref() {
            if let Some(w) = self.resolve_controller_ref(&group.metadata.namespace, owner) {
                debug!(replica_group = %group.key(), "replica group added");
                self.enqueue(&w);
            }
            return;
        }

        // Orphan: wake every workload that might adopt it.
        let candidates = self.workloads_for_group(group);
        if candidates.is_empty() {
            return;
        }
        debug!(replica_group = %group.key(), "orphan replica group added");
        for w in candidates {
            self.enqueue(&w);
        }
    }

    fn replica_group_updated(&self, old: &ReplicaGroup, new: &ReplicaGroup) {
        if old.metadata.resource_version == new.metadata.resource_version {
            // Periodic resync; nothing changed.
            return;
        }

        let old_owner = old.controller_ref();
        let new_owner = new.controller_ref();
        let owner_changed = old_owner != new_owner;
        if owner_changed {
            if let Some(owner) = old_owner {
                if let Some(w) = self.resolve_controller_ref(&old.metadata.namespace, owner) {
                    self.enqueue(&w);
                }
            }
        }

        if let Some(owner) = new_owner {
            if let Some(w) = self.resolve_controller_ref(&new.metadata.namespace, owner) {
                debug!(replica_group = %new.key(), "replica group updated");
                self.enqueue(&w);
            }
            return;
        }

        if new.metadata.labels != old.metadata.labels || owner_changed {
            let candidates = self.workloads_for_group(new);
            if candidates.is_empty() {
                return;
            }
            debug!(replica_group = %new.key(), "orphan replica group updated");
            for w in candidates {
                self.enqueue(&w);
            }
        }
    }

    fn replica_group_deleted(&self, group: &ReplicaGroup) {
        // Nobody cares about deleted orphans.
        let Some(owner) = group.controller_ref() else {
            return;
        };
        if let Some(w) = self.resolve_controller_ref(&group.metadata.namespace, owner) {
            debug!(replica_group = %group.key(), "replica group deleted");
            self.enqueue(&w);
        }
    }

    fn unit_deleted(&self, deleted: &DeletedObject<Unit>) {
        let unit = deleted.clone().into_object();
        debug!(unit = %unit.key(), "unit deleted");

        let Some(w) = self.workload_for_unit(&unit) else {
            return;
        };
        if w.spec.strategy.kind != StrategyType::Recreate {
            return;
        }

        // Recreate waits for every old unit to disappear; wake it on the last one.
        let owned: Vec<Arc<ReplicaGroup>> = self
            .groups
            .list(&w.metadata.namespace, &LabelSelector::default())
            .into_iter()
            .filter(|g| g.controller_ref().is_some_and(|r| r.refers_to(w.as_ref())))
            .collect();
        match group_units(&w, &owned, self.units.as_ref()) {
            Ok(map) if unit_count(&map) == 0 => self.enqueue(&w),
            Ok(_) => {}
            Err(e) => debug!(workload = %w.key(), error = %e, "cannot group units"),
        }
    }

    /// Look up the workload named by `owner`, verifying kind and uid.
    fn resolve_controller_ref(
        &self,
        namespace: &str,
        owner: &OwnerReference,
    ) -> Option<Arc<Workload>> {
        if owner.kind != Workload::KIND {
            return None;
        }
        let w = self.workloads.get(namespace, &owner.name)?;
        // Names are reused after deletion; a different uid is a different workload.
        (w.metadata.uid == owner.uid).then_some(w)
    }

    /// Walk unit, then replica group, then workload.
    fn workload_for_unit(&self, unit: &Unit) -> Option<Arc<Workload>> {
        let owner = unit.controller_ref()?;
        if owner.kind != ReplicaGroup::KIND {
            return None;
        }
        let ns = &unit.metadata.namespace;
        let Some(group) = self.groups.get(ns, &owner.name) else {
            debug!(unit = %unit.key(), replica_group = %owner.name, "cannot find replica group for unit");
            return None;
        };
        if group.metadata.uid != owner.uid {
            return None;
        }
        self.resolve_controller_ref(ns, group.controller_ref()?)
    }

    /// Workloads whose selector matches an orphan group's labels.
    fn workloads_for_group(&self, group: &ReplicaGroup) -> Vec<Arc<Workload>> {
        if group.metadata.labels.is_empty() {
            return Vec::new();
        }
        let matching: Vec<_> = self
            .workloads
            .list(&group.metadata.namespace, &LabelSelector::default())
            .into_iter()
            .filter(|w| {
                let selector = &w.spec.selector;
                selector.validate().is_ok()
                    && !selector.is_empty()
                    && selector.matches(&group.metadata.labels)
            })
            .collect();

        if matching.len() > 1 {
            debug!(
                replica_group = %group.key(),
                workloads = matching.len(),
                "more than one workload selects replica group"
            );
        }
        matching
    }
}

#[cfg(test)]
mod tests {
    use orrery_core::{
        ObjectMeta, ReplicaGroupSpec, ReplicaGroupStatus, Uid, UnitSpec, UnitStatus,
        WorkloadSpec, WorkloadStatus, WorkloadStrategy,
    };

    use super::*;
    use crate::cache::ObjectCache;
    use crate::config::QueueConfig;

    struct Fixture {
        workloads: Arc<ObjectCache<Workload>>,
        groups: Arc<ObjectCache<ReplicaGroup>>,
        units: Arc<ObjectCache<Unit>>,
        queue: WorkQueue<String>,
        classifier: EventClassifier,
    }

    impl Fixture {
        fn new() -> Self {
            let workloads = Arc::new(ObjectCache::new());
            let groups = Arc::new(ObjectCache::new());
            let units = Arc::new(ObjectCache::new());
            let queue = WorkQueue::new(&QueueConfig::default());
            let classifier = EventClassifier::new(
                Arc::clone(&workloads) as Arc<dyn Lister<Workload>>,
                Arc::clone(&groups) as Arc<dyn Lister<ReplicaGroup>>,
                Arc::clone(&units) as Arc<dyn Lister<Unit>>,
                queue.clone(),
            );
            Self {
                workloads,
                groups,
                units,
                queue,
                classifier,
            }
        }

        async fn drain(&self) -> Vec<String> {
            let mut keys = Vec::new();
            while !self.queue.is_empty() {
                let key = self.queue.get().await.expect("key");
                self.queue.done(&key);
                keys.push(key);
            }
            keys.sort();
            keys
        }
    }

    fn workload(name: &str, uid: &str, strategy: StrategyType) -> Arc<Workload> {
        let mut metadata = ObjectMeta::new("default", name);
        metadata.uid = Uid::new(uid);
        Arc::new(Workload {
            metadata,
            spec: WorkloadSpec {
                selector: LabelSelector::from_labels([("app", "x")]),
                strategy: WorkloadStrategy {
                    kind: strategy,
                    rolling_update: None,
                },
                ..WorkloadSpec::default()
            },
            status: WorkloadStatus::default(),
        })
    }

    fn group(name: &str, uid: &str, owner: Option<&Workload>) -> ReplicaGroup {
        let mut metadata = ObjectMeta::new("default", name);
        metadata.uid = Uid::new(uid);
        metadata.resource_version = 1;
        metadata.labels.insert("app".to_owned(), "x".to_owned());
        if let Some(w) = owner {
            metadata
                .owner_references
                .push(OwnerReference::controller_of(w));
        }
        ReplicaGroup {
            metadata,
            spec: ReplicaGroupSpec::default(),
            status: ReplicaGroupStatus::default(),
        }
    }

    fn unit(name: &str, owner: &ReplicaGroup) -> Arc<Unit> {
        let mut metadata = ObjectMeta::new("default", name);
        metadata.labels.insert("app".to_owned(), "x".to_owned());
        metadata
            .owner_references
            .push(OwnerReference::controller_of(owner));
        Arc::new(Unit {
            metadata,
            spec: UnitSpec::default(),
            status: UnitStatus::default(),
        })
    }

    #[tokio::test]
    async fn owned_group_add_enqueues_owner() {
        let fx = Fixture::new();
        let w = workload("web", "w1", StrategyType::RollingUpdate);
        fx.workloads.apply(&WatchEvent::Added(Arc::clone(&w)));

        let g = Arc::new(group("web-1", "g1", Some(&*w)));
        fx.classifier.on_replica_group(&WatchEvent::Added(g));
        assert_eq!(fx.drain().await, vec!["default/web"]);
    }

    #[tokio::test]
    async fn owner_with_reused_name_is_ignored() {
        let fx = Fixture::new();
        let old = workload("web", "w-old", StrategyType::RollingUpdate);
        let current = workload("web", "w-new", StrategyType::RollingUpdate);
        fx.workloads.apply(&WatchEvent::Added(current));

        let g = Arc::new(group("web-1", "g1", Some(&*old)));
        fx.classifier.on_replica_group(&WatchEvent::Added(g));
        assert!(fx.drain().await.is_empty());
    }

    #[tokio::test]
    async fn orphan_group_add_enqueues_every_matching_workload() {
        let fx = Fixture::new();
        fx.workloads.apply(&WatchEvent::Added(workload(
            "a",
            "w1",
            StrategyType::RollingUpdate,
        )));
        fx.workloads.apply(&WatchEvent::Added(workload(
            "b",
            "w2",
            StrategyType::RollingUpdate,
        )));

        fx.classifier
            .on_replica_group(&WatchEvent::Added(Arc::new(group("x-1", "g1", None))));
        assert_eq!(fx.drain().await, vec!["default/a", "default/b"]);
    }

    #[tokio::test]
    async fn resync_with_same_version_is_ignored() {
        let fx = Fixture::new();
        let w = workload("web", "w1", StrategyType::RollingUpdate);
        fx.workloads.apply(&WatchEvent::Added(Arc::clone(&w)));

        let g = Arc::new(group("web-1", "g1", Some(&*w)));
        fx.classifier.on_replica_group(&WatchEvent::Updated {
            old: Arc::clone(&g),
            new: g,
        });
        assert!(fx.drain().await.is_empty());
    }

    #[tokio::test]
    async fn owner_change_wakes_old_and_new_owner() {
        let fx = Fixture::new();
        let a = workload("a", "w1", StrategyType::RollingUpdate);
        let b = workload("b", "w2", StrategyType::RollingUpdate);
        fx.workloads.apply(&WatchEvent::Added(Arc::clone(&a)));
        fx.workloads.apply(&WatchEvent::Added(Arc::clone(&b)));

        let old = Arc::new(group("x-1", "g1", Some(&*a)));
        let mut moved = group("x-1", "g1", Some(&*b));
        moved.metadata.resource_version = 2;
        fx.classifier.on_replica_group(&WatchEvent::Updated {
            old,
            new: Arc::new(moved),
        });
        assert_eq!(fx.drain().await, vec!["default/a", "default/b"]);
    }

    #[tokio::test]
    async fn orphan_group_delete_is_ignored() {
        let fx = Fixture::new();
        fx.workloads.apply(&WatchEvent::Added(workload(
            "web",
            "w1",
            StrategyType::RollingUpdate,
        )));
        let g = Arc::new(group("web-1", "g1", None));
        fx.classifier
            .on_replica_group(&WatchEvent::Deleted(DeletedObject::Live(g)));
        assert!(fx.drain().await.is_empty());
    }

    #[tokio::test]
    async fn tombstoned_group_delete_enqueues_owner() {
        let fx = Fixture::new();
        let w = workload("web", "w1", StrategyType::RollingUpdate);
        fx.workloads.apply(&WatchEvent::Added(Arc::clone(&w)));
        let g = Arc::new(group("web-1", "g1", Some(&*w)));
        fx.classifier
            .on_replica_group(&WatchEvent::Deleted(DeletedObject::Tombstone {
                key: g.key(),
                last_known: g,
            }));
        assert_eq!(fx.drain().await, vec!["default/web"]);
    }

    #[tokio::test]
    async fn last_unit_delete_wakes_recreate_workload() {
        let fx = Fixture::new();
        let w = workload("web", "w1", StrategyType::Recreate);
        fx.workloads.apply(&WatchEvent::Added(Arc::clone(&w)));
        let g = Arc::new(group("web-1", "g1", Some(&*w)));
        fx.groups.apply(&WatchEvent::Added(Arc::clone(&g)));

        let first = unit("u1", &g);
        let second = unit("u2", &g);
        fx.units.apply(&WatchEvent::Added(Arc::clone(&first)));
        fx.units.apply(&WatchEvent::Added(Arc::clone(&second)));

        let deleted = WatchEvent::Deleted(DeletedObject::Live(Arc::clone(&first)));
        fx.units.apply(&deleted);
        fx.classifier.on_unit(&deleted);
        assert!(fx.drain().await.is_empty(), "one unit still remains");

        let deleted = WatchEvent::Deleted(DeletedObject::Live(second));
        fx.units.apply(&deleted);
        fx.classifier.on_unit(&deleted);
        assert_eq!(fx.drain().await, vec!["default/web"]);
    }

    #[tokio::test]
    async fn unit_delete_ignored_for_rolling_update() {
        let fx = Fixture::new();
        let w = workload("web", "w1", StrategyType::RollingUpdate);
        fx.workloads.apply(&WatchEvent::Added(Arc::clone(&w)));
        let g = Arc::new(group("web-1", "g1", Some(&*w)));
        fx.groups.apply(&WatchEvent::Added(Arc::clone(&g)));

        let deleted = WatchEvent::Deleted(DeletedObject::Live(unit("u1", &g)));
        fx.classifier.on_unit(&deleted);
        assert!(fx.drain().await.is_empty());
    }
}
