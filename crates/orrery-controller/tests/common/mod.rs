//! Common test utilities for controller integration tests.

pub mod fixtures;

use std::sync::Arc;

use orrery_controller::config::QueueConfig;
use orrery_controller::{
    ClusterClient, Controller, ControllerResult, EventRecorder, ListWatch, Lister, MemoryCluster,
    MemoryRecorder, ObjectCache, SyncEngine, WorkQueue,
};
use orrery_core::{ReplicaGroup, Unit, Workload};

/// Complete test controller setup with all components wired together.
///
/// Caches are refreshed from the cluster explicitly, so each test decides
/// exactly what state a sync observes.
pub struct TestCluster {
    pub cluster: Arc<MemoryCluster>,
    pub recorder: Arc<MemoryRecorder>,
    pub queue: WorkQueue<String>,
    pub workloads: Arc<ObjectCache<Workload>>,
    pub groups: Arc<ObjectCache<ReplicaGroup>>,
    pub units: Arc<ObjectCache<Unit>>,
    pub engine: Arc<SyncEngine>,
    pub controller: Controller,
}

impl TestCluster {
    /// Creates a new test cluster with default queue configuration.
    pub fn new() -> Self {
        Self::with_queue_config(QueueConfig::default())
    }

    /// Creates a test cluster whose failed syncs are retried without delay.
    pub fn with_immediate_retries() -> Self {
        Self::with_queue_config(QueueConfig {
            base_delay_ms: 0,
            ..QueueConfig::default()
        })
    }

    /// Creates a new test cluster with custom queue configuration.
    pub fn with_queue_config(config: QueueConfig) -> Self {
        let cluster = Arc::new(MemoryCluster::default());
        let recorder = Arc::new(MemoryRecorder::new());
        let queue = WorkQueue::new(&config);
        let workloads = Arc::new(ObjectCache::new());
        let groups = Arc::new(ObjectCache::new());
        let units = Arc::new(ObjectCache::new());

        let engine = Arc::new(SyncEngine::new(
            cluster.clone() as Arc<dyn ClusterClient>,
            workloads.clone() as Arc<dyn Lister<Workload>>,
            groups.clone() as Arc<dyn Lister<ReplicaGroup>>,
            units.clone() as Arc<dyn Lister<Unit>>,
            recorder.clone() as Arc<dyn EventRecorder>,
            queue.clone(),
        ));
        let controller = Controller::new(engine.clone(), queue.clone(), &config);

        Self {
            cluster,
            recorder,
            queue,
            workloads,
            groups,
            units,
            engine,
            controller,
        }
    }

    /// Replace every cache with the cluster's current contents.
    pub fn refresh(&self) {
        self.workloads
            .replace(ListWatch::<Workload>::list(self.cluster.as_ref()));
        self.groups
            .replace(ListWatch::<ReplicaGroup>::list(self.cluster.as_ref()));
        self.units
            .replace(ListWatch::<Unit>::list(self.cluster.as_ref()));
    }

    /// Refresh the caches, then sync `default/<name>`.
    pub async fn sync(&self, name: &str) -> ControllerResult<()> {
        self.refresh();
        self.sync_cached(name).await
    }

    /// Sync `default/<name>` against whatever the caches hold now.
    pub async fn sync_cached(&self, name: &str) -> ControllerResult<()> {
        self.engine.sync(&format!("default/{name}")).await
    }

    pub fn workload(&self, name: &str) -> Workload {
        self.cluster.workload("default", name).unwrap()
    }

    pub fn group(&self, name: &str) -> ReplicaGroup {
        self.cluster.replica_group("default", name).unwrap()
    }

    pub fn groups(&self) -> Vec<ReplicaGroup> {
        self.cluster.replica_groups("default")
    }

    /// Number of recorded events with `reason`.
    pub fn events_with_reason(&self, reason: &str) -> usize {
        self.recorder
            .reasons()
            .iter()
            .filter(|r| r.as_str() == reason)
            .count()
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}
