//! Per-workload reconciliation.
//!
//! [`SyncEngine::sync`] reads the cached workload and its replica groups,
//! reconciles ownership, then takes the first applicable branch:
//!
//! 1. selector matches everything: warn and record the observed generation
//! 2. being deleted: status only
//! 3. paused: scale existing groups, never start a rollout
//! 4. rollback requested: roll back and clear the request
//! 5. replica count changed: scale existing groups proportionally
//! 6. otherwise roll out with the workload's strategy
//!
//! Cached objects are never mutated. Every write goes through the
//! [`ClusterClient`] with the resource version that was read, and the
//! returned object replaces the local copy so later writes in the same sync
//! do not conflict with earlier ones.

mod cleanup;
pub mod groups;
pub mod reasons;
mod recreate;
pub mod revision;
mod rollback;
mod rolling;
mod scale;
pub mod status;

use std::sync::Arc;
use std::time::Instant;

use orrery_core::{LabelSelector, ObjectKey, ReplicaGroup, StrategyType, Unit, Workload};
use tracing::debug;

pub use groups::GroupSplit;
pub use scale::is_scaling_event;

use crate::cache::Lister;
use crate::claim::claim_replica_groups;
use crate::error::{ControllerError, ControllerResult};
use crate::grouping::group_units;
use crate::queue::WorkQueue;
use crate::recorder::{EventRecorder, EventType};
use crate::store::ClusterClient;

/// Reconciles one workload at a time against its replica groups.
pub struct SyncEngine {
    client: Arc<dyn ClusterClient>,
    workloads: Arc<dyn Lister<Workload>>,
    groups: Arc<dyn Lister<ReplicaGroup>>,
    units: Arc<dyn Lister<Unit>>,
    recorder: Arc<dyn EventRecorder>,
    queue: WorkQueue<String>,
}

impl SyncEngine {
    /// Create a sync engine.
    ///
    /// `queue` is used to schedule progress-deadline rechecks.
    #[must_use]
    pub fn new(
        client: Arc<dyn ClusterClient>,
        workloads: Arc<dyn Lister<Workload>>,
        groups: Arc<dyn Lister<ReplicaGroup>>,
        units: Arc<dyn Lister<Unit>>,
        recorder: Arc<dyn EventRecorder>,
        queue: WorkQueue<String>,
    ) -> Self {
        Self {
            client,
            workloads,
            groups,
            units,
            recorder,
            queue,
        }
    }

    /// Reconcile the workload identified by `key` (`namespace/name`).
    ///
    /// A workload missing from the cache has been deleted and is not an
    /// error.
    pub async fn sync(&self, key: &str) -> ControllerResult<()> {
        let started = Instant::now();
        debug!(workload = key, "started syncing workload");
        let result = self.sync_key(key).await;
        debug!(
            workload = key,
            elapsed = ?started.elapsed(),
            "finished syncing workload"
        );
        result
    }

    async fn sync_key(&self, key: &str) -> ControllerResult<()> {
        let key = ObjectKey::parse(key)?;
        let Some(cached) = self.workloads.get(&key.namespace, &key.name) else {
            debug!(workload = %key, "workload has been deleted");
            return Ok(());
        };
        let mut workload = (*cached).clone();

        if workload.spec.selector.is_empty() {
            return self.reject_empty_selector(&mut workload).await;
        }

        // Every group in the namespace is a candidate so that groups which
        // stopped matching can be released.
        let candidates = self.groups.list(&key.namespace, &LabelSelector::default());
        let claimed = claim_replica_groups(self.client.as_ref(), &workload, candidates)
            .await?
            .claimed;
        let units = group_units(&workload, &claimed, self.units.as_ref())?;

        if workload.metadata.is_deleting() {
            let split = self.sync_revision(&mut workload, &claimed, false).await?;
            return self.sync_status(&mut workload, &split).await;
        }

        self.check_paused_conditions(&mut workload).await?;

        if workload.spec.paused {
            let split = self.sync_revision(&mut workload, &claimed, false).await?;
            return self.sync_scale(&mut workload, split).await;
        }

        if let Some(request) = workload.spec.rollback_to {
            return self.rollback(&mut workload, &claimed, request).await;
        }

        let split = self.sync_revision(&mut workload, &claimed, false).await?;
        if is_scaling_event(&workload, &split) {
            return self.sync_scale(&mut workload, split).await;
        }

        match workload.spec.strategy.kind.clone() {
            StrategyType::Recreate => self.rollout_recreate(&mut workload, split, &units).await,
            StrategyType::RollingUpdate => self.rollout_rolling(&mut workload, split).await,
            StrategyType::Unknown(name) => Err(ControllerError::UnknownStrategy(name)),
        }
    }

    async fn reject_empty_selector(&self, workload: &mut Workload) -> ControllerResult<()> {
        self.recorder.record(
            workload,
            EventType::Warning,
            reasons::SELECTING_ALL,
            "This workload is selecting all units. A non-empty selector is required.",
        );
        if workload.status.observed_generation < workload.metadata.generation {
            workload.status.observed_generation = workload.metadata.generation;
            *workload = self.client.update_workload_status(workload).await?;
        }
        Ok(())
    }

    /// Write back local changes to `workload`, replacing it with what the
    /// store returns. Metadata goes through a regular update and status
    /// through a status update.
    async fn persist_workload(
        &self,
        workload: &mut Workload,
        metadata: bool,
        status: bool,
    ) -> ControllerResult<()> {
        if metadata {
            let desired = workload.status.clone();
            *workload = self.client.update_workload(workload).await?;
            workload.status = desired;
        }
        if status {
            *workload = self.client.update_workload_status(workload).await?;
        }
        Ok(())
    }
}
