//! Rolling updates within surge and unavailability bounds.

use std::cmp::Ordering;
use std::sync::Arc;

use orrery_core::{ReplicaGroup, Resource, Workload};
use tracing::debug;

use super::groups::{self, GroupSplit};
use super::revision::new_group_replicas;
use super::SyncEngine;
use crate::error::ControllerResult;

impl SyncEngine {
    /// One step of a rolling update: grow the new group, else shrink the
    /// old ones, else tidy up history once complete.
    pub(super) async fn rollout_rolling(
        &self,
        workload: &mut Workload,
        mut split: GroupSplit,
    ) -> ControllerResult<()> {
        self.sync_new_group(workload, &mut split, true).await?;

        if self.reconcile_new_group(workload, &mut split).await? {
            return self.sync_rollout_status(workload, &split).await;
        }
        if self.reconcile_old_groups(workload, &mut split).await? {
            return self.sync_rollout_status(workload, &split).await;
        }

        if groups::rollout_complete(workload, &workload.status) {
            self.cleanup(workload, &split).await?;
        }
        self.sync_rollout_status(workload, &split).await
    }

    async fn reconcile_new_group(
        &self,
        workload: &Workload,
        split: &mut GroupSplit,
    ) -> ControllerResult<bool> {
        let total = groups::replica_count(split.all());
        let desired = workload.spec.replicas;
        let Some(new) = split.new.as_mut() else {
            return Ok(false);
        };

        let target = match new.spec.replicas.cmp(&desired) {
            Ordering::Equal => return Ok(false),
            Ordering::Greater => desired,
            Ordering::Less => new_group_replicas(workload, total, new.spec.replicas)?,
        };
        self.scale_group_and_record(workload, new, target).await
    }

    async fn reconcile_old_groups(
        &self,
        workload: &Workload,
        split: &mut GroupSplit,
    ) -> ControllerResult<bool> {
        if groups::replica_count(&split.old) == 0 {
            return Ok(false);
        }

        let all = groups::replica_count(split.all());
        let min_available = workload.spec.replicas - groups::max_unavailable(workload)?;
        let new_unavailable = split
            .new
            .as_ref()
            .map_or(0, |g| g.spec.replicas - g.status.available_replicas);

        // Units still coming up in the new group must not be traded for
        // healthy old ones.
        let max_scaled_down = all - min_available - new_unavailable;
        if max_scaled_down <= 0 {
            return Ok(false);
        }

        let cleaned = self
            .cleanup_unhealthy(workload, &mut split.old, max_scaled_down)
            .await?;
        let scaled = self
            .scale_down_old_for_rolling(workload, split, min_available)
            .await?;
        debug!(
            workload = %workload.key(),
            cleaned,
            scaled,
            "reconciled old replica groups"
        );
        Ok(cleaned + scaled > 0)
    }

    /// Scale away old replicas that are not available, oldest groups first.
    async fn cleanup_unhealthy(
        &self,
        workload: &Workload,
        old: &mut [Arc<ReplicaGroup>],
        max_cleanup: i32,
    ) -> ControllerResult<i32> {
        old.sort_by(|a, b| groups::by_creation(a, b));

        let mut total = 0;
        for group in old.iter_mut() {
            if total >= max_cleanup {
                break;
            }
            let unhealthy = group.spec.replicas - group.status.available_replicas;
            if group.spec.replicas == 0 || unhealthy <= 0 {
                continue;
            }
            let count = (max_cleanup - total).min(unhealthy);
            let target = group.spec.replicas - count;
            self.scale_group_and_record(workload, group, target).await?;
            total += count;
        }
        Ok(total)
    }

    /// Scale down old groups while enough units stay available.
    async fn scale_down_old_for_rolling(
        &self,
        workload: &Workload,
        split: &mut GroupSplit,
        min_available: i32,
    ) -> ControllerResult<i32> {
        let available = groups::available_replica_count(split.all().filter(|g| groups::is_active(g)));
        if available <= min_available {
            return Ok(0);
        }
        let budget = available - min_available;

        split.old.sort_by(|a, b| groups::by_creation(a, b));
        let mut total = 0;
        for group in &mut split.old {
            if total >= budget {
                break;
            }
            if group.spec.replicas == 0 {
                continue;
            }
            let count = group.spec.replicas.min(budget - total);
            let target = group.spec.replicas - count;
            self.scale_group_and_record(workload, group, target).await?;
            total += count;
        }
        Ok(total)
    }
}
