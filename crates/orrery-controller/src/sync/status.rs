//! Workload status and rollout progress.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use orrery_core::{Condition, ConditionStatus, ConditionType, Resource, Workload, WorkloadStatus};
use tracing::debug;

use super::groups::{self, GroupSplit};
use super::{reasons, SyncEngine};
use crate::error::ControllerResult;

/// Status derived from the workload's groups.
///
/// Existing conditions are carried over and the `Available` condition is
/// recomputed.
pub fn calculate_status(workload: &Workload, split: &GroupSplit) -> ControllerResult<WorkloadStatus> {
    let available = groups::available_replica_count(split.all());
    let desired_total = groups::replica_count(split.all());

    let mut status = WorkloadStatus {
        observed_generation: workload.metadata.generation,
        replicas: groups::actual_replica_count(split.all()),
        updated_replicas: groups::actual_replica_count(split.new.iter()),
        ready_replicas: groups::ready_replica_count(split.all()),
        available_replicas: available,
        unavailable_replicas: (desired_total - available).max(0),
        collision_count: workload.status.collision_count,
        conditions: workload.status.conditions.clone(),
    };

    let min_available = workload.spec.replicas - groups::max_unavailable(workload)?;
    let condition = if available >= min_available {
        Condition::new(
            ConditionType::Available,
            ConditionStatus::True,
            reasons::MINIMUM_REPLICAS_AVAILABLE,
            "Workload has minimum availability.",
        )
    } else {
        Condition::new(
            ConditionType::Available,
            ConditionStatus::False,
            reasons::MINIMUM_REPLICAS_UNAVAILABLE,
            "Workload does not have minimum availability.",
        )
    };
    status.set_condition(condition);
    Ok(status)
}

fn progress_deadline(workload: &Workload) -> Option<TimeDelta> {
    workload
        .spec
        .progress_deadline_seconds
        .filter(|_| workload.has_progress_deadline())
        .and_then(TimeDelta::try_seconds)
}

/// Whether the rollout has gone without progress for longer than its deadline.
#[must_use]
pub fn timed_out(workload: &Workload, status: &WorkloadStatus) -> bool {
    let Some(deadline) = progress_deadline(workload) else {
        return false;
    };
    let Some(condition) = status.condition(ConditionType::Progressing) else {
        return false;
    };
    match condition.reason.as_str() {
        reasons::NEW_GROUP_AVAILABLE => false,
        reasons::PROGRESS_DEADLINE_EXCEEDED => true,
        _ => condition
            .last_update_time
            .checked_add_signed(deadline)
            .is_some_and(|expiry| expiry < Utc::now()),
    }
}

impl SyncEngine {
    /// Write the derived status when it differs from the stored one.
    pub(super) async fn sync_status(
        &self,
        workload: &mut Workload,
        split: &GroupSplit,
    ) -> ControllerResult<()> {
        let status = calculate_status(workload, split)?;
        if status == workload.status {
            return Ok(());
        }
        workload.status = status;
        *workload = self.client.update_workload_status(workload).await?;
        Ok(())
    }

    /// Like [`sync_status`](Self::sync_status), also maintaining the
    /// `Progressing` condition against the progress deadline.
    pub(super) async fn sync_rollout_status(
        &self,
        workload: &mut Workload,
        split: &GroupSplit,
    ) -> ControllerResult<()> {
        let mut status = calculate_status(workload, split)?;
        let has_deadline = workload.has_progress_deadline();
        if !has_deadline {
            status.remove_condition(ConditionType::Progressing);
        }

        let current = workload
            .status
            .condition(ConditionType::Progressing)
            .cloned();
        let already_complete = status.replicas == status.updated_replicas
            && current
                .as_ref()
                .is_some_and(|c| c.reason == reasons::NEW_GROUP_AVAILABLE);

        if has_deadline && !already_complete {
            let subject = match &split.new {
                Some(group) => format!("Replica group {:?}", group.metadata.name),
                None => format!("Workload {:?}", workload.metadata.name),
            };
            if groups::rollout_complete(workload, &status) {
                status.set_condition(Condition::new(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    reasons::NEW_GROUP_AVAILABLE,
                    format!("{subject} has successfully progressed."),
                ));
            } else if groups::rollout_progressing(workload, &status) {
                let mut condition = Condition::new(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    reasons::GROUP_UPDATED,
                    format!("{subject} is progressing."),
                );
                // Replace rather than update so the last update time moves.
                if let Some(current) = &current {
                    if current.status == ConditionStatus::True {
                        condition.last_transition_time = current.last_transition_time;
                    }
                    status.remove_condition(ConditionType::Progressing);
                }
                status.set_condition(condition);
            } else if timed_out(workload, &status) {
                status.set_condition(Condition::new(
                    ConditionType::Progressing,
                    ConditionStatus::False,
                    reasons::PROGRESS_DEADLINE_EXCEEDED,
                    format!("{subject} has timed out progressing."),
                ));
            }
        }

        if status == workload.status {
            self.requeue_stuck(workload, &status);
            return Ok(());
        }
        workload.status = status;
        *workload = self.client.update_workload_status(workload).await?;
        Ok(())
    }

    /// Schedule a recheck for when an unfinished rollout would hit its deadline.
    fn requeue_stuck(&self, workload: &Workload, status: &WorkloadStatus) {
        let Some(current) = workload.status.condition(ConditionType::Progressing) else {
            return;
        };
        let Some(deadline) = progress_deadline(workload) else {
            return;
        };
        if groups::rollout_complete(workload, status)
            || current.reason == reasons::PROGRESS_DEADLINE_EXCEEDED
        {
            return;
        }

        let key = workload.key().to_string();
        let remaining = current
            .last_update_time
            .checked_add_signed(deadline)
            .and_then(|expiry| (expiry - Utc::now()).to_std().ok());

        match remaining {
            Some(after) if after >= Duration::from_secs(1) => {
                debug!(workload = %key, after = ?after, "queueing up workload for a progress check");
                self.queue.add_after(key, after + Duration::from_secs(1));
            }
            _ => self.queue.add_rate_limited(key),
        }
    }

    /// Reflect pause and resume in the `Progressing` condition.
    ///
    /// Runs before any rollout step so that time spent paused does not count
    /// against the progress deadline.
    pub(super) async fn check_paused_conditions(&self, workload: &mut Workload) -> ControllerResult<()> {
        if !workload.has_progress_deadline() {
            return Ok(());
        }
        let current = workload.status.condition(ConditionType::Progressing);
        if current.is_some_and(|c| c.reason == reasons::PROGRESS_DEADLINE_EXCEEDED) {
            return Ok(());
        }
        let paused_recorded = current.is_some_and(|c| c.reason == reasons::PAUSED);

        let condition = match (workload.spec.paused, paused_recorded) {
            (true, false) => Condition::new(
                ConditionType::Progressing,
                ConditionStatus::Unknown,
                reasons::PAUSED,
                "Workload is paused",
            ),
            (false, true) => Condition::new(
                ConditionType::Progressing,
                ConditionStatus::Unknown,
                reasons::RESUMED,
                "Workload is resumed",
            ),
            _ => return Ok(()),
        };
        workload.status.set_condition(condition);
        *workload = self.client.update_workload_status(workload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use orrery_core::{
        ObjectMeta, ReplicaGroup, ReplicaGroupSpec, ReplicaGroupStatus, WorkloadSpec,
    };

    use super::*;

    fn workload(replicas: i32) -> Workload {
        let mut metadata = ObjectMeta::new("default", "web");
        metadata.generation = 4;
        Workload {
            metadata,
            spec: WorkloadSpec {
                replicas,
                progress_deadline_seconds: Some(600),
                ..WorkloadSpec::default()
            },
            status: WorkloadStatus::default(),
        }
    }

    fn group(name: &str, replicas: i32, ready: i32, available: i32) -> Arc<ReplicaGroup> {
        Arc::new(ReplicaGroup {
            metadata: ObjectMeta::new("default", name),
            spec: ReplicaGroupSpec {
                replicas,
                ..ReplicaGroupSpec::default()
            },
            status: ReplicaGroupStatus {
                replicas,
                ready_replicas: ready,
                available_replicas: available,
            },
        })
    }

    #[test]
    fn status_counts_every_group() {
        let w = workload(4);
        let split = GroupSplit {
            new: Some(group("web-new", 2, 2, 1)),
            old: vec![group("web-old", 2, 2, 2)],
        };
        let status = calculate_status(&w, &split).expect("status");
        assert_eq!(status.observed_generation, 4);
        assert_eq!(status.replicas, 4);
        assert_eq!(status.updated_replicas, 2);
        assert_eq!(status.ready_replicas, 4);
        assert_eq!(status.available_replicas, 3);
        assert_eq!(status.unavailable_replicas, 1);

        // 25% of 4 may be unavailable.
        let available = status.condition(ConditionType::Available).expect("available");
        assert_eq!(available.status, ConditionStatus::True);
    }

    #[test]
    fn below_minimum_availability() {
        let w = workload(4);
        let split = GroupSplit {
            new: Some(group("web-new", 4, 0, 0)),
            old: Vec::new(),
        };
        let status = calculate_status(&w, &split).expect("status");
        let available = status.condition(ConditionType::Available).expect("available");
        assert_eq!(available.status, ConditionStatus::False);
        assert_eq!(available.reason, reasons::MINIMUM_REPLICAS_UNAVAILABLE);
    }

    #[test]
    fn timed_out_uses_last_update_time() {
        let w = workload(1);
        let mut status = WorkloadStatus::default();
        let mut stale = Condition::new(
            ConditionType::Progressing,
            ConditionStatus::True,
            reasons::GROUP_UPDATED,
            "",
        );
        stale.last_update_time = Utc::now() - TimeDelta::seconds(601);
        status.set_condition(stale);
        assert!(timed_out(&w, &status));

        status.set_condition(Condition::new(
            ConditionType::Progressing,
            ConditionStatus::True,
            reasons::NEW_GROUP_AVAILABLE,
            "",
        ));
        assert!(!timed_out(&w, &status));
    }
}
