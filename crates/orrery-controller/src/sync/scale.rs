//! Scaling replica groups, including proportional scaling mid-rollout.

use std::cmp::Ordering;
use std::sync::Arc;

use metrics::counter;
use orrery_core::annotations::{self, DESIRED_REPLICAS, MAX_REPLICAS};
use orrery_core::{ReplicaGroup, Resource, StrategyType, Workload};
use tracing::debug;

use super::groups::{self, GroupSplit};
use super::{reasons, SyncEngine};
use crate::error::{ControllerError, ControllerResult};
use crate::recorder::EventType;

/// Whether the workload's replica count changed since its active groups
/// were last scaled.
#[must_use]
pub fn is_scaling_event(workload: &Workload, split: &GroupSplit) -> bool {
    split
        .all()
        .filter(|g| groups::is_active(g))
        .filter_map(|g| annotations::parse_i32(g.metadata.annotation(DESIRED_REPLICAS)))
        .any(|desired| desired != workload.spec.replicas)
}

/// Division rounding half away from zero.
fn round_div(numerator: i64, denominator: i64) -> i64 {
    let quotient = (2 * numerator.abs() + denominator.abs()) / (2 * denominator.abs());
    if (numerator < 0) == (denominator < 0) {
        quotient
    } else {
        -quotient
    }
}

/// Change in size for `group` if it kept its share of the workload's
/// maximum replica count.
fn group_fraction(workload: &Workload, group: &ReplicaGroup) -> ControllerResult<i32> {
    let replicas = group.spec.replicas;
    if workload.spec.replicas == 0 {
        return Ok(-replicas);
    }

    let max_now = groups::max_replicas(workload)?;
    let max_before = match annotations::parse_i32(group.metadata.annotation(MAX_REPLICAS)) {
        Some(max) if max != 0 => max,
        // Fall back to the workload's current size.
        _ if workload.status.replicas == 0 => return Ok(0),
        _ => workload.status.replicas,
    };

    let scaled = round_div(
        i64::from(replicas) * i64::from(max_now),
        i64::from(max_before),
    );
    let scaled = i32::try_from(scaled).map_err(|_| {
        ControllerError::internal(format!(
            "proportional size {scaled} for replica group {} is out of range",
            group.metadata.name
        ))
    })?;
    Ok(scaled - replicas)
}

/// Replicas to add to (or remove from) `group`, given that `added` of
/// `to_add` have already been handed out.
fn proportion(
    workload: &Workload,
    group: &ReplicaGroup,
    to_add: i32,
    added: i32,
) -> ControllerResult<i32> {
    if group.spec.replicas == 0 || to_add == 0 || to_add == added {
        return Ok(0);
    }
    let fraction = group_fraction(workload, group)?;
    let allowed = to_add - added;
    Ok(if to_add > 0 {
        fraction.min(allowed)
    } else {
        fraction.max(allowed)
    })
}

impl SyncEngine {
    /// Scale convergence without starting a rollout. Used while paused and
    /// when the workload's replica count changed.
    pub(super) async fn sync_scale(
        &self,
        workload: &mut Workload,
        mut split: GroupSplit,
    ) -> ControllerResult<()> {
        self.scale(workload, &mut split).await?;
        if workload.spec.paused && workload.spec.rollback_to.is_none() {
            self.cleanup(workload, &split).await?;
        }
        self.sync_status(workload, &split).await
    }

    async fn scale(&self, workload: &Workload, split: &mut GroupSplit) -> ControllerResult<()> {
        let desired = workload.spec.replicas;

        // A lone group is also brought up to date when only its replica
        // annotations are stale.
        if let Some(group) = split.active_or_latest_mut() {
            self.scale_group(workload, group, desired).await?;
            return Ok(());
        }

        // Mid-rollout. Once the new group is saturated the old ones can go.
        if split
            .new
            .as_ref()
            .is_some_and(|g| groups::is_saturated(workload, g))
        {
            for old in split.old.iter_mut().filter(|g| groups::is_active(g)) {
                self.scale_group_and_record(workload, old, 0).await?;
            }
            return Ok(());
        }

        if workload.spec.strategy.kind != StrategyType::RollingUpdate {
            return Ok(());
        }

        let mut active: Vec<&mut Arc<ReplicaGroup>> = split
            .old
            .iter_mut()
            .chain(split.new.iter_mut())
            .filter(|g| groups::is_active(g))
            .collect();

        let current: i32 = active.iter().map(|g| g.spec.replicas).sum();
        let allowed = if desired > 0 {
            groups::max_replicas(workload)?
        } else {
            0
        };
        let to_add = allowed - current;

        // Larger groups absorb the change first: newer ones when growing,
        // older ones when shrinking.
        match to_add.cmp(&0) {
            Ordering::Greater => active.sort_by(|a, b| groups::by_size_newer(a, b)),
            Ordering::Less => active.sort_by(|a, b| groups::by_size_older(a, b)),
            Ordering::Equal => {}
        }

        let mut added = 0;
        let mut sizes = Vec::with_capacity(active.len());
        for group in &active {
            let share = proportion(workload, group, to_add, added)?;
            sizes.push(group.spec.replicas + share);
            added += share;
        }
        // Rounding leftovers go to the largest group.
        if let Some(first) = sizes.first_mut() {
            *first = (*first + to_add - added).max(0);
        }

        debug!(workload = %workload.key(), to_add, "scaling replica groups proportionally");
        for (group, size) in active.into_iter().zip(sizes) {
            self.scale_group(workload, group, size).await?;
        }
        Ok(())
    }

    /// Scale `group` to `replicas`, doing nothing when it is already that size.
    pub(super) async fn scale_group_and_record(
        &self,
        workload: &Workload,
        group: &mut Arc<ReplicaGroup>,
        replicas: i32,
    ) -> ControllerResult<bool> {
        if group.spec.replicas == replicas {
            return Ok(false);
        }
        self.scale_group(workload, group, replicas).await
    }

    /// Write `replicas` and fresh replica annotations to `group`. Returns
    /// whether the size changed.
    pub(super) async fn scale_group(
        &self,
        workload: &Workload,
        group: &mut Arc<ReplicaGroup>,
        replicas: i32,
    ) -> ControllerResult<bool> {
        let desired = workload.spec.replicas;
        let max = groups::max_replicas(workload)?;
        let previous = group.spec.replicas;
        let resize = previous != replicas;
        if !resize && !groups::replicas_annotations_need_update(group, desired, max) {
            return Ok(false);
        }

        let mut next = (**group).clone();
        next.spec.replicas = replicas;
        groups::set_replicas_annotations(&mut next, desired, max);
        *group = Arc::new(self.client.update_replica_group(&next).await?);

        if !resize {
            return Ok(false);
        }
        let direction = if previous < replicas { "up" } else { "down" };
        self.recorder.record(
            workload,
            EventType::Normal,
            reasons::SCALING_REPLICA_GROUP,
            &format!(
                "Scaled {direction} replica group {} to {replicas} from {previous}",
                group.metadata.name
            ),
        );
        counter!("orrery.sync.group_scales", "direction" => direction).increment(1);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use orrery_core::{
        IntOrPercent, ObjectMeta, ReplicaGroupSpec, ReplicaGroupStatus, RollingUpdateParams,
        WorkloadSpec, WorkloadStatus, WorkloadStrategy,
    };

    use super::*;

    fn workload(replicas: i32) -> Workload {
        Workload {
            metadata: ObjectMeta::new("default", "web"),
            spec: WorkloadSpec {
                replicas,
                strategy: WorkloadStrategy {
                    kind: StrategyType::RollingUpdate,
                    rolling_update: Some(RollingUpdateParams {
                        max_surge: IntOrPercent::Int(3),
                        max_unavailable: IntOrPercent::Int(2),
                    }),
                },
                ..WorkloadSpec::default()
            },
            status: WorkloadStatus::default(),
        }
    }

    fn group(replicas: i32, desired: i32, max: Option<i32>) -> ReplicaGroup {
        let mut metadata = ObjectMeta::new("default", "web-abc");
        metadata
            .annotations
            .insert(DESIRED_REPLICAS.to_owned(), desired.to_string());
        if let Some(max) = max {
            metadata
                .annotations
                .insert(MAX_REPLICAS.to_owned(), max.to_string());
        }
        ReplicaGroup {
            metadata,
            spec: ReplicaGroupSpec {
                replicas,
                ..ReplicaGroupSpec::default()
            },
            status: ReplicaGroupStatus::default(),
        }
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_div(5, 2), 3);
        assert_eq!(round_div(7, 3), 2);
        assert_eq!(round_div(-5, 2), -3);
        assert_eq!(round_div(8, 4), 2);
    }

    #[test]
    fn fraction_keeps_share_of_max_replicas() {
        // Scaled from 10 (+3 surge) to 20 (+3 surge): a group at 5 of 13
        // should grow to round(5 * 23 / 13) = 9.
        let w = workload(20);
        let g = group(5, 10, Some(13));
        assert_eq!(group_fraction(&w, &g).expect("fraction"), 4);
    }

    #[test]
    fn fraction_falls_back_to_current_size() {
        let mut w = workload(20);
        let g = group(5, 10, None);
        assert_eq!(group_fraction(&w, &g).expect("fraction"), 0);

        w.status.replicas = 10;
        // round(5 * 23 / 10) = 12.
        assert_eq!(group_fraction(&w, &g).expect("fraction"), 7);
    }

    #[test]
    fn scaling_to_zero_removes_everything() {
        let w = workload(0);
        let g = group(5, 10, Some(13));
        assert_eq!(group_fraction(&w, &g).expect("fraction"), -5);
    }

    #[test]
    fn proportion_is_capped_by_what_is_left() {
        let w = workload(20);
        let g = group(5, 10, Some(13));
        assert_eq!(proportion(&w, &g, 10, 8).expect("proportion"), 2);
        assert_eq!(proportion(&w, &g, 10, 10).expect("proportion"), 0);
    }

    #[test]
    fn scaling_event_only_considers_active_groups() {
        let w = workload(4);
        let split = GroupSplit {
            new: Some(Arc::new(group(4, 4, None))),
            old: vec![Arc::new(group(0, 2, None))],
        };
        assert!(!is_scaling_event(&w, &split));

        let split = GroupSplit {
            new: Some(Arc::new(group(2, 2, None))),
            old: Vec::new(),
        };
        assert!(is_scaling_event(&w, &split));
    }
}
