//! Arithmetic over a workload's replica groups.

use std::cmp::Ordering;
use std::sync::Arc;

use orrery_core::annotations::{self, DESIRED_REPLICAS, MAX_REPLICAS};
use orrery_core::{ReplicaGroup, RollingUpdateParams, StrategyType, Workload, WorkloadStatus};

use crate::error::{ControllerError, ControllerResult};

/// A workload's claimed groups, split by whether they run the current template.
#[derive(Debug, Clone, Default)]
pub struct GroupSplit {
    /// Group whose template matches the workload's.
    pub new: Option<Arc<ReplicaGroup>>,
    /// Every other claimed group.
    pub old: Vec<Arc<ReplicaGroup>>,
}

impl GroupSplit {
    /// Split `groups` into the group running the workload's template and the rest.
    ///
    /// When several groups match, the oldest one wins.
    #[must_use]
    pub fn new(workload: &Workload, groups: &[Arc<ReplicaGroup>]) -> Self {
        let mut sorted: Vec<Arc<ReplicaGroup>> = groups.to_vec();
        sorted.sort_by(|a, b| by_creation(a, b));

        let new = sorted
            .iter()
            .find(|g| workload.spec.template.equal_ignoring_hash(&g.spec.template))
            .cloned();
        let old = sorted
            .into_iter()
            .filter(|g| {
                new.as_ref()
                    .map_or(true, |n| n.metadata.uid != g.metadata.uid)
            })
            .collect();
        Self { new, old }
    }

    /// Every group, new first.
    pub fn all(&self) -> impl Iterator<Item = &Arc<ReplicaGroup>> {
        self.new.iter().chain(self.old.iter())
    }

    /// The group to scale when at most one group is running.
    ///
    /// With exactly one active group, that group. With none, the new group,
    /// or failing that the most recently created old group. With several
    /// active groups, `None`.
    pub fn active_or_latest_mut(&mut self) -> Option<&mut Arc<ReplicaGroup>> {
        enum Pick {
            New,
            Old(usize),
        }

        let new_active = self.new.as_ref().is_some_and(|g| is_active(g));
        let old_active: Vec<usize> = self
            .old
            .iter()
            .enumerate()
            .filter(|(_, g)| is_active(g))
            .map(|(i, _)| i)
            .collect();

        let pick = match (usize::from(new_active) + old_active.len(), old_active.first()) {
            (0, _) if self.new.is_some() => Pick::New,
            (0, _) => {
                let newest = self
                    .old
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| by_creation(a, b))
                    .map(|(i, _)| i)?;
                Pick::Old(newest)
            }
            (1, Some(&i)) => Pick::Old(i),
            (1, None) => Pick::New,
            _ => return None,
        };

        match pick {
            Pick::New => self.new.as_mut(),
            Pick::Old(i) => self.old.get_mut(i),
        }
    }
}

/// Whether a group wants any units.
#[must_use]
pub fn is_active(group: &ReplicaGroup) -> bool {
    group.spec.replicas > 0
}

/// Oldest first, ties broken by name.
#[must_use]
pub fn by_creation(a: &ReplicaGroup, b: &ReplicaGroup) -> Ordering {
    a.metadata
        .creation_timestamp
        .cmp(&b.metadata.creation_timestamp)
        .then_with(|| a.metadata.name.cmp(&b.metadata.name))
}

/// Lowest revision first, ties broken by creation.
#[must_use]
pub fn by_revision(a: &ReplicaGroup, b: &ReplicaGroup) -> Ordering {
    a.revision()
        .cmp(&b.revision())
        .then_with(|| by_creation(a, b))
}

/// Largest first; among equals, newest first.
#[must_use]
pub fn by_size_newer(a: &ReplicaGroup, b: &ReplicaGroup) -> Ordering {
    b.spec
        .replicas
        .cmp(&a.spec.replicas)
        .then_with(|| by_creation(b, a))
}

/// Largest first; among equals, oldest first.
#[must_use]
pub fn by_size_older(a: &ReplicaGroup, b: &ReplicaGroup) -> Ordering {
    b.spec
        .replicas
        .cmp(&a.spec.replicas)
        .then_with(|| by_creation(a, b))
}

/// Sum of desired replicas.
pub fn replica_count<'a>(groups: impl IntoIterator<Item = &'a Arc<ReplicaGroup>>) -> i32 {
    groups.into_iter().map(|g| g.spec.replicas).sum()
}

/// Sum of observed replicas.
pub fn actual_replica_count<'a>(groups: impl IntoIterator<Item = &'a Arc<ReplicaGroup>>) -> i32 {
    groups.into_iter().map(|g| g.status.replicas).sum()
}

/// Sum of ready replicas.
pub fn ready_replica_count<'a>(groups: impl IntoIterator<Item = &'a Arc<ReplicaGroup>>) -> i32 {
    groups.into_iter().map(|g| g.status.ready_replicas).sum()
}

/// Sum of available replicas.
pub fn available_replica_count<'a>(
    groups: impl IntoIterator<Item = &'a Arc<ReplicaGroup>>,
) -> i32 {
    groups.into_iter().map(|g| g.status.available_replicas).sum()
}

/// Second highest revision among `groups`, or zero.
pub fn last_revision<'a>(groups: impl IntoIterator<Item = &'a Arc<ReplicaGroup>>) -> i64 {
    let (mut max, mut second) = (0, 0);
    for revision in groups.into_iter().map(|g| g.revision()) {
        if revision >= max {
            second = max;
            max = revision;
        } else if revision > second {
            second = revision;
        }
    }
    second
}

fn rolling_params(workload: &Workload) -> RollingUpdateParams {
    workload
        .spec
        .strategy
        .rolling_update
        .clone()
        .unwrap_or_default()
}

/// Resolve surge and unavailability bounds against `desired`.
///
/// Surge rounds up and unavailability rounds down. Both resolving to zero
/// would stall the rollout, so unavailability becomes one in that case.
pub fn resolve_fenceposts(params: &RollingUpdateParams, desired: i32) -> ControllerResult<(i32, i32)> {
    let surge = params.max_surge.scaled_value(desired, true)?;
    let unavailable = params.max_unavailable.scaled_value(desired, false)?;
    if surge == 0 && unavailable == 0 {
        return Ok((0, 1));
    }
    Ok((surge, unavailable))
}

/// Units a rolling update may run above the desired count.
pub fn max_surge(workload: &Workload) -> ControllerResult<i32> {
    if workload.spec.strategy.kind != StrategyType::RollingUpdate {
        return Ok(0);
    }
    let (surge, _) = resolve_fenceposts(&rolling_params(workload), workload.spec.replicas)?;
    Ok(surge)
}

/// Most replicas the workload may run at once: desired plus surge.
pub fn max_replicas(workload: &Workload) -> ControllerResult<i32> {
    let desired = workload.spec.replicas;
    let surge = max_surge(workload)?;
    desired.checked_add(surge).ok_or_else(|| {
        ControllerError::internal(format!(
            "{desired} replicas plus a surge of {surge} is out of range"
        ))
    })
}

/// Units a rolling update may have unavailable.
pub fn max_unavailable(workload: &Workload) -> ControllerResult<i32> {
    let desired = workload.spec.replicas;
    if workload.spec.strategy.kind != StrategyType::RollingUpdate || desired == 0 {
        return Ok(0);
    }
    let (_, unavailable) = resolve_fenceposts(&rolling_params(workload), desired)?;
    Ok(unavailable.min(desired))
}

/// Whether `group` runs every desired unit, all of them available.
#[must_use]
pub fn is_saturated(workload: &Workload, group: &ReplicaGroup) -> bool {
    let desired = workload.spec.replicas;
    annotations::parse_i32(group.metadata.annotation(DESIRED_REPLICAS)) == Some(desired)
        && group.spec.replicas == desired
        && group.status.available_replicas == desired
}

/// Whether the desired and max replica annotations differ from the given values.
#[must_use]
pub fn replicas_annotations_need_update(group: &ReplicaGroup, desired: i32, max: i32) -> bool {
    let meta = &group.metadata;
    meta.annotation(DESIRED_REPLICAS) != Some(desired.to_string().as_str())
        || meta.annotation(MAX_REPLICAS) != Some(max.to_string().as_str())
}

/// Write the desired and max replica annotations. Returns whether anything changed.
pub fn set_replicas_annotations(group: &mut ReplicaGroup, desired: i32, max: i32) -> bool {
    if !replicas_annotations_need_update(group, desired, max) {
        return false;
    }
    let annotations = &mut group.metadata.annotations;
    annotations.insert(DESIRED_REPLICAS.to_owned(), desired.to_string());
    annotations.insert(MAX_REPLICAS.to_owned(), max.to_string());
    true
}

/// Whether every desired unit runs the current template and is available.
#[must_use]
pub fn rollout_complete(workload: &Workload, status: &WorkloadStatus) -> bool {
    let desired = workload.spec.replicas;
    status.updated_replicas == desired
        && status.replicas == desired
        && status.available_replicas == desired
        && status.observed_generation >= workload.metadata.generation
}

/// Whether `new` shows progress compared with the workload's stored status.
#[must_use]
pub fn rollout_progressing(workload: &Workload, new: &WorkloadStatus) -> bool {
    let old = &workload.status;
    let old_stale = old.replicas - old.updated_replicas;
    let new_stale = new.replicas - new.updated_replicas;
    new.updated_replicas > old.updated_replicas
        || new_stale < old_stale
        || new.ready_replicas > old.ready_replicas
        || new.available_replicas > old.available_replicas
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use orrery_core::{
        IntOrPercent, ObjectMeta, ReplicaGroupSpec, ReplicaGroupStatus, Uid, WorkloadSpec,
        WorkloadStrategy,
    };

    use super::*;

    fn group(name: &str, replicas: i32, age_secs: i64) -> Arc<ReplicaGroup> {
        let mut metadata = ObjectMeta::new("default", name);
        metadata.uid = Uid::new(name);
        metadata.creation_timestamp = Utc::now() - Duration::seconds(age_secs);
        Arc::new(ReplicaGroup {
            metadata,
            spec: ReplicaGroupSpec {
                replicas,
                ..ReplicaGroupSpec::default()
            },
            status: ReplicaGroupStatus::default(),
        })
    }

    fn rolling(replicas: i32, surge: IntOrPercent, unavailable: IntOrPercent) -> Workload {
        Workload {
            metadata: ObjectMeta::new("default", "web"),
            spec: WorkloadSpec {
                replicas,
                strategy: WorkloadStrategy {
                    kind: StrategyType::RollingUpdate,
                    rolling_update: Some(RollingUpdateParams {
                        max_surge: surge,
                        max_unavailable: unavailable,
                    }),
                },
                ..WorkloadSpec::default()
            },
            status: WorkloadStatus::default(),
        }
    }

    #[test]
    fn fenceposts_round_and_never_stall() {
        let w = rolling(10, IntOrPercent::default(), IntOrPercent::default());
        assert_eq!(max_surge(&w).expect("surge"), 3);
        assert_eq!(max_unavailable(&w).expect("unavailable"), 2);

        let w = rolling(1, IntOrPercent::Int(0), IntOrPercent::Int(0));
        assert_eq!(max_surge(&w).expect("surge"), 0);
        assert_eq!(max_unavailable(&w).expect("unavailable"), 1);
    }

    #[test]
    fn max_replicas_adds_surge_without_overflowing() {
        let w = rolling(10, IntOrPercent::Int(3), IntOrPercent::Int(0));
        assert_eq!(max_replicas(&w).expect("max"), 13);

        let w = rolling(i32::MAX, IntOrPercent::Int(1), IntOrPercent::Int(0));
        assert!(max_replicas(&w).is_err());

        let w = rolling(i32::MAX, IntOrPercent::Percent("200%".to_owned()), IntOrPercent::Int(0));
        assert!(max_replicas(&w).is_err());
    }

    #[test]
    fn recreate_has_no_surge_or_unavailability() {
        let mut w = rolling(10, IntOrPercent::Int(5), IntOrPercent::Int(5));
        w.spec.strategy.kind = StrategyType::Recreate;
        assert_eq!(max_surge(&w).expect("surge"), 0);
        assert_eq!(max_unavailable(&w).expect("unavailable"), 0);
    }

    #[test]
    fn last_revision_is_second_highest() {
        let mut groups = Vec::new();
        for (name, rev) in [("a", "1"), ("b", "3"), ("c", "2")] {
            let mut g = (*group(name, 0, 0)).clone();
            g.metadata
                .annotations
                .insert(annotations::REVISION.to_owned(), rev.to_owned());
            groups.push(Arc::new(g));
        }
        assert_eq!(last_revision(&groups), 2);
        assert_eq!(last_revision(&groups[..1]), 0);
    }

    #[test]
    fn single_active_group_is_picked() {
        let mut split = GroupSplit {
            new: Some(group("new", 0, 0)),
            old: vec![group("old-1", 0, 20), group("old-2", 3, 10)],
        };
        let picked = split.active_or_latest_mut().expect("pick");
        assert_eq!(picked.metadata.name, "old-2");
    }

    #[test]
    fn newest_old_group_is_picked_when_nothing_is_active() {
        let mut split = GroupSplit {
            new: None,
            old: vec![group("old-1", 0, 20), group("old-2", 0, 10)],
        };
        let picked = split.active_or_latest_mut().expect("pick");
        assert_eq!(picked.metadata.name, "old-2");
    }

    #[test]
    fn nothing_is_picked_with_several_active_groups() {
        let mut split = GroupSplit {
            new: Some(group("new", 1, 0)),
            old: vec![group("old", 3, 10)],
        };
        assert!(split.active_or_latest_mut().is_none());
    }

    #[test]
    fn size_orderings() {
        let big_old = group("big-old", 5, 20);
        let big_new = group("big-new", 5, 1);
        let small = group("small", 1, 5);

        let mut groups = vec![Arc::clone(&small), Arc::clone(&big_old), Arc::clone(&big_new)];
        groups.sort_by(|a, b| by_size_newer(a, b));
        let names: Vec<_> = groups.iter().map(|g| g.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["big-new", "big-old", "small"]);

        groups.sort_by(|a, b| by_size_older(a, b));
        let names: Vec<_> = groups.iter().map(|g| g.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["big-old", "big-new", "small"]);
    }
}
