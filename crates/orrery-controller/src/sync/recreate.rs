//! Recreate rollouts: every old unit stops before any new one starts.

use orrery_core::Workload;

use super::groups::{self, GroupSplit};
use super::SyncEngine;
use crate::error::ControllerResult;
use crate::grouping::UnitMap;

/// Whether any unit outside the new group may still be running.
///
/// Units that finished, successfully or not, cannot run again and are not
/// counted.
fn old_units_running(split: &GroupSplit, units: &UnitMap) -> bool {
    if groups::actual_replica_count(&split.old) > 0 {
        return true;
    }
    let new_uid = split.new.as_ref().map(|g| &g.metadata.uid);
    units
        .iter()
        .filter(|(uid, _)| Some(*uid) != new_uid)
        .flat_map(|(_, members)| members)
        .any(|unit| !unit.status.phase.is_terminal())
}

impl SyncEngine {
    pub(super) async fn rollout_recreate(
        &self,
        workload: &mut Workload,
        mut split: GroupSplit,
        units: &UnitMap,
    ) -> ControllerResult<()> {
        let mut scaled_down = false;
        for old in split.old.iter_mut().filter(|g| groups::is_active(g)) {
            scaled_down |= self.scale_group_and_record(workload, old, 0).await?;
        }
        if scaled_down {
            return self.sync_rollout_status(workload, &split).await;
        }

        // Wait for a unit deletion to wake us once the old units are gone.
        if old_units_running(&split, units) {
            return self.sync_rollout_status(workload, &split).await;
        }

        if split.new.is_none() {
            self.sync_new_group(workload, &mut split, true).await?;
        }
        let desired = workload.spec.replicas;
        if let Some(new) = split.new.as_mut() {
            self.scale_group_and_record(workload, new, desired).await?;
        }

        if groups::rollout_complete(workload, &workload.status) {
            self.cleanup(workload, &split).await?;
        }
        self.sync_rollout_status(workload, &split).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use orrery_core::{
        ObjectMeta, ReplicaGroup, ReplicaGroupSpec, ReplicaGroupStatus, Uid, Unit, UnitPhase,
        UnitSpec, UnitStatus,
    };

    use super::*;

    fn group(uid: &str, observed: i32) -> Arc<ReplicaGroup> {
        let mut metadata = ObjectMeta::new("default", uid);
        metadata.uid = Uid::new(uid);
        Arc::new(ReplicaGroup {
            metadata,
            spec: ReplicaGroupSpec::default(),
            status: ReplicaGroupStatus {
                replicas: observed,
                ..ReplicaGroupStatus::default()
            },
        })
    }

    fn unit(phase: UnitPhase) -> Arc<Unit> {
        Arc::new(Unit {
            metadata: ObjectMeta::new("default", "u"),
            spec: UnitSpec::default(),
            status: UnitStatus {
                phase,
                ready: false,
            },
        })
    }

    #[test]
    fn observed_replicas_on_old_groups_count_as_running() {
        let split = GroupSplit {
            new: None,
            old: vec![group("old", 2)],
        };
        assert!(old_units_running(&split, &UnitMap::new()));
    }

    #[test]
    fn finished_units_and_new_group_units_are_ignored() {
        let split = GroupSplit {
            new: Some(group("new", 0)),
            old: vec![group("old", 0)],
        };
        let mut units = UnitMap::new();
        units.insert(Uid::new("new"), vec![unit(UnitPhase::Running)]);
        units.insert(
            Uid::new("old"),
            vec![unit(UnitPhase::Succeeded), unit(UnitPhase::Failed)],
        );
        assert!(!old_units_running(&split, &units));

        units.insert(Uid::new("old"), vec![unit(UnitPhase::Unknown)]);
        assert!(old_units_running(&split, &units));
    }
}
