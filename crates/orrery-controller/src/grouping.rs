//! Partition a workload's units by the replica group that controls them.

use std::collections::HashMap;
use std::sync::Arc;

use orrery_core::{ReplicaGroup, Resource, Uid, Unit, Workload};

use crate::cache::Lister;
use crate::error::ControllerResult;

/// Units keyed by the uid of their controlling replica group.
pub type UnitMap = HashMap<Uid, Vec<Arc<Unit>>>;

/// Group the workload's units under the claimed `groups`.
///
/// Every claimed group gets an entry, possibly empty. Units whose controller
/// is not a claimed group are left out. Units in terminal phases are kept:
/// Recreate must see zero units of any kind before it scales up.
pub fn group_units(
    workload: &Workload,
    groups: &[Arc<ReplicaGroup>],
    units: &dyn Lister<Unit>,
) -> ControllerResult<UnitMap> {
    workload.spec.selector.validate()?;

    let mut map: UnitMap = groups
        .iter()
        .map(|g| (g.metadata.uid.clone(), Vec::new()))
        .collect();

    for unit in units.list(&workload.metadata.namespace, &workload.spec.selector) {
        let Some(owner) = unit.controller_ref() else {
            continue;
        };
        if owner.kind != ReplicaGroup::KIND {
            continue;
        }
        if let Some(members) = map.get_mut(&owner.uid) {
            members.push(unit);
        }
    }

    Ok(map)
}

/// Total number of units across every group in `map`.
#[must_use]
pub fn unit_count(map: &UnitMap) -> usize {
    map.values().map(Vec::len).sum()
}
