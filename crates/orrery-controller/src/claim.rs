//! Ownership reconciliation between a workload and replica groups.
//!
//! A workload owns a replica group when the group's controller reference
//! names the workload's kind and uid. Claiming walks every group in the
//! namespace and:
//!
//! - keeps owned groups that still match the selector,
//! - releases owned groups that no longer match,
//! - adopts ownerless groups that match, after confirming with an uncached
//!   read that the workload still exists and is not being deleted,
//! - ignores everything else.
//!
//! Writes carry the group's resource version, so two workloads racing to
//! adopt the same group cannot both win.

use std::sync::Arc;

use orrery_core::{OwnerReference, ReplicaGroup, Resource, Workload};
use tracing::{debug, info};

use crate::error::{ControllerError, ControllerResult};
use crate::store::ClusterClient;

/// Result of a claim pass.
#[derive(Debug, Default)]
pub struct ClaimOutcome {
    /// Groups the workload owns after the pass.
    pub claimed: Vec<Arc<ReplicaGroup>>,
    /// Groups adopted during the pass.
    pub adopted: usize,
    /// Groups released during the pass.
    pub released: usize,
}

/// Reconcile ownership of `candidates` for `workload` and return the
/// groups it owns.
///
/// Candidates are processed even after a failure, so one bad write does not
/// hold up the rest; the first error is returned at the end.
pub async fn claim_replica_groups(
    client: &dyn ClusterClient,
    workload: &Workload,
    candidates: Vec<Arc<ReplicaGroup>>,
) -> ControllerResult<ClaimOutcome> {
    let selector = &workload.spec.selector;
    selector.validate()?;

    let deleting = workload.metadata.is_deleting();
    let adoptable = |g: &ReplicaGroup| {
        g.controller_ref().is_none()
            && !deleting
            && !g.metadata.is_deleting()
            && g.metadata.namespace == workload.metadata.namespace
            && selector.matches(&g.metadata.labels)
    };

    let orphans = candidates.iter().filter(|g| adoptable(g.as_ref())).count();
    if orphans > 1 {
        debug!(
            workload = %workload.key(),
            orphans,
            "selector matches more than one replica group without an owner"
        );
    }

    let mut outcome = ClaimOutcome::default();
    let mut errors: Vec<ControllerError> = Vec::new();
    let mut can_adopt: Option<ControllerResult<()>> = None;

    for group in candidates {
        match group.controller_ref() {
            Some(owner) => {
                if !owner.refers_to(workload) {
                    continue;
                }
                if selector.matches(&group.metadata.labels) {
                    outcome.claimed.push(group);
                    continue;
                }
                if deleting {
                    continue;
                }
                match release(client, workload, &group).await {
                    Ok(_) => outcome.released += 1,
                    // Gone already; nothing left to release.
                    Err(e) if e.is_not_found() => {}
                    Err(e) => errors.push(e),
                }
            }
            None => {
                if !adoptable(group.as_ref()) {
                    continue;
                }
                if can_adopt.is_none() {
                    can_adopt = Some(recheck(client, workload).await);
                }
                if let Some(Err(e)) = &can_adopt {
                    errors.push(e.clone());
                    continue;
                }
                match adopt(client, workload, &group).await {
                    Ok(adopted) => {
                        outcome.claimed.push(Arc::new(adopted));
                        outcome.adopted += 1;
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => errors.push(e),
                }
            }
        }
    }

    if outcome.adopted > 0 || outcome.released > 0 {
        info!(
            workload = %workload.key(),
            adopted = outcome.adopted,
            released = outcome.released,
            "reconciled replica group ownership"
        );
    }

    let mut errors = errors.into_iter();
    match errors.next() {
        None => Ok(outcome),
        Some(first) => {
            for e in errors {
                debug!(workload = %workload.key(), error = %e, "additional claim failure");
            }
            Err(first)
        }
    }
}

/// Confirm with an uncached read that `workload` may still adopt.
async fn recheck(client: &dyn ClusterClient, workload: &Workload) -> ControllerResult<()> {
    let meta = &workload.metadata;
    let fresh = client.get_workload(&meta.namespace, &meta.name).await?;
    if fresh.metadata.uid != meta.uid {
        return Err(ControllerError::conflict(
            Workload::KIND,
            workload.key(),
            format!(
                "original workload is gone: got uid {}, wanted {}",
                fresh.metadata.uid, meta.uid
            ),
        ));
    }
    if let Some(ts) = fresh.metadata.deletion_timestamp {
        return Err(ControllerError::conflict(
            Workload::KIND,
            workload.key(),
            format!("workload has just been deleted at {ts}"),
        ));
    }
    Ok(())
}

async fn adopt(
    client: &dyn ClusterClient,
    workload: &Workload,
    group: &ReplicaGroup,
) -> ControllerResult<ReplicaGroup> {
    let mut next = group.clone();
    next.metadata
        .owner_references
        .push(OwnerReference::controller_of(workload));
    debug!(workload = %workload.key(), replica_group = %group.key(), "adopting replica group");
    client.update_replica_group(&next).await
}

async fn release(
    client: &dyn ClusterClient,
    workload: &Workload,
    group: &ReplicaGroup,
) -> ControllerResult<ReplicaGroup> {
    let mut next = group.clone();
    next.metadata
        .owner_references
        .retain(|r| r.uid != workload.metadata.uid);
    debug!(workload = %workload.key(), replica_group = %group.key(), "releasing replica group");
    client.update_replica_group(&next).await
}
