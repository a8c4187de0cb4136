//! Pruning old replica groups beyond the revision history limit.

use orrery_core::{Resource, Workload};
use tracing::debug;

use super::groups::{self, GroupSplit};
use super::SyncEngine;
use crate::error::ControllerResult;

impl SyncEngine {
    /// Delete the oldest fully scaled-down old groups beyond the workload's
    /// revision history limit.
    pub(super) async fn cleanup(&self, workload: &Workload, split: &GroupSplit) -> ControllerResult<()> {
        let Some(limit) = workload
            .spec
            .revision_history_limit
            .filter(|limit| *limit != i32::MAX)
        else {
            return Ok(());
        };

        let mut cleanable: Vec<_> = split
            .old
            .iter()
            .filter(|g| !g.metadata.is_deleting())
            .collect();
        let excess = cleanable
            .len()
            .saturating_sub(usize::try_from(limit).unwrap_or(0));
        if excess == 0 {
            return Ok(());
        }

        cleanable.sort_by(|a, b| groups::by_revision(a, b));
        debug!(workload = %workload.key(), excess, "cleaning up old replica groups");

        for group in cleanable.into_iter().take(excess) {
            if group.status.replicas != 0 || group.spec.replicas != 0 {
                continue;
            }
            let meta = &group.metadata;
            match self
                .client
                .delete_replica_group(&meta.namespace, &meta.name, &meta.uid)
                .await
            {
                Ok(()) => {
                    debug!(workload = %workload.key(), replica_group = %meta.name, "deleted old replica group");
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
