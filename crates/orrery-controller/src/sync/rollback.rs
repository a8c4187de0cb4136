//! Rolling a workload back to the template of an earlier revision.

use std::sync::Arc;

use orrery_core::annotations::TEMPLATE_HASH_LABEL;
use orrery_core::{ReplicaGroup, Resource, RollbackConfig, Workload};
use tracing::info;

use super::groups;
use super::revision::skip_copy;
use super::{reasons, SyncEngine};
use crate::error::ControllerResult;
use crate::recorder::EventType;

/// Copy `group`'s template and annotations into `workload`.
fn rollback_to_template(workload: &mut Workload, group: &ReplicaGroup) {
    let mut template = group.spec.template.clone();
    template.labels.remove(TEMPLATE_HASH_LABEL);
    workload.spec.template = template;

    let annotations = &mut workload.metadata.annotations;
    annotations.retain(|key, _| skip_copy(key));
    for (key, value) in &group.metadata.annotations {
        if !skip_copy(key) {
            annotations.insert(key.clone(), value.clone());
        }
    }
}

impl SyncEngine {
    /// Execute a pending rollback.
    ///
    /// The request is cleared whether or not the target revision exists, so
    /// a rollback runs at most once.
    pub(super) async fn rollback(
        &self,
        workload: &mut Workload,
        claimed: &[Arc<ReplicaGroup>],
        request: RollbackConfig,
    ) -> ControllerResult<()> {
        let split = self.sync_revision(workload, claimed, true).await?;

        let mut revision = request.revision;
        if revision == 0 {
            revision = groups::last_revision(split.all());
            if revision == 0 {
                self.recorder.record(
                    workload,
                    EventType::Warning,
                    reasons::ROLLBACK_REVISION_NOT_FOUND,
                    "Unable to find last revision.",
                );
                return self.clear_rollback_to(workload).await;
            }
        }

        let Some(target) = split.all().find(|g| g.revision() == revision) else {
            self.recorder.record(
                workload,
                EventType::Warning,
                reasons::ROLLBACK_REVISION_NOT_FOUND,
                "Unable to find the revision to roll back to.",
            );
            return self.clear_rollback_to(workload).await;
        };

        if workload
            .spec
            .template
            .equal_ignoring_hash(&target.spec.template)
        {
            self.recorder.record(
                workload,
                EventType::Warning,
                reasons::ROLLBACK_TEMPLATE_UNCHANGED,
                &format!(
                    "The rollback revision contains the same template as workload {:?}",
                    workload.metadata.name
                ),
            );
            return self.clear_rollback_to(workload).await;
        }

        rollback_to_template(workload, target);
        self.clear_rollback_to(workload).await?;

        info!(workload = %workload.key(), revision, "rolled back workload");
        self.recorder.record(
            workload,
            EventType::Normal,
            reasons::ROLLBACK_DONE,
            &format!(
                "Rolled back workload {:?} to revision {revision}",
                workload.metadata.name
            ),
        );
        Ok(())
    }

    async fn clear_rollback_to(&self, workload: &mut Workload) -> ControllerResult<()> {
        workload.spec.rollback_to = None;
        *workload = self.client.update_workload(workload).await?;
        Ok(())
    }
}
