//! Template hashing, revision bookkeeping and the new replica group.

use std::sync::Arc;

use orrery_core::annotations::{DESIRED_REPLICAS, MAX_REPLICAS, REVISION, TEMPLATE_HASH_LABEL};
use orrery_core::{
    Condition, ConditionStatus, ConditionType, ObjectMeta, OwnerReference, ReplicaGroup,
    ReplicaGroupSpec, ReplicaGroupStatus, Resource, StrategyType, UnitTemplate, Workload,
};
use tracing::{debug, info};

use super::groups::{self, GroupSplit};
use super::{reasons, SyncEngine};
use crate::error::{ControllerError, ControllerResult};
use crate::recorder::EventType;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Characters that cannot form words or be confused with one another.
const SAFE_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

fn fnv1a(seed: u32, bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(seed, |hash, b| (hash ^ u32::from(*b)).wrapping_mul(FNV_PRIME))
}

fn safe_encode(s: &str) -> String {
    s.bytes()
        .map(|b| char::from(SAFE_ALPHABET[usize::from(b) % SAFE_ALPHABET.len()]))
        .collect()
}

/// Hash a unit template for use in group names and the template hash label.
///
/// The collision count, when present, is mixed in so that a name clash can
/// be escaped by bumping it.
pub fn template_hash(template: &UnitTemplate, collision_count: Option<i32>) -> ControllerResult<String> {
    let encoded = serde_json::to_vec(template)
        .map_err(|e| ControllerError::internal(format!("encoding unit template: {e}")))?;
    let mut hash = fnv1a(FNV_OFFSET_BASIS, &encoded);
    if let Some(count) = collision_count {
        let mut buf = [0_u8; 8];
        buf[..4].copy_from_slice(&count.to_le_bytes());
        hash = fnv1a(hash, &buf);
    }
    Ok(safe_encode(&hash.to_string()))
}

/// Annotations that belong to the controller and are never copied between
/// a workload and its groups.
pub(super) fn skip_copy(key: &str) -> bool {
    matches!(key, REVISION | DESIRED_REPLICAS | MAX_REPLICAS)
}

fn copy_workload_annotations(workload: &Workload, group: &mut ReplicaGroup) -> bool {
    let mut changed = false;
    for (key, value) in &workload.metadata.annotations {
        if skip_copy(key) || group.metadata.annotation(key) == Some(value.as_str()) {
            continue;
        }
        group
            .metadata
            .annotations
            .insert(key.clone(), value.clone());
        changed = true;
    }
    changed
}

/// Bring the new group's annotations up to date. Returns whether anything changed.
///
/// The revision only ever moves forward. Replica annotations are written for
/// groups about to be created; existing groups get them when scaled.
pub fn set_new_group_annotations(
    workload: &Workload,
    group: &mut ReplicaGroup,
    new_revision: i64,
    exists: bool,
) -> ControllerResult<bool> {
    let mut changed = copy_workload_annotations(workload, group);

    let old_revision = match group.metadata.annotation(REVISION) {
        None => 0,
        Some(raw) => match raw.parse::<i64>() {
            Ok(revision) => revision,
            Err(_) => {
                debug!(replica_group = %group.key(), revision = raw, "ignoring unparsable revision");
                return Ok(changed);
            }
        },
    };
    if old_revision < new_revision {
        group
            .metadata
            .annotations
            .insert(REVISION.to_owned(), new_revision.to_string());
        changed = true;
    }

    if !exists {
        let desired = workload.spec.replicas;
        let max = groups::max_replicas(workload)?;
        changed |= groups::set_replicas_annotations(group, desired, max);
    }
    Ok(changed)
}

/// Record `revision` on the workload. Returns whether it changed.
pub fn set_workload_revision(workload: &mut Workload, revision: &str) -> bool {
    if workload.metadata.annotation(REVISION) == Some(revision) {
        return false;
    }
    workload
        .metadata
        .annotations
        .insert(REVISION.to_owned(), revision.to_owned());
    true
}

/// Replicas the new group should run, given `total` replicas across every
/// group and the new group's current `replicas`.
pub fn new_group_replicas(workload: &Workload, total: i32, replicas: i32) -> ControllerResult<i32> {
    match &workload.spec.strategy.kind {
        StrategyType::RollingUpdate => {
            let desired = workload.spec.replicas;
            let max_total = groups::max_replicas(workload)?;
            if total >= max_total {
                return Ok(replicas);
            }
            let scale_up = (max_total - total).min(desired - replicas);
            Ok(replicas + scale_up)
        }
        StrategyType::Recreate => Ok(workload.spec.replicas),
        StrategyType::Unknown(name) => Err(ControllerError::UnknownStrategy(name.clone())),
    }
}

impl SyncEngine {
    /// Split the claimed groups into new and old, syncing revision
    /// bookkeeping on the way. The new group is created when missing and
    /// `create` is set.
    pub(super) async fn sync_revision(
        &self,
        workload: &mut Workload,
        claimed: &[Arc<ReplicaGroup>],
        create: bool,
    ) -> ControllerResult<GroupSplit> {
        let mut split = GroupSplit::new(workload, claimed);
        self.sync_new_group(workload, &mut split, create).await?;
        Ok(split)
    }

    pub(super) async fn sync_new_group(
        &self,
        workload: &mut Workload,
        split: &mut GroupSplit,
        create: bool,
    ) -> ControllerResult<()> {
        let new_revision = split.old.iter().map(|g| g.revision()).max().unwrap_or(0) + 1;

        if let Some(existing) = split.new.as_mut() {
            return self
                .refresh_new_group(workload, existing, new_revision)
                .await;
        }
        if !create {
            return Ok(());
        }
        let created = self.create_new_group(workload, split, new_revision).await?;
        split.new = Some(Arc::new(created));
        Ok(())
    }

    async fn refresh_new_group(
        &self,
        workload: &mut Workload,
        existing: &mut Arc<ReplicaGroup>,
        new_revision: i64,
    ) -> ControllerResult<()> {
        let mut next = (**existing).clone();
        if set_new_group_annotations(workload, &mut next, new_revision, true)? {
            *existing = Arc::new(self.client.update_replica_group(&next).await?);
            return Ok(());
        }

        let revision = next.metadata.annotation(REVISION).unwrap_or_default();
        let metadata_changed = set_workload_revision(workload, revision);

        let mut status_changed = false;
        if workload.has_progress_deadline()
            && workload
                .status
                .condition(ConditionType::Progressing)
                .is_none()
        {
            workload.status.set_condition(Condition::new(
                ConditionType::Progressing,
                ConditionStatus::True,
                reasons::FOUND_NEW_GROUP,
                format!("Found new replica group {:?}", next.metadata.name),
            ));
            status_changed = true;
        }

        self.persist_workload(workload, metadata_changed, status_changed)
            .await
    }

    async fn create_new_group(
        &self,
        workload: &mut Workload,
        split: &GroupSplit,
        new_revision: i64,
    ) -> ControllerResult<ReplicaGroup> {
        let hash = template_hash(&workload.spec.template, workload.status.collision_count)?;

        let mut template = workload.spec.template.clone();
        template
            .labels
            .insert(TEMPLATE_HASH_LABEL.to_owned(), hash.clone());
        let mut selector = workload.spec.selector.clone();
        selector
            .match_labels
            .insert(TEMPLATE_HASH_LABEL.to_owned(), hash.clone());

        let mut metadata = ObjectMeta::new(
            workload.metadata.namespace.clone(),
            format!("{}-{hash}", workload.metadata.name),
        );
        metadata.labels = template.labels.clone();
        metadata
            .owner_references
            .push(OwnerReference::controller_of(&*workload));

        let replicas = new_group_replicas(workload, groups::replica_count(&split.old), 0)?;
        let mut group = ReplicaGroup {
            metadata,
            spec: ReplicaGroupSpec {
                replicas,
                selector,
                template,
            },
            status: ReplicaGroupStatus::default(),
        };
        set_new_group_annotations(workload, &mut group, new_revision, false)?;

        let (created, already_existed) = match self.client.create_replica_group(&group).await {
            Ok(created) => (created, false),
            Err(e) if e.is_already_exists() => {
                let existing = self
                    .groups
                    .get(&group.metadata.namespace, &group.metadata.name)
                    .ok_or_else(|| ControllerError::not_found(ReplicaGroup::KIND, group.key()))?;
                let ours = existing
                    .controller_ref()
                    .is_some_and(|owner| owner.refers_to(&*workload))
                    && workload
                        .spec
                        .template
                        .equal_ignoring_hash(&existing.spec.template);
                if !ours {
                    self.record_collision(workload).await;
                    return Err(e);
                }
                ((*existing).clone(), true)
            }
            Err(e) if e.is_namespace_terminating() => return Err(e),
            Err(e) => {
                let message = format!(
                    "Failed to create new replica group {:?}: {e}",
                    group.metadata.name
                );
                if workload.has_progress_deadline() {
                    workload.status.set_condition(Condition::new(
                        ConditionType::Progressing,
                        ConditionStatus::False,
                        reasons::FAILED_GROUP_CREATE,
                        message.clone(),
                    ));
                    match self.client.update_workload_status(workload).await {
                        Ok(updated) => *workload = updated,
                        Err(status_err) => {
                            debug!(workload = %workload.key(), error = %status_err, "failed to record create failure");
                        }
                    }
                }
                self.recorder.record(
                    workload,
                    EventType::Warning,
                    reasons::FAILED_GROUP_CREATE,
                    &message,
                );
                return Err(e);
            }
        };

        if !already_existed {
            info!(
                workload = %workload.key(),
                replica_group = %created.metadata.name,
                replicas,
                "created new replica group"
            );
            if replicas > 0 {
                self.recorder.record(
                    workload,
                    EventType::Normal,
                    reasons::SCALING_REPLICA_GROUP,
                    &format!(
                        "Scaled up replica group {} to {replicas}",
                        created.metadata.name
                    ),
                );
            }
        }

        let metadata_changed = set_workload_revision(workload, &new_revision.to_string());
        let mut status_changed = false;
        if !already_existed && workload.has_progress_deadline() {
            workload.status.set_condition(Condition::new(
                ConditionType::Progressing,
                ConditionStatus::True,
                reasons::NEW_GROUP_CREATED,
                format!("Created new replica group {:?}", created.metadata.name),
            ));
            status_changed = true;
        }
        self.persist_workload(workload, metadata_changed, status_changed)
            .await?;

        Ok(created)
    }

    /// Bump the collision count so the next attempt hashes to a new name.
    async fn record_collision(&self, workload: &mut Workload) {
        let previous = workload.status.collision_count.unwrap_or(0);
        workload.status.collision_count = Some(previous + 1);
        match self.client.update_workload_status(workload).await {
            Ok(updated) => {
                *workload = updated;
                debug!(
                    workload = %workload.key(),
                    previous,
                    current = previous + 1,
                    "found a hash collision, bumped collision count"
                );
            }
            Err(e) => {
                debug!(workload = %workload.key(), error = %e, "failed to bump collision count");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use orrery_core::{IntOrPercent, RollingUpdateParams, WorkloadSpec, WorkloadStatus, WorkloadStrategy};

    use super::*;

    fn workload(replicas: i32, kind: StrategyType) -> Workload {
        Workload {
            metadata: ObjectMeta::new("default", "web"),
            spec: WorkloadSpec {
                replicas,
                strategy: WorkloadStrategy {
                    kind,
                    rolling_update: Some(RollingUpdateParams {
                        max_surge: IntOrPercent::Int(1),
                        max_unavailable: IntOrPercent::Int(0),
                    }),
                },
                ..WorkloadSpec::default()
            },
            status: WorkloadStatus::default(),
        }
    }

    #[test]
    fn hash_is_stable_and_sensitive_to_template_and_collisions() {
        let mut template = UnitTemplate::default();
        template.spec.image = "web:1".to_owned();

        let first = template_hash(&template, None).expect("hash");
        assert_eq!(first, template_hash(&template, None).expect("hash"));
        assert!(first
            .bytes()
            .all(|b| SAFE_ALPHABET.contains(&b)));

        assert_ne!(first, template_hash(&template, Some(1)).expect("hash"));

        template.spec.image = "web:2".to_owned();
        assert_ne!(first, template_hash(&template, None).expect("hash"));
    }

    #[test]
    fn rolling_new_group_is_bounded_by_surge() {
        let w = workload(3, StrategyType::RollingUpdate);
        // 3 old replicas, 1 surge: room for one new replica.
        assert_eq!(new_group_replicas(&w, 3, 0).expect("replicas"), 1);
        // Already at the surge limit.
        assert_eq!(new_group_replicas(&w, 4, 1).expect("replicas"), 1);
        // Never beyond the desired count.
        assert_eq!(new_group_replicas(&w, 0, 0).expect("replicas"), 3);
    }

    #[test]
    fn recreate_new_group_gets_everything() {
        let w = workload(5, StrategyType::Recreate);
        assert_eq!(new_group_replicas(&w, 5, 0).expect("replicas"), 5);
    }

    #[test]
    fn unknown_strategy_has_no_replica_count() {
        let w = workload(5, StrategyType::Unknown("BlueGreen".to_owned()));
        assert!(matches!(
            new_group_replicas(&w, 0, 0),
            Err(ControllerError::UnknownStrategy(name)) if name == "BlueGreen"
        ));
    }

    #[test]
    fn annotations_copy_and_revision_only_moves_forward() {
        let mut w = workload(2, StrategyType::RollingUpdate);
        w.metadata
            .annotations
            .insert("team".to_owned(), "payments".to_owned());
        w.metadata
            .annotations
            .insert(REVISION.to_owned(), "9".to_owned());

        let mut group = ReplicaGroup {
            metadata: ObjectMeta::new("default", "web-abc"),
            spec: ReplicaGroupSpec::default(),
            status: ReplicaGroupStatus::default(),
        };
        assert!(set_new_group_annotations(&w, &mut group, 3, false).expect("set"));
        assert_eq!(group.metadata.annotation("team"), Some("payments"));
        assert_eq!(group.metadata.annotation(REVISION), Some("3"));
        assert_eq!(group.metadata.annotation(DESIRED_REPLICAS), Some("2"));
        assert_eq!(group.metadata.annotation(MAX_REPLICAS), Some("3"));

        assert!(!set_new_group_annotations(&w, &mut group, 2, true).expect("set"));
        assert_eq!(group.metadata.annotation(REVISION), Some("3"));
    }
}
