//! Condition and event reasons written by the sync engine.

/// The workload's selector is empty and would match every unit.
pub const SELECTING_ALL: &str = "SelectingAll";

/// A replica group was scaled.
pub const SCALING_REPLICA_GROUP: &str = "ScalingReplicaGroup";

/// Creating the new replica group failed.
pub const FAILED_GROUP_CREATE: &str = "ReplicaGroupCreateError";

/// The workload was rolled back to an earlier revision.
pub const ROLLBACK_DONE: &str = "DeploymentRollback";

/// The requested rollback revision does not exist.
pub const ROLLBACK_REVISION_NOT_FOUND: &str = "RollbackRevisionNotFound";

/// The requested rollback revision has the current template.
pub const ROLLBACK_TEMPLATE_UNCHANGED: &str = "RollbackTemplateUnchanged";

/// Enough units are available.
pub const MINIMUM_REPLICAS_AVAILABLE: &str = "MinimumReplicasAvailable";

/// Too few units are available.
pub const MINIMUM_REPLICAS_UNAVAILABLE: &str = "MinimumReplicasUnavailable";

/// A new replica group was created for the current template.
pub const NEW_GROUP_CREATED: &str = "NewReplicaGroupCreated";

/// An existing replica group matches the current template.
pub const FOUND_NEW_GROUP: &str = "FoundNewReplicaGroup";

/// The rollout made progress.
pub const GROUP_UPDATED: &str = "ReplicaGroupUpdated";

/// The rollout finished.
pub const NEW_GROUP_AVAILABLE: &str = "NewReplicaGroupAvailable";

/// The rollout made no progress within the deadline.
pub const PROGRESS_DEADLINE_EXCEEDED: &str = "ProgressDeadlineExceeded";

/// The workload was paused.
pub const PAUSED: &str = "DeploymentPaused";

/// The workload was resumed.
pub const RESUMED: &str = "DeploymentResumed";
