//! Workloads: the declared desired state of a replicated application.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotations::{self, REVISION};
use crate::intstr::IntOrPercent;
use crate::meta::{ObjectMeta, Resource};
use crate::selector::LabelSelector;
use crate::unit::UnitTemplate;

/// How a workload replaces old units with new ones.
///
/// Unrecognised names are preserved so that the controller can report them
/// instead of failing to decode the object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StrategyType {
    /// Scale every old group to zero before creating new units.
    Recreate,
    /// Replace units incrementally within surge and unavailability bounds.
    #[default]
    RollingUpdate,
    /// A strategy name this controller does not understand.
    Unknown(String),
}

impl StrategyType {
    /// Get the strategy name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Recreate => "Recreate",
            Self::RollingUpdate => "RollingUpdate",
            Self::Unknown(name) => name,
        }
    }
}

impl From<String> for StrategyType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Recreate" => Self::Recreate,
            "RollingUpdate" => Self::RollingUpdate,
            _ => Self::Unknown(value),
        }
    }
}

impl From<StrategyType> for String {
    fn from(value: StrategyType) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bounds for rolling updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingUpdateParams {
    /// Units that may exist above the desired count during a rollout.
    #[serde(default)]
    pub max_surge: IntOrPercent,
    /// Units that may be unavailable during a rollout.
    #[serde(default)]
    pub max_unavailable: IntOrPercent,
}

/// Rollout strategy of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStrategy {
    /// Strategy kind.
    #[serde(rename = "type", default)]
    pub kind: StrategyType,
    /// Rolling update bounds, used when `kind` is `RollingUpdate`.
    #[serde(default)]
    pub rolling_update: Option<RollingUpdateParams>,
}

/// Pending rollback request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Revision to roll back to; zero means the previous revision.
    #[serde(default)]
    pub revision: i64,
}

/// Desired state of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Desired number of units.
    pub replicas: i32,
    /// Selector over the replica groups and units this workload manages.
    pub selector: LabelSelector,
    /// Template for units.
    pub template: UnitTemplate,
    /// Rollout strategy.
    #[serde(default)]
    pub strategy: WorkloadStrategy,
    /// Whether rollouts are paused.
    #[serde(default)]
    pub paused: bool,
    /// Pending rollback request, cleared once executed.
    #[serde(default)]
    pub rollback_to: Option<RollbackConfig>,
    /// Seconds a rollout may go without progress before it is reported stuck.
    #[serde(default)]
    pub progress_deadline_seconds: Option<i64>,
    /// Number of old, fully scaled-down groups to retain.
    #[serde(default)]
    pub revision_history_limit: Option<i32>,
}

/// Kind of a workload condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Enough units are available.
    Available,
    /// The rollout is making progress, or has completed.
    Progressing,
}

/// Truth value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// Condition holds.
    True,
    /// Condition does not hold.
    False,
    /// Condition cannot currently be determined.
    Unknown,
}

/// A status condition on a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition kind.
    #[serde(rename = "type")]
    pub kind: ConditionType,
    /// Condition value.
    pub status: ConditionStatus,
    /// Machine-readable reason for the last transition.
    pub reason: String,
    /// Human-readable detail.
    pub message: String,
    /// Last time the condition was written.
    pub last_update_time: DateTime<Utc>,
    /// Last time the status value changed.
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition stamped with the current time.
    #[must_use]
    pub fn new(
        kind: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            kind,
            status,
            reason: reason.into(),
            message: message.into(),
            last_update_time: now,
            last_transition_time: now,
        }
    }
}

/// Observed state of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    /// Generation most recently acted on.
    #[serde(default)]
    pub observed_generation: i64,
    /// Units across all claimed groups.
    #[serde(default)]
    pub replicas: i32,
    /// Units in the group matching the current template.
    #[serde(default)]
    pub updated_replicas: i32,
    /// Ready units across all groups.
    #[serde(default)]
    pub ready_replicas: i32,
    /// Available units across all groups.
    #[serde(default)]
    pub available_replicas: i32,
    /// Desired units that are not yet available.
    #[serde(default)]
    pub unavailable_replicas: i32,
    /// Bumped when a template hash collides with an existing group name.
    #[serde(default)]
    pub collision_count: Option<i32>,
    /// Status conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl WorkloadStatus {
    /// Get a condition by kind.
    #[must_use]
    pub fn condition(&self, kind: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Insert or replace a condition.
    ///
    /// Writing a condition with the same status and reason as the existing
    /// one is a no-op. The transition time is preserved when only the
    /// reason changes.
    pub fn set_condition(&mut self, mut condition: Condition) {
        if let Some(existing) = self.condition(condition.kind) {
            if existing.status == condition.status && existing.reason == condition.reason {
                return;
            }
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.remove_condition(condition.kind);
        self.conditions.push(condition);
    }

    /// Remove a condition by kind.
    pub fn remove_condition(&mut self, kind: ConditionType) {
        self.conditions.retain(|c| c.kind != kind);
    }
}

/// Top-level declarative spec for a replicated application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: WorkloadSpec,
    /// Observed state.
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Workload {
    /// Revision recorded on this workload, zero when absent.
    #[must_use]
    pub fn revision(&self) -> i64 {
        annotations::parse_revision(self.metadata.annotation(REVISION))
    }

    /// Whether a progress deadline is configured.
    #[must_use]
    pub fn has_progress_deadline(&self) -> bool {
        self.spec
            .progress_deadline_seconds
            .is_some_and(|secs| secs > 0 && secs < i64::from(i32::MAX))
    }
}

impl Resource for Workload {
    const KIND: &'static str = "Workload";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
