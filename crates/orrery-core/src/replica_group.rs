//! Replica groups: fixed-template sets of replicated units.

use serde::{Deserialize, Serialize};

use crate::annotations::{self, REVISION};
use crate::meta::{ObjectMeta, Resource};
use crate::selector::LabelSelector;
use crate::unit::UnitTemplate;

/// Desired state of a replica group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroupSpec {
    /// Number of units the group should run.
    pub replicas: i32,
    /// Selector for the units the group manages.
    #[serde(default)]
    pub selector: LabelSelector,
    /// Template for new units.
    #[serde(default)]
    pub template: UnitTemplate,
}

/// Observed state of a replica group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroupStatus {
    /// Units currently created.
    #[serde(default)]
    pub replicas: i32,
    /// Units passing readiness checks.
    #[serde(default)]
    pub ready_replicas: i32,
    /// Units ready for long enough to count as available.
    #[serde(default)]
    pub available_replicas: i32,
}

/// A fixed-template, fixed-revision group of replicated units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroup {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: ReplicaGroupSpec,
    /// Observed state.
    #[serde(default)]
    pub status: ReplicaGroupStatus,
}

impl ReplicaGroup {
    /// Revision recorded on this group, zero when absent.
    #[must_use]
    pub fn revision(&self) -> i64 {
        annotations::parse_revision(self.metadata.annotation(REVISION))
    }

    /// Desired replica count.
    #[must_use]
    pub const fn replicas(&self) -> i32 {
        self.spec.replicas
    }
}

impl Resource for ReplicaGroup {
    const KIND: &'static str = "ReplicaGroup";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
