//! Units: single running instances of a template.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::annotations::TEMPLATE_HASH_LABEL;
use crate::meta::{Labels, ObjectMeta, Resource};

/// What a unit runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Image reference.
    pub image: String,
    /// Command line.
    #[serde(default)]
    pub command: Vec<String>,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Template from which units are stamped out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTemplate {
    /// Labels applied to every unit.
    #[serde(default)]
    pub labels: Labels,
    /// Annotations applied to every unit.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Unit spec.
    #[serde(default)]
    pub spec: UnitSpec,
}

impl UnitTemplate {
    /// Compare two templates, ignoring the template hash label.
    #[must_use]
    pub fn equal_ignoring_hash(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.labels.remove(TEMPLATE_HASH_LABEL);
        b.labels.remove(TEMPLATE_HASH_LABEL);
        a == b
    }
}

/// Lifecycle phase of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPhase {
    /// Accepted but not yet running.
    #[default]
    Pending,
    /// Running.
    Running,
    /// Exited successfully.
    Succeeded,
    /// Exited with failure.
    Failed,
    /// State could not be obtained.
    Unknown,
}

impl UnitPhase {
    /// Whether the unit has finished and can never run again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Observed unit state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    /// Lifecycle phase.
    #[serde(default)]
    pub phase: UnitPhase,
    /// Whether the unit passes its readiness checks.
    #[serde(default)]
    pub ready: bool,
}

/// A single running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    #[serde(default)]
    pub spec: UnitSpec,
    /// Observed state.
    #[serde(default)]
    pub status: UnitStatus,
}

impl Resource for Unit {
    const KIND: &'static str = "Unit";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
