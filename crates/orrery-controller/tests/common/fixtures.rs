//! Builders for objects used across integration tests.

use orrery_core::annotations;
use orrery_core::{
    LabelSelector, ObjectMeta, OwnerReference, ReplicaGroup, ReplicaGroupSpec, ReplicaGroupStatus,
    StrategyType, Unit, UnitPhase, UnitSpec, UnitStatus, UnitTemplate, Workload, WorkloadSpec,
    WorkloadStatus,
};

pub fn template(image: &str) -> UnitTemplate {
    let mut template = UnitTemplate::default();
    template.labels.insert("app".to_owned(), "web".to_owned());
    template.spec.image = image.to_owned();
    template
}

/// Builder for test workloads selecting `app=web`.
pub struct WorkloadBuilder {
    workload: Workload,
}

impl WorkloadBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            workload: Workload {
                metadata: ObjectMeta::new("default", name),
                spec: WorkloadSpec {
                    replicas: 3,
                    selector: LabelSelector::from_labels([("app", "web")]),
                    template: template("web:1"),
                    ..WorkloadSpec::default()
                },
                status: WorkloadStatus::default(),
            },
        }
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.workload.spec.replicas = replicas;
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.workload.spec.template = template(image);
        self
    }

    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.workload.spec.selector = selector;
        self
    }

    pub fn with_strategy(mut self, kind: StrategyType) -> Self {
        self.workload.spec.strategy.kind = kind;
        self
    }

    pub fn paused(mut self) -> Self {
        self.workload.spec.paused = true;
        self
    }

    pub fn build(self) -> Workload {
        self.workload
    }
}

/// Builder for test replica groups labelled `app=web`.
pub struct GroupBuilder {
    group: ReplicaGroup,
}

impl GroupBuilder {
    pub fn new(name: &str) -> Self {
        let mut metadata = ObjectMeta::new("default", name);
        metadata.labels.insert("app".to_owned(), "web".to_owned());
        Self {
            group: ReplicaGroup {
                metadata,
                spec: ReplicaGroupSpec {
                    replicas: 0,
                    selector: LabelSelector::from_labels([("app", "web")]),
                    template: template("web:1"),
                },
                status: ReplicaGroupStatus::default(),
            },
        }
    }

    /// Owned by `owner`, with the owner's desired replicas recorded.
    pub fn owned_by(mut self, owner: &Workload) -> Self {
        let meta = &mut self.group.metadata;
        meta.owner_references
            .push(OwnerReference::controller_of(owner));
        meta.annotations.insert(
            annotations::DESIRED_REPLICAS.to_owned(),
            owner.spec.replicas.to_string(),
        );
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.group.spec.template = template(image);
        self
    }

    pub fn with_revision(mut self, revision: i64) -> Self {
        self.group
            .metadata
            .annotations
            .insert(annotations::REVISION.to_owned(), revision.to_string());
        self
    }

    /// Desired replicas, all of them reported available.
    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.group.spec.replicas = replicas;
        self.group.status = ReplicaGroupStatus {
            replicas,
            ready_replicas: replicas,
            available_replicas: replicas,
        };
        self
    }

    pub fn build(self) -> ReplicaGroup {
        self.group
    }
}

pub fn unit(owner: &ReplicaGroup, name: &str, phase: UnitPhase) -> Unit {
    let mut metadata = ObjectMeta::new("default", name);
    metadata.labels.insert("app".to_owned(), "web".to_owned());
    metadata
        .owner_references
        .push(OwnerReference::controller_of(owner));
    Unit {
        metadata,
        spec: UnitSpec::default(),
        status: UnitStatus {
            phase,
            ready: phase == UnitPhase::Running,
        },
    }
}
