//! Core object model for Orrery.
//!
//! This crate provides the resource types shared by the Orrery controllers:
//!
//! - **Metadata**: Object identity, namespace-qualified keys, unique ids and
//!   owner references
//! - **Selectors**: Label selectors used to associate workloads with the
//!   replica groups and units they manage
//! - **Resources**: [`Workload`], [`ReplicaGroup`] and [`Unit`]
//!
//! # Ownership
//!
//! Subordinate objects point back at their controller through an
//! [`OwnerReference`]. Names are reusable after deletion, so an owner
//! reference only resolves when both the name lookup and the unique id match:
//!
//! ```text
//! Workload ◀── owner-ref ── ReplicaGroup ◀── owner-ref ── Unit
//! ```

#![forbid(unsafe_code)]

pub mod annotations;
pub mod error;
pub mod intstr;
pub mod meta;
pub mod replica_group;
pub mod selector;
pub mod unit;
pub mod workload;

pub use error::{CoreError, CoreResult};
pub use intstr::IntOrPercent;
pub use meta::{Labels, ObjectKey, ObjectMeta, OwnerReference, Resource, Uid};
pub use replica_group::{ReplicaGroup, ReplicaGroupSpec, ReplicaGroupStatus};
pub use selector::{LabelSelector, SelectorOperator, SelectorRequirement};
pub use unit::{Unit, UnitPhase, UnitSpec, UnitStatus, UnitTemplate};
pub use workload::{
    Condition, ConditionStatus, ConditionType, RollbackConfig, RollingUpdateParams, StrategyType,
    Workload, WorkloadSpec, WorkloadStatus, WorkloadStrategy,
};
