//! Orrery workload controller.
//!
//! This crate drives the observed state of replicated workloads towards
//! their declared state. A [`Workload`](orrery_core::Workload) owns a set of
//! replica groups, one per template revision, and each group owns the units
//! actually running.
//!
//! # Architecture
//!
//! ```text
//! ListWatch ──▶ Informer ──▶ ObjectCache
//!                  │
//!                  ▼
//!           EventClassifier ──▶ WorkQueue ──▶ Controller workers ──▶ SyncEngine
//!                                   ▲                                    │
//!                                   └──────────── retry policy ◀─────────┘
//! ```
//!
//! - **Informers** keep a local cache of each object kind and forward every
//!   change notification.
//! - The **event classifier** maps workload, replica group and unit changes
//!   onto the keys of the workloads that must be synced.
//! - The **work queue** deduplicates keys, never hands the same key to two
//!   workers at once and retries failures with exponential backoff.
//! - The **sync engine** reconciles one workload: it adopts and releases
//!   replica groups, then scales, rolls back or rolls out as needed.
//!
//! Reads come from the caches and may lag. Writes go through a
//! [`ClusterClient`] and rely on resource-version checks rather than
//! in-process locks.

#![forbid(unsafe_code)]

pub mod cache;
pub mod claim;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod error;
pub mod grouping;
pub mod informer;
pub mod queue;
pub mod recorder;
pub mod service;
pub mod store;
pub mod sync;
pub mod watch;

// Re-export commonly used types at the crate root
pub use cache::{Lister, ObjectCache};
pub use claim::{claim_replica_groups, ClaimOutcome};
pub use classifier::EventClassifier;
pub use config::ControllerConfig;
pub use controller::{handle_result, Controller, Outcome};
pub use error::{ControllerError, ControllerResult};
pub use grouping::{group_units, UnitMap};
pub use informer::Informer;
pub use queue::WorkQueue;
pub use recorder::{EventRecorder, EventType, MemoryRecorder, RecordedEvent, TracingRecorder};
pub use service::ControllerService;
pub use store::{ClusterClient, ListWatch, MemoryCluster};
pub use sync::SyncEngine;
pub use watch::{DeletedObject, WatchEvent};
