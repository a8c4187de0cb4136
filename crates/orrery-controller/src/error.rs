//! Error types for orrery-controller.

use orrery_core::{CoreError, ObjectKey};

/// Result type alias using [`ControllerError`].
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors that can occur while reconciling workloads.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ControllerError {
    /// Object does not exist in the cache or store.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of the missing object.
        kind: &'static str,
        /// Key of the missing object.
        key: ObjectKey,
    },

    /// The namespace is being torn down and rejects new writes.
    #[error("namespace {0} is terminating")]
    NamespaceTerminating(String),

    /// Write rejected because the object changed since it was read.
    #[error("conflict writing {kind} {key}: {reason}")]
    Conflict {
        /// Kind of the object being written.
        kind: &'static str,
        /// Key of the object being written.
        key: ObjectKey,
        /// What did not match.
        reason: String,
    },

    /// Create rejected because the name is taken.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Kind of the object being created.
        kind: &'static str,
        /// Key of the object being created.
        key: ObjectKey,
    },

    /// Object field could not be interpreted.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Workload names a strategy this controller does not implement.
    #[error("unexpected workload strategy type: {0}")]
    UnknownStrategy(String),

    /// Transient store or transport failure.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// Create a not-found error.
    #[must_use]
    pub const fn not_found(kind: &'static str, key: ObjectKey) -> Self {
        Self::NotFound { kind, key }
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(kind: &'static str, key: ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            key,
            reason: reason.into(),
        }
    }

    /// Create a store error.
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the object was not found.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the namespace is terminating.
    #[must_use]
    pub const fn is_namespace_terminating(&self) -> bool {
        matches!(self, Self::NamespaceTerminating(_))
    }

    /// Whether the write lost an optimistic concurrency race.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether a create collided with an existing name.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
