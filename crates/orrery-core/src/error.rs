//! Error types for the object model.

use thiserror::Error;

/// Errors raised while interpreting object fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A cache key could not be split into namespace and name.
    #[error("unexpected key format: {0:?}")]
    InvalidKey(String),

    /// A label selector requirement is malformed.
    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    /// An int-or-percent value could not be interpreted.
    #[error("invalid int-or-percent value: {0}")]
    InvalidIntOrPercent(String),
}

/// Result type for object model operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
