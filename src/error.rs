//! Error types for state container operations.
//!
//! Most reads and writes are infallible: unknown paths read as absent and
//! writes materialize intermediate objects. Errors are reserved for
//! programmer mistakes caught at the API boundary and for serde conversions.

use thiserror::Error;

/// Errors that can occur while driving the state container.
#[derive(Debug, Error)]
pub enum StateError {
    /// Batch input was neither a closure nor an object map.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Path string is not a well-formed dot path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A selector was created without any dependency path.
    #[error("createSelector requires at least one dependency path")]
    EmptySelector,

    /// Printer model is not part of the catalogue.
    #[error("Unknown printer model: {0}")]
    UnknownPrinter(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

impl StateError {
    /// Returns true if this error reflects a misuse of the API rather than
    /// a data problem.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            StateError::InvalidBatch(_) | StateError::InvalidPath(_) | StateError::EmptySelector
        )
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}
