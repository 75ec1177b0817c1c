//! Error types for dialogue-state-core.

use thiserror::Error;

/// Top-level error type for dialogue-state-core.
#[derive(Debug, Error)]
pub enum DstError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid slot identifier '{slot}': {reason}")]
    InvalidSlot { slot: String, reason: String },

    #[error("Duplicate slot in catalog: {slot}")]
    DuplicateSlot { slot: String },

    #[error("Unknown operation id {id} for operation set {op_set} ({n_op} classes)")]
    UnknownOperation {
        id: u32,
        op_set: String,
        n_op: usize,
    },

    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Turn {turn_id} is not in the predictions")]
    MissingPrediction { turn_id: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for DstError {
    fn from(err: serde_json::Error) -> Self {
        DstError::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for DstError {
    fn from(err: config::ConfigError) -> Self {
        DstError::ConfigError(err.to_string())
    }
}

/// Result type alias for core operations.
pub type DstResult<T> = Result<T, DstError>;
