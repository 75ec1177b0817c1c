//! Error types for tensor-level tracking operations.

use dialogue_state_core::DstError;
use thiserror::Error;

/// Model-specific errors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Tensor operation failed.
    #[error("Tensor error: {message}")]
    Tensor { message: String },

    /// Input shapes disagree with each other or with the configuration.
    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    /// A slot position points outside the token sequence.
    #[error("Slot position {position} for slot {slot} in row {row} is outside sequence length {seq_len}")]
    SlotPositionOutOfBounds {
        row: usize,
        slot: usize,
        position: u32,
        seq_len: usize,
    },

    /// Input longer than the configured maximum sequence length.
    #[error("Sequence length {actual} exceeds maximum {max}")]
    SequenceTooLong { actual: usize, max: usize },

    /// A row has more UPDATE slots than the requested `max_update`.
    #[error("Row {row} has {n_update} update slots but max_update is {max_update}")]
    MaxUpdateExceeded {
        row: usize,
        n_update: usize,
        max_update: usize,
    },

    /// Input validation failed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Domain-layer failure.
    #[error(transparent)]
    Domain(#[from] DstError),
}

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    pub(crate) fn shape(what: &str, expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        ModelError::ShapeMismatch {
            what: what.to_string(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}
