//! Saga error types.

use common::CorrelationId;
use thiserror::Error;

use crate::state::SagaStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Saga is in an invalid status for the requested operation.
    #[error("Invalid saga status: expected {expected}, actual {actual}")]
    InvalidStatus {
        expected: String,
        actual: SagaStatus,
    },

    /// The saved state was modified concurrently; reload and retry.
    #[error("Concurrent modification of saga {0}")]
    ConcurrencyConflict(CorrelationId),

    /// No saga with the given correlation id.
    #[error("Saga not found: {0}")]
    NotFound(CorrelationId),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
