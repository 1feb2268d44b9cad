use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when interacting with the dead letter store.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    /// The message was not found.
    #[error("Dead letter message not found: {0}")]
    NotFound(Uuid),

    /// The reprocess hook rejected the message.
    #[error("Reprocess failed for {id}: {reason}")]
    ReprocessFailed { id: Uuid, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for dead letter operations.
pub type Result<T> = std::result::Result<T, DeadLetterError>;
