use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("inbox message not found: {0}")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("idempotency store error: {0}")]
    Store(String),
}
