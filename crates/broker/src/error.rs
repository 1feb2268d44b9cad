use thiserror::Error;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker rejected or failed the publish.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The offset commit was rejected.
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
