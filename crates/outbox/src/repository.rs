use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;

use crate::Result;
use crate::message::OutboxMessage;

/// Persistence contract for the outbox store.
///
/// `mark_failed` persists the incremented retry counter immediately, so
/// retry budgets survive a process restart.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Appends a pending message.
    ///
    /// Producers should do this inside the same transaction as the state
    /// change (see `PostgresOutboxRepository::add_in_tx`).
    async fn add(&self, message: OutboxMessage) -> Result<()>;

    /// Returns up to `batch_size` pending messages still inside their retry
    /// budget, oldest `occurred_at` first.
    async fn get_unprocessed(&self, max_retries: i32, batch_size: i64)
    -> Result<Vec<OutboxMessage>>;

    /// Returns up to `batch_size` messages at or over the retry ceiling,
    /// for operational inspection.
    async fn get_failed(&self, max_retries: i32, batch_size: i64) -> Result<Vec<OutboxMessage>>;

    /// Marks a message published: sets `processed_at`, clears the error.
    async fn mark_processed(&self, id: EventId) -> Result<()>;

    /// Records a publish failure: increments `retry_count`, stores the
    /// error. Returns the new retry count.
    async fn mark_failed(&self, id: EventId, error: &str) -> Result<i32>;

    /// Deletes processed messages older than the cutoff. Returns the number
    /// of rows removed.
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64>;
}
