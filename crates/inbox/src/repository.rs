use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;
use uuid::Uuid;

use crate::error::InboxError;
use crate::message::InboxMessage;

/// Storage for received events, keyed by `(event_id, consumer)`.
#[async_trait]
pub trait InboxRepository: Send + Sync {
    /// Inserts the message unless a row for its `(event_id, consumer)` pair
    /// already exists. Returns `true` when this call created the row, `false`
    /// when another delivery won the race.
    async fn add_if_absent(&self, message: &InboxMessage) -> Result<bool, InboxError>;

    async fn exists_by_event_id(
        &self,
        event_id: EventId,
        consumer: &str,
    ) -> Result<bool, InboxError>;

    async fn get_by_event_id(
        &self,
        event_id: EventId,
        consumer: &str,
    ) -> Result<Option<InboxMessage>, InboxError>;

    async fn mark_processed(&self, id: Uuid) -> Result<(), InboxError>;

    /// Records a failed attempt and returns the new attempt count.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<i32, InboxError>;

    /// Pending messages in arrival order, capped at `batch_size`.
    async fn get_unprocessed(&self, batch_size: i64) -> Result<Vec<InboxMessage>, InboxError>;

    /// Failed-but-pending messages still below the attempt ceiling.
    async fn get_failed_eligible_for_retry(
        &self,
        max_attempts: i32,
        batch_size: i64,
    ) -> Result<Vec<InboxMessage>, InboxError>;

    /// Deletes processed rows older than the cutoff. Returns the count removed.
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, InboxError>;
}
