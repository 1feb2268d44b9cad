use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Result;
use crate::message::{DeadLetterFilter, DeadLetterMessage, DeadLetterStats};

/// One page of a dead letter listing.
#[derive(Debug, Clone)]
pub struct DeadLetterPage {
    pub messages: Vec<DeadLetterMessage>,
    /// Total number of messages matching the filter, across all pages.
    pub total: i64,
    /// 1-based page number this page represents.
    pub page: i64,
    pub page_size: i64,
}

/// Persistence contract for the dead letter store.
///
/// Implemented per service over any storage engine; the in-memory and
/// Postgres implementations in this crate are the references.
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    /// Inserts a new dead letter entry.
    async fn add(&self, message: DeadLetterMessage) -> Result<()>;

    /// Lists messages matching the filter, newest first, paged.
    /// `page` is 1-based.
    async fn get_paged(
        &self,
        filter: &DeadLetterFilter,
        page: i64,
        page_size: i64,
    ) -> Result<DeadLetterPage>;

    /// Fetches a single message by id.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<DeadLetterMessage>>;

    /// Flips the reprocessed flag and timestamps it.
    ///
    /// Returns false if the message does not exist or was already
    /// reprocessed (both no-ops by contract).
    async fn mark_reprocessed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Appends operator notes to a message.
    async fn add_notes(&self, id: Uuid, notes: &str) -> Result<()>;

    /// Returns aggregate statistics over the store.
    async fn get_statistics(&self) -> Result<DeadLetterStats>;

    /// Deletes reprocessed messages older than the cutoff. Returns the
    /// number of rows removed.
    async fn cleanup_reprocessed(&self, older_than: DateTime<Utc>) -> Result<u64>;
}
