use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;
use tokio::sync::RwLock;

use crate::error::{OutboxError, Result};
use crate::message::OutboxMessage;
use crate::repository::OutboxRepository;

/// In-memory outbox repository for testing.
///
/// Provides the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryOutboxRepository {
    messages: Arc<RwLock<Vec<OutboxMessage>>>,
}

impl InMemoryOutboxRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Fetches a message by id, for test assertions.
    pub async fn get(&self, id: EventId) -> Option<OutboxMessage> {
        self.messages.read().await.iter().find(|m| m.id == id).cloned()
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn add(&self, message: OutboxMessage) -> Result<()> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn get_unprocessed(
        &self,
        max_retries: i32,
        batch_size: i64,
    ) -> Result<Vec<OutboxMessage>> {
        let messages = self.messages.read().await;
        let mut pending: Vec<_> = messages
            .iter()
            .filter(|m| m.processed_at.is_none() && m.retry_count < max_retries)
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.occurred_at);
        pending.truncate(batch_size as usize);
        Ok(pending)
    }

    async fn get_failed(&self, max_retries: i32, batch_size: i64) -> Result<Vec<OutboxMessage>> {
        let messages = self.messages.read().await;
        let mut failed: Vec<_> = messages
            .iter()
            .filter(|m| m.processed_at.is_none() && m.retry_count >= max_retries)
            .cloned()
            .collect();
        failed.sort_by_key(|m| m.occurred_at);
        failed.truncate(batch_size as usize);
        Ok(failed)
    }

    async fn mark_processed(&self, id: EventId) -> Result<()> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        message.processed_at = Some(Utc::now());
        message.error = None;
        Ok(())
    }

    async fn mark_failed(&self, id: EventId, error: &str) -> Result<i32> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        message.retry_count += 1;
        message.error = Some(error.to_string());
        Ok(message.retry_count)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| !m.processed_at.is_some_and(|at| at < older_than));
        Ok((before - messages.len()) as u64)
    }
}
