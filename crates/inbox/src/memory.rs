use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::InboxError;
use crate::message::InboxMessage;
use crate::repository::InboxRepository;

/// In-memory inbox for tests and single-process setups.
#[derive(Clone, Default)]
pub struct InMemoryInboxRepository {
    messages: Arc<RwLock<Vec<InboxMessage>>>,
}

impl InMemoryInboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<InboxMessage> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl InboxRepository for InMemoryInboxRepository {
    async fn add_if_absent(&self, message: &InboxMessage) -> Result<bool, InboxError> {
        let mut messages = self.messages.write().await;
        if messages
            .iter()
            .any(|m| m.event_id == message.event_id && m.consumer == message.consumer)
        {
            return Ok(false);
        }
        messages.push(message.clone());
        Ok(true)
    }

    async fn exists_by_event_id(
        &self,
        event_id: EventId,
        consumer: &str,
    ) -> Result<bool, InboxError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .any(|m| m.event_id == event_id && m.consumer == consumer))
    }

    async fn get_by_event_id(
        &self,
        event_id: EventId,
        consumer: &str,
    ) -> Result<Option<InboxMessage>, InboxError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|m| m.event_id == event_id && m.consumer == consumer)
            .cloned())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), InboxError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(InboxError::NotFound(id))?;
        message.processed_at = Some(Utc::now());
        message.error = None;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<i32, InboxError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(InboxError::NotFound(id))?;
        message.error = Some(error.to_string());
        message.processing_attempts += 1;
        Ok(message.processing_attempts)
    }

    async fn get_unprocessed(&self, batch_size: i64) -> Result<Vec<InboxMessage>, InboxError> {
        let messages = self.messages.read().await;
        let mut pending: Vec<InboxMessage> = messages
            .iter()
            .filter(|m| m.processed_at.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.received_at);
        pending.truncate(batch_size as usize);
        Ok(pending)
    }

    async fn get_failed_eligible_for_retry(
        &self,
        max_attempts: i32,
        batch_size: i64,
    ) -> Result<Vec<InboxMessage>, InboxError> {
        let messages = self.messages.read().await;
        let mut eligible: Vec<InboxMessage> = messages
            .iter()
            .filter(|m| {
                m.processed_at.is_none()
                    && m.error.is_some()
                    && m.processing_attempts < max_attempts
            })
            .cloned()
            .collect();
        eligible.sort_by_key(|m| m.received_at);
        eligible.truncate(batch_size as usize);
        Ok(eligible)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, InboxError> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| !matches!(m.processed_at, Some(at) if at < older_than));
        Ok((before - messages.len()) as u64)
    }
}
