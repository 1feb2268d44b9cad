use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Result;
use crate::message::{DeadLetterFilter, DeadLetterMessage, DeadLetterStats};
use crate::repository::{DeadLetterPage, DeadLetterRepository};

/// In-memory dead letter repository for testing.
///
/// Provides the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryDeadLetterRepository {
    messages: Arc<RwLock<Vec<DeadLetterMessage>>>,
}

impl InMemoryDeadLetterRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl DeadLetterRepository for InMemoryDeadLetterRepository {
    async fn add(&self, message: DeadLetterMessage) -> Result<()> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn get_paged(
        &self,
        filter: &DeadLetterFilter,
        page: i64,
        page_size: i64,
    ) -> Result<DeadLetterPage> {
        let messages = self.messages.read().await;
        let mut matching: Vec<_> = messages
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.moved_to_dlq_at.cmp(&a.moved_to_dlq_at));

        let total = matching.len() as i64;
        let offset = ((page - 1).max(0) * page_size) as usize;
        let page_messages: Vec<_> = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();

        Ok(DeadLetterPage {
            messages: page_messages,
            total,
            page,
            page_size,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<DeadLetterMessage>> {
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|m| m.id == id).cloned())
    }

    async fn mark_reprocessed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut messages = self.messages.write().await;
        match messages.iter_mut().find(|m| m.id == id && !m.reprocessed) {
            Some(message) => {
                message.reprocessed = true;
                message.reprocessed_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_notes(&self, id: Uuid, notes: &str) -> Result<()> {
        let mut messages = self.messages.write().await;
        if let Some(message) = messages.iter_mut().find(|m| m.id == id) {
            message.operator_notes = Some(match message.operator_notes.take() {
                Some(existing) => format!("{existing}\n{notes}"),
                None => notes.to_string(),
            });
        }
        Ok(())
    }

    async fn get_statistics(&self) -> Result<DeadLetterStats> {
        let messages = self.messages.read().await;
        let mut stats = DeadLetterStats::default();
        for message in messages.iter() {
            stats.total += 1;
            if message.reprocessed {
                stats.reprocessed += 1;
            } else {
                stats.pending += 1;
            }
            *stats
                .by_service
                .entry(message.service_name.clone())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn cleanup_reprocessed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| {
            !(m.reprocessed && m.reprocessed_at.is_some_and(|at| at < older_than))
        });
        Ok((before - messages.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(service: &str) -> DeadLetterMessage {
        DeadLetterMessage::new(
            "OrderPlaced",
            serde_json::json!({"order": 1}),
            "Max retries exceeded",
            5,
            service,
        )
    }

    #[tokio::test]
    async fn add_and_get_by_id() {
        let repo = InMemoryDeadLetterRepository::new();
        let message = make_message("orders");
        let id = message.id;

        repo.add(message).await.unwrap();

        let found = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.service_name, "orders");
    }

    #[tokio::test]
    async fn get_by_id_missing() {
        let repo = InMemoryDeadLetterRepository::new();
        assert!(repo.get_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn paged_listing_filters_and_counts() {
        let repo = InMemoryDeadLetterRepository::new();
        for _ in 0..3 {
            repo.add(make_message("orders")).await.unwrap();
        }
        repo.add(make_message("payments")).await.unwrap();

        let filter = DeadLetterFilter {
            service_name: Some("orders".to_string()),
            ..Default::default()
        };
        let page = repo.get_paged(&filter, 1, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.messages.len(), 2);

        let page2 = repo.get_paged(&filter, 2, 2).await.unwrap();
        assert_eq!(page2.messages.len(), 1);
    }

    #[tokio::test]
    async fn mark_reprocessed_once() {
        let repo = InMemoryDeadLetterRepository::new();
        let message = make_message("orders");
        let id = message.id;
        repo.add(message).await.unwrap();

        assert!(repo.mark_reprocessed(id, Utc::now()).await.unwrap());
        // Second call is a no-op.
        assert!(!repo.mark_reprocessed(id, Utc::now()).await.unwrap());
        // Missing id is a no-op.
        assert!(!repo.mark_reprocessed(Uuid::new_v4(), Utc::now()).await.unwrap());

        let found = repo.get_by_id(id).await.unwrap().unwrap();
        assert!(found.reprocessed);
        assert!(found.reprocessed_at.is_some());
    }

    #[tokio::test]
    async fn notes_append() {
        let repo = InMemoryDeadLetterRepository::new();
        let message = make_message("orders");
        let id = message.id;
        repo.add(message).await.unwrap();

        repo.add_notes(id, "looked at payload").await.unwrap();
        repo.add_notes(id, "vendor outage confirmed").await.unwrap();

        let found = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(
            found.operator_notes.as_deref(),
            Some("looked at payload\nvendor outage confirmed")
        );
    }

    #[tokio::test]
    async fn statistics() {
        let repo = InMemoryDeadLetterRepository::new();
        let reprocessed = make_message("orders");
        let reprocessed_id = reprocessed.id;
        repo.add(reprocessed).await.unwrap();
        repo.add(make_message("orders")).await.unwrap();
        repo.add(make_message("payments")).await.unwrap();
        repo.mark_reprocessed(reprocessed_id, Utc::now()).await.unwrap();

        let stats = repo.get_statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.reprocessed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.by_service.get("orders"), Some(&2));
        assert_eq!(stats.by_service.get("payments"), Some(&1));
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_reprocessed() {
        let repo = InMemoryDeadLetterRepository::new();
        let old = make_message("orders");
        let old_id = old.id;
        let pending = make_message("orders");
        let pending_id = pending.id;
        repo.add(old).await.unwrap();
        repo.add(pending).await.unwrap();

        let long_ago = Utc::now() - chrono::Duration::days(30);
        repo.mark_reprocessed(old_id, long_ago).await.unwrap();

        let removed = repo
            .cleanup_reprocessed(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get_by_id(old_id).await.unwrap().is_none());
        assert!(repo.get_by_id(pending_id).await.unwrap().is_some());
    }
}
