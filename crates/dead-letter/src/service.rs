use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::CorrelationId;
use uuid::Uuid;

use crate::Result;
use crate::message::{DeadLetterFilter, DeadLetterMessage, DeadLetterStats};
use crate::repository::{DeadLetterPage, DeadLetterRepository};

/// Service-specific re-delivery logic invoked on manual reprocess.
///
/// The base reprocess operation only flips the `reprocessed` flag; actual
/// re-delivery is up to the owning service's hook.
#[async_trait]
pub trait ReprocessHook: Send + Sync {
    /// Re-delivers the failed message into the owning service's pipeline.
    async fn redeliver(&self, message: &DeadLetterMessage) -> Result<()>;
}

/// Dead letter queue service: the terminal sink of both reliability
/// pipelines, plus the operator-facing triage surface.
pub struct DeadLetterService<R> {
    repository: R,
    service_name: String,
    reprocess_hook: Option<Arc<dyn ReprocessHook>>,
}

impl<R: DeadLetterRepository> DeadLetterService<R> {
    /// Creates a service escalating on behalf of `service_name`.
    pub fn new(repository: R, service_name: impl Into<String>) -> Self {
        Self {
            repository,
            service_name: service_name.into(),
            reprocess_hook: None,
        }
    }

    /// Installs the service-specific reprocess hook.
    pub fn with_reprocess_hook(mut self, hook: Arc<dyn ReprocessHook>) -> Self {
        self.reprocess_hook = Some(hook);
        self
    }

    /// The single write path for escalations.
    ///
    /// This must never propagate an error back into the escalating
    /// pipeline: a storage failure is logged and `None` is returned.
    /// Returns the id of the created entry otherwise.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self, payload))]
    pub async fn move_to_dead_letter_queue(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        failure_reason: &str,
        error_details: Option<&str>,
        total_attempts: i32,
        correlation_id: Option<CorrelationId>,
        original_message_id: Option<Uuid>,
        original_timestamp: Option<DateTime<Utc>>,
    ) -> Option<Uuid> {
        let mut message = DeadLetterMessage::new(
            event_type,
            payload,
            failure_reason,
            total_attempts,
            &self.service_name,
        );
        if let Some(details) = error_details {
            message = message.with_error_details(details);
        }
        if let Some(correlation_id) = correlation_id {
            message = message.with_correlation_id(correlation_id);
        }
        if let Some(original_id) = original_message_id {
            message = message.with_original_message_id(original_id);
        }
        if let Some(at) = original_timestamp {
            message = message.with_original_timestamp(at);
        }

        let id = message.id;
        match self.repository.add(message).await {
            Ok(()) => {
                metrics::counter!("dead_letter_messages_total").increment(1);
                tracing::warn!(
                    %id,
                    event_type,
                    failure_reason,
                    total_attempts,
                    "message moved to dead letter queue"
                );
                Some(id)
            }
            Err(e) => {
                // Terminal sink: swallow the error so the escalating
                // pipeline is not halted by a DLQ storage failure.
                metrics::counter!("dead_letter_store_failures_total").increment(1);
                tracing::error!(event_type, error = %e, "failed to store dead letter message");
                None
            }
        }
    }

    /// Lists messages matching the filter, newest first. `page` is 1-based.
    pub async fn get_paged(
        &self,
        filter: &DeadLetterFilter,
        page: i64,
        page_size: i64,
    ) -> Result<DeadLetterPage> {
        self.repository.get_paged(filter, page, page_size).await
    }

    /// Fetches a single message by id.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<DeadLetterMessage>> {
        self.repository.get_by_id(id).await
    }

    /// Manually reprocesses a message.
    ///
    /// A missing or already-reprocessed message is a no-op (`Ok(false)`).
    /// If a reprocess hook is installed it runs first; a hook failure
    /// propagates and leaves the message un-flipped so the operator can
    /// retry.
    #[tracing::instrument(skip(self))]
    pub async fn reprocess(&self, id: Uuid) -> Result<bool> {
        let Some(message) = self.repository.get_by_id(id).await? else {
            tracing::info!(%id, "reprocess requested for unknown message, ignoring");
            return Ok(false);
        };
        if message.reprocessed {
            tracing::info!(%id, "message already reprocessed, ignoring");
            return Ok(false);
        }

        if let Some(hook) = &self.reprocess_hook {
            hook.redeliver(&message).await?;
        }

        let flipped = self.repository.mark_reprocessed(id, Utc::now()).await?;
        if flipped {
            metrics::counter!("dead_letter_reprocessed_total").increment(1);
            tracing::info!(%id, event_type = %message.event_type, "message reprocessed");
        }
        Ok(flipped)
    }

    /// Appends operator notes to a message.
    pub async fn add_notes(&self, id: Uuid, notes: &str) -> Result<()> {
        self.repository.add_notes(id, notes).await
    }

    /// Returns aggregate statistics over the store.
    pub async fn get_statistics(&self) -> Result<DeadLetterStats> {
        self.repository.get_statistics().await
    }

    /// Deletes reprocessed messages older than the retention window.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_reprocessed(&self, retention: Duration) -> Result<u64> {
        let removed = self
            .repository
            .cleanup_reprocessed(Utc::now() - retention)
            .await?;
        if removed > 0 {
            tracing::info!(removed, "cleaned up reprocessed dead letter messages");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeadLetterError;
    use crate::memory::InMemoryDeadLetterRepository;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn make_service() -> DeadLetterService<InMemoryDeadLetterRepository> {
        DeadLetterService::new(InMemoryDeadLetterRepository::new(), "orders")
    }

    async fn escalate(service: &DeadLetterService<InMemoryDeadLetterRepository>) -> Uuid {
        service
            .move_to_dead_letter_queue(
                "OrderPlaced",
                serde_json::json!({"order": 1}),
                "Max retries exceeded",
                Some("broker unreachable"),
                5,
                Some(CorrelationId::new()),
                Some(Uuid::new_v4()),
                Some(Utc::now()),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn escalation_stores_full_context() {
        let service = make_service();
        let id = escalate(&service).await;

        let message = service.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(message.event_type, "OrderPlaced");
        assert_eq!(message.failure_reason, "Max retries exceeded");
        assert_eq!(message.error_details.as_deref(), Some("broker unreachable"));
        assert_eq!(message.total_attempts, 5);
        assert_eq!(message.service_name, "orders");
        assert!(message.correlation_id.is_some());
        assert!(message.original_message_id.is_some());
        assert!(!message.reprocessed);
    }

    #[tokio::test]
    async fn reprocess_flips_flag_once() {
        let service = make_service();
        let id = escalate(&service).await;

        assert!(service.reprocess(id).await.unwrap());
        assert!(!service.reprocess(id).await.unwrap());
        assert!(!service.reprocess(Uuid::new_v4()).await.unwrap());

        let message = service.get_by_id(id).await.unwrap().unwrap();
        assert!(message.reprocessed);
        assert!(message.reprocessed_at.is_some());
    }

    struct CountingHook {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ReprocessHook for CountingHook {
        async fn redeliver(&self, message: &DeadLetterMessage) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeadLetterError::ReprocessFailed {
                    id: message.id,
                    reason: "downstream rejected".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn reprocess_invokes_hook() {
        let hook = Arc::new(CountingHook {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let service = DeadLetterService::new(InMemoryDeadLetterRepository::new(), "orders")
            .with_reprocess_hook(Arc::clone(&hook) as Arc<dyn ReprocessHook>);

        let id = escalate(&service).await;
        assert!(service.reprocess(id).await.unwrap());
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hook_failure_leaves_message_pending() {
        let hook = Arc::new(CountingHook {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(true),
        });
        let service = DeadLetterService::new(InMemoryDeadLetterRepository::new(), "orders")
            .with_reprocess_hook(Arc::clone(&hook) as Arc<dyn ReprocessHook>);

        let id = escalate(&service).await;
        assert!(service.reprocess(id).await.is_err());

        let message = service.get_by_id(id).await.unwrap().unwrap();
        assert!(!message.reprocessed);

        // Operator can retry after the downstream recovers.
        hook.fail.store(false, Ordering::SeqCst);
        assert!(service.reprocess(id).await.unwrap());
    }

    #[tokio::test]
    async fn notes_and_statistics() {
        let service = make_service();
        let id = escalate(&service).await;
        escalate(&service).await;

        service.add_notes(id, "known vendor outage").await.unwrap();
        let message = service.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(message.operator_notes.as_deref(), Some("known vendor outage"));

        let stats = service.get_statistics().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 2);
    }

    #[tokio::test]
    async fn cleanup_respects_retention() {
        let service = make_service();
        let id = escalate(&service).await;
        service.reprocess(id).await.unwrap();

        // Just reprocessed: still inside any sane retention window.
        let removed = service.cleanup_reprocessed(Duration::days(7)).await.unwrap();
        assert_eq!(removed, 0);

        // Zero retention sweeps it.
        let removed = service.cleanup_reprocessed(Duration::zero()).await.unwrap();
        assert_eq!(removed, 1);
    }
}
