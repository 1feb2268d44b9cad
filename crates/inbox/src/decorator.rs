use std::sync::Arc;

use async_trait::async_trait;
use broker::{EventHandler, HandlerError};
use common::EventEnvelope;
use dead_letter::{DeadLetterRepository, DeadLetterService};

use crate::error::InboxError;
use crate::message::InboxMessage;
use crate::repository::InboxRepository;

const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Wraps an [`EventHandler`] with durable inbox tracking.
///
/// Each delivery is recorded before the inner handler runs. Deliveries of an
/// already-processed event are acknowledged without re-running the handler.
/// A failing delivery increments the row's attempt count and re-throws so
/// the consumer does not commit the offset; once the attempt ceiling is
/// reached the message is escalated to the dead letter queue and further
/// redeliveries are acknowledged as no-ops.
pub struct InboxHandler<H, R, D> {
    inner: H,
    repository: R,
    dead_letter: Arc<DeadLetterService<D>>,
    max_attempts: i32,
}

impl<H, R, D> InboxHandler<H, R, D>
where
    H: EventHandler,
    R: InboxRepository,
    D: DeadLetterRepository,
{
    pub fn new(inner: H, repository: R, dead_letter: Arc<DeadLetterService<D>>) -> Self {
        Self {
            inner,
            repository,
            dead_letter,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    async fn record_delivery(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Option<InboxMessage>, InboxError> {
        if let Some(existing) = self
            .repository
            .get_by_event_id(envelope.event_id, self.inner.name())
            .await?
        {
            return Ok(Some(existing));
        }

        let message = InboxMessage::from_envelope(envelope, self.inner.name());
        if self.repository.add_if_absent(&message).await? {
            return Ok(Some(message));
        }
        // Lost the insert race: another delivery of the same event is
        // in flight, let that one own the processing.
        tracing::debug!(
            event_id = %envelope.event_id,
            consumer = self.inner.name(),
            "concurrent delivery already recorded this event"
        );
        Ok(None)
    }

    async fn escalate(&self, envelope: &EventEnvelope, message: &InboxMessage, error: &str) {
        self.dead_letter
            .move_to_dead_letter_queue(
                &envelope.event_type,
                envelope.payload.clone(),
                "Max processing attempts exceeded",
                Some(error),
                self.max_attempts,
                envelope.correlation_id,
                Some(message.id),
                Some(envelope.occurred_at),
            )
            .await;
    }
}

fn store_error(e: InboxError) -> HandlerError {
    HandlerError::Failed(format!("inbox store error: {e}"))
}

#[async_trait]
impl<H, R, D> EventHandler for InboxHandler<H, R, D>
where
    H: EventHandler,
    R: InboxRepository,
    D: DeadLetterRepository,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    #[tracing::instrument(skip_all, fields(event_id = %envelope.event_id, consumer = self.inner.name()))]
    async fn handle(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Option<serde_json::Value>, HandlerError> {
        let Some(message) = self.record_delivery(envelope).await.map_err(store_error)? else {
            return Ok(None);
        };

        if message.is_processed() {
            tracing::debug!("duplicate delivery of processed event, skipping");
            metrics::counter!("inbox_duplicates_total").increment(1);
            return Ok(None);
        }
        if message.processing_attempts >= self.max_attempts {
            // Already escalated on a previous delivery; acknowledge so the
            // broker stops redelivering.
            tracing::warn!(
                attempts = message.processing_attempts,
                "redelivery of exhausted message, skipping"
            );
            return Ok(None);
        }

        match self.inner.handle(envelope).await {
            Ok(result) => {
                self.repository
                    .mark_processed(message.id)
                    .await
                    .map_err(store_error)?;
                metrics::counter!("inbox_processed_total").increment(1);
                Ok(result)
            }
            Err(e) => {
                let error_text = e.to_string();
                let attempts = self
                    .repository
                    .mark_failed(message.id, &error_text)
                    .await
                    .map_err(store_error)?;
                tracing::warn!(attempts, error = %error_text, "event handler failed");

                if attempts >= self.max_attempts {
                    self.escalate(envelope, &message, &error_text).await;
                }
                Err(e)
            }
        }
    }
}
