use std::sync::Arc;
use std::time::Duration;

use broker::BrokerClient;
use dead_letter::{DeadLetterRepository, DeadLetterService};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::Result;
use crate::message::OutboxMessage;
use crate::registry::EventTypeRegistry;
use crate::repository::OutboxRepository;

/// Configuration for the outbox publisher loop.
#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    /// How often to poll for pending messages.
    pub poll_interval: Duration,
    /// Maximum rows drained per cycle.
    pub batch_size: i64,
    /// Publish attempts before a message escalates to the DLQ.
    pub max_retries: i32,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            max_retries: 5,
        }
    }
}

/// Background loop draining the outbox store to the broker.
///
/// Rows are processed oldest-first and each row's outcome is persisted
/// immediately, so a crash mid-batch never loses progress on rows already
/// handled. A row is only marked processed after the broker acknowledged
/// the publish (at-least-once at the publish boundary). Rows that exhaust
/// `max_retries` escalate to the dead letter store and leave the retry
/// selection; they are not deleted here (cleanup is a separate time-based
/// job). Safe, but wasteful, to run in several replicas at once: there is
/// no cross-instance claim on rows.
pub struct OutboxPublisher<R, B, D> {
    repository: R,
    broker: B,
    dead_letter: Arc<DeadLetterService<D>>,
    registry: Arc<EventTypeRegistry>,
    config: OutboxPublisherConfig,
}

impl<R, B, D> OutboxPublisher<R, B, D>
where
    R: OutboxRepository,
    B: BrokerClient,
    D: DeadLetterRepository,
{
    /// Creates a new publisher.
    pub fn new(
        repository: R,
        broker: B,
        dead_letter: Arc<DeadLetterService<D>>,
        registry: Arc<EventTypeRegistry>,
        config: OutboxPublisherConfig,
    ) -> Self {
        Self {
            repository,
            broker,
            dead_letter,
            registry,
            config,
        }
    }

    /// Runs the polling loop until the shutdown signal fires.
    ///
    /// Cancellation is cooperative: the in-flight batch finishes before the
    /// loop exits, so no row is left with an uncommitted outcome.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "outbox publisher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "outbox publish cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("outbox publisher shutting down");
                    break;
                }
            }
        }
    }

    /// Drains one batch. Returns the number of messages published.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self
            .repository
            .get_unprocessed(self.config.max_retries, self.config.batch_size)
            .await?;

        let mut published = 0;
        for message in batch {
            if self.publish_one(&message).await? {
                published += 1;
            }
        }

        if published > 0 {
            tracing::debug!(published, "outbox batch published");
        }
        Ok(published)
    }

    async fn publish_one(&self, message: &OutboxMessage) -> Result<bool> {
        match self.registry.check(&message.event_type, &message.payload) {
            None => {
                tracing::warn!(
                    id = %message.id,
                    event_type = %message.event_type,
                    "unknown event type in outbox, will retry"
                );
                self.record_failure(message, "unknown event type").await?;
                Ok(false)
            }
            Some(Err(e)) => {
                tracing::warn!(
                    id = %message.id,
                    event_type = %message.event_type,
                    error = %e,
                    "outbox payload does not decode, will retry"
                );
                self.record_failure(message, &format!("payload does not decode: {e}"))
                    .await?;
                Ok(false)
            }
            Some(Ok(())) => match self.broker.publish(&message.to_envelope()).await {
                Ok(()) => {
                    self.repository.mark_processed(message.id).await?;
                    metrics::counter!("outbox_published_total").increment(1);
                    Ok(true)
                }
                Err(e) => {
                    tracing::warn!(
                        id = %message.id,
                        event_type = %message.event_type,
                        error = %e,
                        "publish failed"
                    );
                    self.record_failure(message, &e.to_string()).await?;
                    Ok(false)
                }
            },
        }
    }

    async fn record_failure(&self, message: &OutboxMessage, error: &str) -> Result<()> {
        let retry_count = self.repository.mark_failed(message.id, error).await?;
        metrics::counter!("outbox_publish_failures_total").increment(1);

        if retry_count >= self.config.max_retries {
            self.dead_letter
                .move_to_dead_letter_queue(
                    &message.event_type,
                    message.payload.clone(),
                    "Max retries exceeded",
                    Some(error),
                    retry_count,
                    message.correlation_id,
                    Some(message.id.as_uuid()),
                    Some(message.occurred_at),
                )
                .await;
        }
        Ok(())
    }
}
