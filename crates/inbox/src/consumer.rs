use std::sync::Arc;
use std::time::Duration;

use broker::{BrokerConsumer, Dispatch, EventDispatcher};
use tokio::sync::watch;

/// Tuning knobs for the consumer loop.
#[derive(Debug, Clone)]
pub struct EventConsumerConfig {
    /// Pause after a failed dispatch before the broker redelivers, so a
    /// persistently failing message does not spin the loop.
    pub retry_delay: Duration,
}

impl Default for EventConsumerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Drives a broker subscription through the dispatcher.
///
/// Offsets are committed only after a successful dispatch; a failing
/// handler leaves the offset uncommitted so the broker redelivers the
/// message. Deduplication of those redeliveries is the job of the
/// [`crate::InboxHandler`] wrapped around each registered handler.
pub struct EventConsumer<C> {
    consumer: C,
    dispatcher: Arc<EventDispatcher>,
    config: EventConsumerConfig,
}

impl<C: BrokerConsumer> EventConsumer<C> {
    pub fn new(consumer: C, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            consumer,
            dispatcher,
            config: EventConsumerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EventConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs until the subscription closes or shutdown is signalled.
    ///
    /// A message being handled when shutdown arrives is finished (and its
    /// offset committed) before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("event consumer started");
        loop {
            let delivery = tokio::select! {
                received = self.consumer.recv() => received,
                _ = shutdown.changed() => {
                    tracing::info!("event consumer shutting down");
                    return;
                }
            };

            let delivery = match delivery {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    tracing::info!("subscription closed, event consumer stopping");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "broker receive failed");
                    tokio::time::sleep(self.config.retry_delay).await;
                    continue;
                }
            };

            match self.dispatcher.dispatch(&delivery.envelope).await {
                Ok(Dispatch::Handled(_)) | Ok(Dispatch::Unhandled) => {
                    metrics::counter!("consumer_events_total").increment(1);
                    if let Err(e) = self
                        .consumer
                        .commit(delivery.partition, delivery.offset)
                        .await
                    {
                        tracing::error!(
                            partition = delivery.partition,
                            offset = delivery.offset,
                            error = %e,
                            "offset commit failed"
                        );
                    }
                }
                Err(e) => {
                    // No commit: the broker will redeliver.
                    metrics::counter!("consumer_failures_total").increment(1);
                    tracing::warn!(
                        event_id = %delivery.envelope.event_id,
                        event_type = %delivery.envelope.event_type,
                        error = %e,
                        "dispatch failed, leaving offset uncommitted"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }
}
