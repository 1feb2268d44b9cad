use async_trait::async_trait;
use common::EventEnvelope;

use crate::Result;

/// A message as delivered by the broker to a consumer group member.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The delivered envelope.
    pub envelope: EventEnvelope,
    /// Partition the message was read from.
    pub partition: i32,
    /// Offset within the partition. Must be committed manually after the
    /// handler succeeds.
    pub offset: i64,
}

/// Publishing side of the broker collaborator.
///
/// Implementations are provided per deployment (Kafka, RabbitMQ, ...);
/// the core only requires an acknowledged publish.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Publishes an envelope, returning once the broker acknowledged it.
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Consuming side of the broker collaborator.
///
/// Offsets are committed manually: a consumer that crashes (or errors)
/// before committing sees the same message redelivered. Ordering is
/// guaranteed per partition only.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Receives the next delivery, suspending until one is available.
    ///
    /// Returns `None` when the subscription is closed.
    async fn recv(&mut self) -> Result<Option<Delivery>>;

    /// Commits an offset, acknowledging everything up to and including it
    /// on that partition.
    async fn commit(&mut self, partition: i32, offset: i64) -> Result<()>;
}
