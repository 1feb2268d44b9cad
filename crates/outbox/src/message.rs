use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId, DomainEvent, EventEnvelope, EventId};
use serde::{Deserialize, Serialize};

/// A domain event queued for publication.
///
/// Created in the same transaction as the state change it represents.
/// Only the publisher mutates it afterwards: `processed_at` on success,
/// `retry_count`/`error` on failure. The row id doubles as the wire
/// event id, so the identity the inbox deduplicates on stays stable
/// across publish retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: EventId,

    /// The logical event type name (dispatch discriminator).
    pub event_type: String,

    /// The serialized event.
    pub payload: serde_json::Value,

    /// When the producing state change occurred. Publish order within one
    /// producer instance follows this timestamp.
    pub occurred_at: DateTime<Utc>,

    /// Set by the publisher once the broker acknowledged. Null = pending.
    pub processed_at: Option<DateTime<Utc>>,

    /// Last publish error, if any.
    pub error: Option<String>,

    pub retry_count: i32,

    pub correlation_id: Option<CorrelationId>,

    pub aggregate_id: Option<AggregateId>,
}

impl OutboxMessage {
    /// Creates a pending outbox message for a pre-serialized payload.
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            payload,
            occurred_at,
            processed_at: None,
            error: None,
            retry_count: 0,
            correlation_id: None,
            aggregate_id: None,
        }
    }

    /// Creates a pending outbox message from a domain event.
    pub fn from_event<E: DomainEvent>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: event.event_id(),
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            occurred_at: event.occurred_at(),
            processed_at: None,
            error: None,
            retry_count: 0,
            correlation_id: None,
            aggregate_id: None,
        })
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the originating aggregate id.
    pub fn with_aggregate_id(mut self, aggregate_id: AggregateId) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self
    }

    /// Returns true if the message has not been published yet.
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    /// Builds the wire envelope for this message.
    pub fn to_envelope(&self) -> EventEnvelope {
        let mut envelope = EventEnvelope::new(
            self.id,
            self.event_type.clone(),
            self.occurred_at,
            self.payload.clone(),
        );
        if let Some(correlation_id) = self.correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        if let Some(aggregate_id) = self.aggregate_id {
            envelope = envelope.with_aggregate_id(aggregate_id);
        }
        envelope
    }
}
