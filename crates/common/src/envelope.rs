use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::ids::{AggregateId, CorrelationId, EventId};

/// A domain event as the messaging core sees it.
///
/// The core makes no assumptions about event content beyond a stable
/// identity, a timestamp, and a logical type name (the string
/// discriminator used for dispatch).
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync {
    /// The logical type name, e.g. `"OrderCreated"`.
    fn event_type(&self) -> &'static str;

    /// The producer-assigned event identity.
    fn event_id(&self) -> EventId;

    /// When the event occurred in the producing service.
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// The wire unit travelling between the outbox publisher and consumers.
///
/// Carries the serialized event payload along with the metadata the
/// inbox/idempotency layers need: identity for deduplication, the type
/// discriminator for dispatch, and the correlation id for tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Producer-assigned event identity.
    pub event_id: EventId,

    /// The logical event type name (dispatch discriminator).
    pub event_type: String,

    /// When the event occurred in the producing service.
    pub occurred_at: DateTime<Utc>,

    /// Correlation id of the business transaction, if any.
    pub correlation_id: Option<CorrelationId>,

    /// Aggregate the event originated from, if any.
    pub aggregate_id: Option<AggregateId>,

    /// The serialized event.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Wraps a pre-serialized payload in an envelope.
    pub fn new(
        event_id: EventId,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            occurred_at,
            correlation_id: None,
            aggregate_id: None,
            payload,
        }
    }

    /// Wraps a domain event, serializing it as the payload.
    pub fn from_event<E: DomainEvent>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: event.event_id(),
            event_type: event.event_type().to_string(),
            occurred_at: event.occurred_at(),
            correlation_id: None,
            aggregate_id: None,
            payload: serde_json::to_value(event)?,
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

    /// Deserializes the payload into a concrete event type.
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        event_id: EventId,
        occurred_at: DateTime<Utc>,
        order_total_cents: i64,
    }

    impl DomainEvent for OrderPlaced {
        fn event_type(&self) -> &'static str {
            "OrderPlaced"
        }

        fn event_id(&self) -> EventId {
            self.event_id
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.occurred_at
        }
    }

    #[test]
    fn from_event_captures_metadata() {
        let event = OrderPlaced {
            event_id: EventId::new(),
            occurred_at: Utc::now(),
            order_total_cents: 4200,
        };

        let envelope = EventEnvelope::from_event(&event).unwrap();
        assert_eq!(envelope.event_id, event.event_id);
        assert_eq!(envelope.event_type, "OrderPlaced");
        assert!(envelope.correlation_id.is_none());
    }

    #[test]
    fn payload_roundtrip() {
        let event = OrderPlaced {
            event_id: EventId::new(),
            occurred_at: Utc::now(),
            order_total_cents: 4200,
        };

        let envelope = EventEnvelope::from_event(&event).unwrap();
        let decoded: OrderPlaced = envelope.deserialize_payload().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn builder_setters() {
        let correlation_id = CorrelationId::new();
        let aggregate_id = AggregateId::new();

        let envelope = EventEnvelope::new(
            EventId::new(),
            "OrderPlaced",
            Utc::now(),
            serde_json::json!({}),
        )
        .with_correlation_id(correlation_id)
        .with_aggregate_id(aggregate_id);

        assert_eq!(envelope.correlation_id, Some(correlation_id));
        assert_eq!(envelope.aggregate_id, Some(aggregate_id));
    }

    #[test]
    fn envelope_serialization_roundtrip() {
        let envelope = EventEnvelope::new(
            EventId::new(),
            "OrderPlaced",
            Utc::now(),
            serde_json::json!({"order_total_cents": 4200}),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.event_id, envelope.event_id);
        assert_eq!(decoded.event_type, envelope.event_type);
        assert_eq!(decoded.payload, envelope.payload);
    }
}
