use chrono::{DateTime, Utc};
use common::{CorrelationId, EventEnvelope, EventId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One received event for one consumer.
///
/// The pair `(event_id, consumer)` is unique: the same event delivered to two
/// consumers produces two rows, while a redelivery to the same consumer maps
/// back onto the existing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: Uuid,
    pub event_id: EventId,
    pub consumer: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub processing_attempts: i32,
    pub correlation_id: Option<CorrelationId>,
}

impl InboxMessage {
    pub fn from_envelope(envelope: &EventEnvelope, consumer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: envelope.event_id,
            consumer: consumer.into(),
            event_type: envelope.event_type.clone(),
            payload: envelope.payload.clone(),
            received_at: Utc::now(),
            processed_at: None,
            error: None,
            processing_attempts: 0,
            correlation_id: envelope.correlation_id,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}
