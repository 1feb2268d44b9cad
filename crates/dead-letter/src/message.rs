use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message parked in the dead letter queue.
///
/// Created only by escalation from the outbox or inbox pipelines once a
/// message exhausted its retry budget; mutated only by manual reprocessing
/// and operator annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub id: Uuid,

    /// The wire event-type discriminator of the failed message.
    pub event_type: String,

    /// The failed payload, preserved verbatim.
    pub payload: serde_json::Value,

    /// When the original message occurred/was received, if known.
    pub original_timestamp: Option<DateTime<Utc>>,

    /// When the message was escalated here.
    pub moved_to_dlq_at: DateTime<Utc>,

    /// Short machine-friendly reason, e.g. `"Max retries exceeded"`.
    pub failure_reason: String,

    /// Last error message observed by the escalating pipeline.
    pub error_details: Option<String>,

    /// Total processing/publish attempts before escalation.
    pub total_attempts: i32,

    /// The service that escalated the message.
    pub service_name: String,

    pub correlation_id: Option<CorrelationId>,

    /// Back-reference to the outbox/inbox row that escalated. Lookup only,
    /// not an ownership edge.
    pub original_message_id: Option<Uuid>,

    pub reprocessed: bool,
    pub reprocessed_at: Option<DateTime<Utc>>,
    pub operator_notes: Option<String>,
}

impl DeadLetterMessage {
    /// Creates a new dead letter entry for the given failure.
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        failure_reason: impl Into<String>,
        total_attempts: i32,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            original_timestamp: None,
            moved_to_dlq_at: Utc::now(),
            failure_reason: failure_reason.into(),
            error_details: None,
            total_attempts,
            service_name: service_name.into(),
            correlation_id: None,
            original_message_id: None,
            reprocessed: false,
            reprocessed_at: None,
            operator_notes: None,
        }
    }

    /// Sets the last error observed before escalation.
    pub fn with_error_details(mut self, error_details: impl Into<String>) -> Self {
        self.error_details = Some(error_details.into());
        self
    }

    /// Sets the correlation id of the failed business transaction.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the back-reference to the escalating outbox/inbox row.
    pub fn with_original_message_id(mut self, original_message_id: Uuid) -> Self {
        self.original_message_id = Some(original_message_id);
        self
    }

    /// Sets the timestamp of the original message.
    pub fn with_original_timestamp(mut self, original_timestamp: DateTime<Utc>) -> Self {
        self.original_timestamp = Some(original_timestamp);
        self
    }
}

/// Filters for paged dead letter listings.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    /// Only messages escalated by this service.
    pub service_name: Option<String>,
    /// Only messages moved to the DLQ at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only messages moved to the DLQ before this instant.
    pub to: Option<DateTime<Utc>>,
    /// Only messages with this reprocessed flag.
    pub reprocessed: Option<bool>,
}

impl DeadLetterFilter {
    /// Returns true if the message passes every set filter.
    pub fn matches(&self, message: &DeadLetterMessage) -> bool {
        if let Some(ref service) = self.service_name
            && &message.service_name != service
        {
            return false;
        }
        if let Some(from) = self.from
            && message.moved_to_dlq_at < from
        {
            return false;
        }
        if let Some(to) = self.to
            && message.moved_to_dlq_at >= to
        {
            return false;
        }
        if let Some(reprocessed) = self.reprocessed
            && message.reprocessed != reprocessed
        {
            return false;
        }
        true
    }
}

/// Aggregate statistics over the dead letter store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadLetterStats {
    pub total: i64,
    pub reprocessed: i64,
    pub pending: i64,
    pub by_service: HashMap<String, i64>,
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

    #[test]
    fn new_message_is_not_reprocessed() {
        let message = make_message("orders");
        assert!(!message.reprocessed);
        assert!(message.reprocessed_at.is_none());
        assert!(message.operator_notes.is_none());
        assert_eq!(message.total_attempts, 5);
    }

    #[test]
    fn builder_setters() {
        let correlation_id = CorrelationId::new();
        let original_id = Uuid::new_v4();
        let message = make_message("orders")
            .with_error_details("connection refused")
            .with_correlation_id(correlation_id)
            .with_original_message_id(original_id);

        assert_eq!(message.error_details.as_deref(), Some("connection refused"));
        assert_eq!(message.correlation_id, Some(correlation_id));
        assert_eq!(message.original_message_id, Some(original_id));
    }

    #[test]
    fn filter_by_service() {
        let filter = DeadLetterFilter {
            service_name: Some("orders".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&make_message("orders")));
        assert!(!filter.matches(&make_message("payments")));
    }

    #[test]
    fn filter_by_reprocessed_flag() {
        let filter = DeadLetterFilter {
            reprocessed: Some(true),
            ..Default::default()
        };
        let mut message = make_message("orders");
        assert!(!filter.matches(&message));
        message.reprocessed = true;
        assert!(filter.matches(&message));
    }

    #[test]
    fn filter_by_date_range() {
        let message = make_message("orders");
        let before = message.moved_to_dlq_at - chrono::Duration::minutes(1);
        let after = message.moved_to_dlq_at + chrono::Duration::minutes(1);

        let in_range = DeadLetterFilter {
            from: Some(before),
            to: Some(after),
            ..Default::default()
        };
        assert!(in_range.matches(&message));

        let out_of_range = DeadLetterFilter {
            from: Some(after),
            ..Default::default()
        };
        assert!(!out_of_range.matches(&message));
    }
}
