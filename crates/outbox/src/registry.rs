use std::collections::HashMap;

use serde::de::DeserializeOwned;

type DecodeCheck = Box<dyn Fn(&serde_json::Value) -> Result<(), serde_json::Error> + Send + Sync>;

/// Registry of the event types a producer is allowed to publish.
///
/// The publisher refuses to put a payload on the wire unless the type is
/// registered and its payload decodes into the concrete event type. Unknown
/// or undecodable rows are logged and retried, never silently dropped: a
/// deploy that forgets a registration is an operational error, not data
/// loss.
#[derive(Default)]
pub struct EventTypeRegistry {
    checks: HashMap<String, DecodeCheck>,
}

impl EventTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a concrete event type under its wire name.
    pub fn register<T: DeserializeOwned>(&mut self, event_type: impl Into<String>) {
        let event_type = event_type.into();
        if self
            .checks
            .insert(
                event_type.clone(),
                Box::new(|payload| serde_json::from_value::<T>(payload.clone()).map(|_| ())),
            )
            .is_some()
        {
            tracing::warn!(event_type, "replacing registered event type");
        }
    }

    /// Returns true if the event type is registered.
    pub fn is_registered(&self, event_type: &str) -> bool {
        self.checks.contains_key(event_type)
    }

    /// Returns the number of registered event types.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns true if no event types are registered.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Verifies a payload decodes into the registered concrete type.
    ///
    /// `None` means the event type is unknown.
    pub fn check(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Option<Result<(), serde_json::Error>> {
        self.checks.get(event_type).map(|check| check(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct OrderPlaced {
        #[allow(dead_code)]
        order_total_cents: i64,
    }

    #[test]
    fn registered_type_with_valid_payload() {
        let mut registry = EventTypeRegistry::new();
        registry.register::<OrderPlaced>("OrderPlaced");

        assert!(registry.is_registered("OrderPlaced"));
        let result = registry
            .check("OrderPlaced", &serde_json::json!({"order_total_cents": 100}))
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn invalid_payload_fails_the_check() {
        let mut registry = EventTypeRegistry::new();
        registry.register::<OrderPlaced>("OrderPlaced");

        let result = registry
            .check("OrderPlaced", &serde_json::json!({"order_total_cents": "x"}))
            .unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn unknown_type_is_none() {
        let registry = EventTypeRegistry::new();
        assert!(registry.check("Mystery", &serde_json::json!({})).is_none());
        assert!(!registry.is_registered("Mystery"));
    }
}
