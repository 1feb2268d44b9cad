use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::EventEnvelope;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors surfaced by event handlers and the dispatcher.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload could not be deserialized into the handler's event type.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The handler's domain logic failed.
    #[error("Handler failed: {0}")]
    Failed(String),
}

/// A consumer-side event handler.
///
/// `handle` may return a serializable result; the idempotency decorator
/// caches it so redundant deliveries can answer without recomputation.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Logical handler name. Used as the inbox consumer name and in the
    /// idempotency key, so it must be stable across deployments.
    fn name(&self) -> &str;

    /// Processes one delivered envelope.
    async fn handle(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Option<serde_json::Value>, HandlerError>;
}

#[async_trait]
impl<T: EventHandler + ?Sized> EventHandler for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn handle(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Option<serde_json::Value>, HandlerError> {
        (**self).handle(envelope).await
    }
}

/// Adapts a typed async closure into an [`EventHandler`].
///
/// Deserializes the envelope payload into `T` before invoking the closure;
/// a payload that does not decode is an error (the caller must not commit
/// the offset for it).
pub struct TypedHandler<T, F> {
    name: String,
    handler: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> TypedHandler<T, F> {
    /// Creates a typed handler with the given stable name.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> EventHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send + Sync,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<serde_json::Value>, HandlerError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Option<serde_json::Value>, HandlerError> {
        let event: T = envelope.deserialize_payload()?;
        (self.handler)(event).await
    }
}

/// Outcome of a dispatch.
#[derive(Debug)]
pub enum Dispatch {
    /// A handler was registered and ran successfully.
    Handled(Option<serde_json::Value>),

    /// No handler is registered for the event type. Not an error: this is
    /// how optional or future event types are ignored safely.
    Unhandled,
}

/// In-process router from a wire event-type string to one registered handler.
///
/// The mapping is resolved once at startup and then shared immutably;
/// registration order must be deterministic because the last registration
/// for a type wins.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event type.
    ///
    /// Re-registering the same type logs a warning and replaces the prior
    /// handler.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        if let Some(previous) = self.handlers.insert(event_type.clone(), handler) {
            tracing::warn!(
                event_type,
                previous_handler = previous.name(),
                "replacing previously registered event handler"
            );
        }
    }

    /// Registers a typed async closure for an event type.
    ///
    /// Convenience wrapper around [`TypedHandler`]: the envelope payload is
    /// deserialized into `T` before the closure runs.
    pub fn register_typed<T, F, Fut>(
        &mut self,
        event_type: impl Into<String>,
        name: impl Into<String>,
        handler: F,
    ) where
        T: DeserializeOwned + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<serde_json::Value>, HandlerError>> + Send + 'static,
    {
        self.register(event_type, Arc::new(TypedHandler::new(name, handler)));
    }

    /// Returns true if a handler is registered for the event type.
    pub fn is_registered(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Routes an envelope to the handler registered for its event type.
    ///
    /// Unknown event types are logged and dropped (`Dispatch::Unhandled`).
    /// Deserialization failures and handler errors propagate so the calling
    /// consumer does not acknowledge the message.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> Result<Dispatch, HandlerError> {
        let Some(handler) = self.handlers.get(&envelope.event_type) else {
            tracing::debug!(
                event_type = %envelope.event_type,
                event_id = %envelope.event_id,
                "no handler registered, dropping event"
            );
            return Ok(Dispatch::Unhandled);
        };

        let result = handler.handle(envelope).await?;
        Ok(Dispatch::Handled(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::EventId;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize)]
    struct PaymentCaptured {
        amount_cents: i64,
    }

    fn make_envelope(event_type: &str, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope::new(EventId::new(), event_type, Utc::now(), payload)
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        Arc::new(TypedHandler::new(
            "PaymentHandler",
            move |event: PaymentCaptured| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(serde_json::json!({"charged": event.amount_cents})))
                }
            },
        ))
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register("PaymentCaptured", counting_handler(Arc::clone(&counter)));

        let envelope = make_envelope("PaymentCaptured", serde_json::json!({"amount_cents": 500}));
        let dispatch = dispatcher.dispatch(&envelope).await.unwrap();

        assert!(matches!(dispatch, Dispatch::Handled(Some(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_typed_wraps_a_closure() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_typed(
            "PaymentCaptured",
            "PaymentHandler",
            |event: PaymentCaptured| async move {
                Ok(Some(serde_json::json!({"charged": event.amount_cents})))
            },
        );
        assert!(dispatcher.is_registered("PaymentCaptured"));

        let envelope = make_envelope("PaymentCaptured", serde_json::json!({"amount_cents": 250}));
        let dispatch = dispatcher.dispatch(&envelope).await.unwrap();
        let Dispatch::Handled(Some(result)) = dispatch else {
            panic!("expected a handled result");
        };
        assert_eq!(result["charged"], 250);
    }

    #[tokio::test]
    async fn unknown_event_type_is_not_an_error() {
        let dispatcher = EventDispatcher::new();
        let envelope = make_envelope("SomethingNew", serde_json::json!({}));

        let dispatch = dispatcher.dispatch(&envelope).await.unwrap();
        assert!(matches!(dispatch, Dispatch::Unhandled));
    }

    #[tokio::test]
    async fn deserialization_failure_propagates() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register("PaymentCaptured", counting_handler(Arc::clone(&counter)));

        let envelope = make_envelope(
            "PaymentCaptured",
            serde_json::json!({"amount_cents": "not a number"}),
        );
        let result = dispatcher.dispatch(&envelope).await;

        assert!(matches!(result, Err(HandlerError::Deserialization(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_propagates() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(
            "PaymentCaptured",
            Arc::new(TypedHandler::new(
                "PaymentHandler",
                |_event: PaymentCaptured| async {
                    Err(HandlerError::Failed("card declined".to_string()))
                },
            )),
        );

        let envelope = make_envelope("PaymentCaptured", serde_json::json!({"amount_cents": 500}));
        let result = dispatcher.dispatch(&envelope).await;
        assert!(matches!(result, Err(HandlerError::Failed(_))));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register("PaymentCaptured", counting_handler(Arc::clone(&first)));
        dispatcher.register("PaymentCaptured", counting_handler(Arc::clone(&second)));
        assert_eq!(dispatcher.handler_count(), 1);

        let envelope = make_envelope("PaymentCaptured", serde_json::json!({"amount_cents": 500}));
        dispatcher.dispatch(&envelope).await.unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
