//! Transactional outbox: events are appended to a durable queue in the same
//! transaction as the state change that produced them, then published
//! asynchronously by the [`OutboxPublisher`] background loop.
//!
//! This gives at-least-once delivery at the publish boundary: a row is never
//! marked processed unless the broker acknowledged the publish, and a crash
//! between the acknowledgment and the mark results in redelivery.

pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod publisher;
pub mod registry;
pub mod repository;

pub use error::{OutboxError, Result};
pub use memory::InMemoryOutboxRepository;
pub use message::OutboxMessage;
pub use postgres::PostgresOutboxRepository;
pub use publisher::{OutboxPublisher, OutboxPublisherConfig};
pub use registry::EventTypeRegistry;
pub use repository::OutboxRepository;
