//! Consumer-side delivery tracking.
//!
//! Incoming events are recorded in an inbox keyed by `(event_id, consumer)`
//! before the business handler runs, which turns the broker's at-least-once
//! delivery into effectively-once processing. Two decorators wrap any
//! [`broker::EventHandler`]: [`InboxHandler`] for durable dedup plus
//! dead-letter escalation, and [`IdempotentHandler`] for a lighter TTL-based
//! result cache. [`EventConsumer`] drives the broker subscription and only
//! commits offsets after successful dispatch.

pub mod consumer;
pub mod decorator;
pub mod error;
pub mod idempotency;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod repository;

pub use consumer::{EventConsumer, EventConsumerConfig};
pub use decorator::InboxHandler;
pub use error::InboxError;
pub use idempotency::{
    IdempotencyRecord, IdempotencyStore, IdempotentHandler, InMemoryIdempotencyStore,
};
pub use memory::InMemoryInboxRepository;
pub use message::InboxMessage;
pub use postgres::PostgresInboxRepository;
pub use repository::InboxRepository;
