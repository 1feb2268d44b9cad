//! Shared types for the messaging reliability core.
//!
//! Every other crate in the workspace builds on the identifier newtypes and
//! the [`EventEnvelope`] wire unit defined here.

pub mod envelope;
pub mod ids;

pub use envelope::{DomainEvent, EventEnvelope};
pub use ids::{AggregateId, CorrelationId, EventId};
