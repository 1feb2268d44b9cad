//! Dead letter queue: terminal storage for messages that exhausted their
//! retry budget on either the outbox or inbox side.
//!
//! The coordination contract is "never lose the failed payload", not
//! "always auto-heal": escalation always succeeds from the caller's point
//! of view, and actual re-delivery on reprocess is a hook each owning
//! service overrides.

pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod repository;
pub mod service;

pub use error::{DeadLetterError, Result};
pub use memory::InMemoryDeadLetterRepository;
pub use message::{DeadLetterFilter, DeadLetterMessage, DeadLetterStats};
pub use postgres::PostgresDeadLetterRepository;
pub use repository::{DeadLetterPage, DeadLetterRepository};
pub use service::{DeadLetterService, ReprocessHook};
