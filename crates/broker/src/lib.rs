//! Broker collaborator contract and event dispatch.
//!
//! The messaging core never talks to a concrete broker directly: producers
//! publish through [`BrokerClient`] and consumers receive through
//! [`BrokerConsumer`] with manual offset commits. [`InMemoryBroker`]
//! implements both for tests, including redelivery of uncommitted messages.
//!
//! [`EventDispatcher`] is the in-process router mapping a wire event-type
//! string to one registered, strongly-typed handler.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod memory;

pub use client::{BrokerClient, BrokerConsumer, Delivery};
pub use dispatcher::{Dispatch, EventDispatcher, EventHandler, HandlerError, TypedHandler};
pub use error::{BrokerError, Result};
pub use memory::{InMemoryBroker, InMemoryConsumer};
