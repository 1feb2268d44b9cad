//! Saga orchestration for multi-step distributed transactions.
//!
//! A saga is an ordered list of steps, each with a compensating action.
//! The orchestrator persists progress after every side effect, so a crash
//! mid-saga leaves a resumable record instead of a half-applied
//! transaction. If a step fails, previously completed steps are
//! compensated in reverse order.
//!
//! Sagas that crash while `InProgress` and are never resumed are picked up
//! by the [`RecoveryScanner`], which compensates anything stuck past a
//! timeout.

pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod postgres;
pub mod recovery;
pub mod repository;
pub mod state;
pub mod step;

pub use error::{Result, SagaError};
pub use memory::InMemorySagaRepository;
pub use orchestrator::SagaOrchestrator;
pub use postgres::PostgresSagaRepository;
pub use recovery::{RecoveryScanner, RecoveryScannerConfig};
pub use repository::SagaStateRepository;
pub use state::{SagaContext, SagaState, SagaStatus, StepRecord};
pub use step::{SagaStep, StepError};
