//! Saga state machine.

use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// The status of a saga in its lifecycle.
///
/// Status transitions:
/// ```text
/// NotStarted ──► InProgress ──┬──► Completed
///                             └──► Failed ──► Compensating ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Saga has not started yet.
    #[default]
    NotStarted,

    /// Saga steps are being executed.
    InProgress,

    /// All steps completed successfully (terminal).
    Completed,

    /// A step failed; compensation has not finished yet.
    Failed,

    /// Compensating transactions are running in reverse order.
    Compensating,

    /// Compensation finished after a failure (terminal).
    Compensated,
}

impl SagaStatus {
    /// Returns true if forward execution may run (or resume).
    pub fn can_execute(&self) -> bool {
        matches!(self, SagaStatus::NotStarted | SagaStatus::InProgress)
    }

    /// Returns true if compensation may run.
    pub fn can_compensate(&self) -> bool {
        matches!(
            self,
            SagaStatus::InProgress | SagaStatus::Failed | SagaStatus::Compensating
        )
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::NotStarted => "NotStarted",
            SagaStatus::InProgress => "InProgress",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded forward or compensating step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_name: String,
    pub at: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            at: Utc::now(),
        }
    }
}

/// The generic, persisted portion of every saga state.
///
/// `completed_steps` and `compensated_steps` are append-only histories:
/// a step name lands in `completed_steps` only after its forward action
/// succeeded and the state was saved, and in `compensated_steps` once its
/// rollback was attempted (successful or not).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaContext {
    pub correlation_id: CorrelationId,
    pub status: SagaStatus,
    pub current_step: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub completed_steps: Vec<StepRecord>,
    pub compensated_steps: Vec<StepRecord>,
    /// Optimistic concurrency token. 0 means never persisted; the
    /// repository bumps it on every successful save.
    pub version: i64,
}

impl SagaContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            status: SagaStatus::NotStarted,
            current_step: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            completed_steps: Vec::new(),
            compensated_steps: Vec::new(),
            version: 0,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Returns true if the named step already has a compensation record.
    pub fn is_compensated(&self, step_name: &str) -> bool {
        self.compensated_steps
            .iter()
            .any(|record| record.step_name == step_name)
    }
}

/// A concrete saga's persisted state.
///
/// Implementors embed a [`SagaContext`] next to their domain fields;
/// the whole state is serialized as one JSON document per saga.
pub trait SagaState: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Stable saga type name, e.g. `"OrderCreation"`. Persisted alongside
    /// the state so repositories can scope queries per saga type.
    const SAGA_TYPE: &'static str;

    fn context(&self) -> &SagaContext;

    fn context_mut(&mut self) -> &mut SagaContext;
}
