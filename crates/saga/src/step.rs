use async_trait::async_trait;
use thiserror::Error;

/// Failure of a forward or compensating step action.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct StepError {
    reason: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StepError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn with_source(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// One step of a saga: a forward action plus its compensating action.
///
/// `compensate` must be idempotent and tolerate a forward action that only
/// partially applied: the orchestrator invokes it after failures and during
/// crash recovery, where it cannot know how far `execute` got.
#[async_trait]
pub trait SagaStep<S>: Send + Sync {
    /// Stable step name; recorded in the saga's step histories.
    fn name(&self) -> &str;

    /// Performs the step's side effect, updating the saga state.
    async fn execute(&self, state: &mut S) -> Result<(), StepError>;

    /// Rolls the step's side effect back.
    async fn compensate(&self, state: &mut S) -> Result<(), StepError>;
}
