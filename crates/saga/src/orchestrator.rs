//! Saga orchestrator: drives forward execution and reverse compensation.

use chrono::Utc;

use crate::error::{Result, SagaError};
use crate::repository::SagaStateRepository;
use crate::state::{SagaState, SagaStatus, StepRecord};
use crate::step::SagaStep;

/// Orchestrates one saga type over an ordered list of steps.
///
/// Progress is persisted after every state change that follows a side
/// effect, before the next side effect runs. A crash therefore leaves a
/// state the orchestrator (or the recovery scanner) can pick up: forward
/// execution resumes from `current_step`, compensation skips steps already
/// recorded as compensated.
pub struct SagaOrchestrator<S, R> {
    steps: Vec<Box<dyn SagaStep<S>>>,
    repository: R,
}

impl<S, R> SagaOrchestrator<S, R>
where
    S: SagaState,
    R: SagaStateRepository<S>,
{
    pub fn new(repository: R) -> Self {
        Self {
            steps: Vec::new(),
            repository,
        }
    }

    /// Appends a step. Order of registration is execution order.
    pub fn add_step(mut self, step: Box<dyn SagaStep<S>>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Runs the saga forward from its current step.
    ///
    /// A `NotStarted` saga is marked `InProgress` and saved before the
    /// first side effect. On the first step failure the saga is marked
    /// `Failed`, compensation runs, and the terminal status is returned.
    /// Re-invoking on a terminal or compensating saga is an
    /// [`SagaError::InvalidStatus`].
    #[tracing::instrument(skip_all, fields(
        saga_type = S::SAGA_TYPE,
        correlation_id = %state.context().correlation_id,
    ))]
    pub async fn execute(&self, state: &mut S) -> Result<SagaStatus> {
        let status = state.context().status;
        if !status.can_execute() {
            return Err(SagaError::InvalidStatus {
                expected: "NotStarted or InProgress".to_string(),
                actual: status,
            });
        }

        metrics::counter!("saga_executions_total").increment(1);
        let started = std::time::Instant::now();

        if status == SagaStatus::NotStarted {
            let context = state.context_mut();
            context.status = SagaStatus::InProgress;
            context.touch();
            self.repository.save(state).await?;
        }

        while state.context().current_step < self.steps.len() {
            let step = &self.steps[state.context().current_step];
            tracing::info!(step = step.name(), "saga step started");

            match step.execute(state).await {
                Ok(()) => {
                    let context = state.context_mut();
                    context.completed_steps.push(StepRecord::new(step.name()));
                    context.current_step += 1;
                    context.touch();
                    self.repository.save(state).await?;
                    tracing::info!(step = step.name(), "saga step completed");
                }
                Err(e) => {
                    tracing::warn!(step = step.name(), error = %e, "saga step failed");
                    metrics::counter!("saga_step_failures_total").increment(1);

                    let step_name = step.name().to_string();
                    let context = state.context_mut();
                    context.error_message = Some(format!("{step_name}: {e}"));
                    context.status = SagaStatus::Failed;
                    context.touch();
                    self.repository.save(state).await?;

                    self.compensate(state).await?;
                    metrics::histogram!("saga_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    return Ok(state.context().status);
                }
            }
        }

        let context = state.context_mut();
        context.status = SagaStatus::Completed;
        context.completed_at = Some(Utc::now());
        context.touch();
        self.repository.save(state).await?;

        metrics::counter!("saga_completed_total").increment(1);
        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!("saga completed");
        Ok(SagaStatus::Completed)
    }

    /// Compensates completed steps in strict reverse order.
    ///
    /// Idempotent: terminal and never-started sagas are a no-op, and steps
    /// already present in `compensated_steps` are skipped, so re-running
    /// after a crash never compensates twice. A failing compensation is
    /// logged and the step is still recorded, otherwise recovery would
    /// retry it forever.
    #[tracing::instrument(skip_all, fields(
        saga_type = S::SAGA_TYPE,
        correlation_id = %state.context().correlation_id,
    ))]
    pub async fn compensate(&self, state: &mut S) -> Result<()> {
        match state.context().status {
            SagaStatus::Compensated | SagaStatus::Completed | SagaStatus::NotStarted => {
                tracing::debug!(
                    status = %state.context().status,
                    "nothing to compensate"
                );
                return Ok(());
            }
            _ => {}
        }

        if state.context().status != SagaStatus::Compensating {
            let context = state.context_mut();
            context.status = SagaStatus::Compensating;
            context.touch();
            self.repository.save(state).await?;
        }

        let pending: Vec<String> = state
            .context()
            .completed_steps
            .iter()
            .rev()
            .map(|record| record.step_name.clone())
            .filter(|name| !state.context().is_compensated(name))
            .collect();

        for step_name in pending {
            match self.steps.iter().find(|step| step.name() == step_name) {
                Some(step) => {
                    tracing::info!(step = %step_name, "compensating saga step");
                    if let Err(e) = step.compensate(state).await {
                        tracing::error!(
                            step = %step_name,
                            error = %e,
                            "compensation failed, recording and continuing"
                        );
                        metrics::counter!("saga_compensation_failures_total").increment(1);
                    }
                }
                None => {
                    tracing::error!(
                        step = %step_name,
                        "completed step not known to this orchestrator"
                    );
                }
            }

            let context = state.context_mut();
            context.compensated_steps.push(StepRecord::new(&step_name));
            context.touch();
            self.repository.save(state).await?;
        }

        let context = state.context_mut();
        context.status = SagaStatus::Compensated;
        context.completed_at = Some(Utc::now());
        context.touch();
        self.repository.save(state).await?;

        metrics::counter!("saga_compensations_total").increment(1);
        tracing::info!("saga compensated");
        Ok(())
    }
}
