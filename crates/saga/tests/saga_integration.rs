//! Order-creation saga scenarios over the in-memory repository: forward
//! execution, reverse compensation, resume, and stuck-saga recovery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::CorrelationId;
use saga::{
    InMemorySagaRepository, RecoveryScanner, RecoveryScannerConfig, SagaContext, SagaError,
    SagaOrchestrator, SagaState, SagaStateRepository, SagaStatus, SagaStep, StepError,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderCreationSaga {
    context: SagaContext,
    stock_reserved: bool,
    payment_charged: bool,
    shipment_created: bool,
}

impl OrderCreationSaga {
    fn new() -> Self {
        Self {
            context: SagaContext::new(CorrelationId::new()),
            stock_reserved: false,
            payment_charged: false,
            shipment_created: false,
        }
    }
}

impl SagaState for OrderCreationSaga {
    const SAGA_TYPE: &'static str = "OrderCreation";

    fn context(&self) -> &SagaContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut SagaContext {
        &mut self.context
    }
}

struct ReserveStock;

#[async_trait]
impl SagaStep<OrderCreationSaga> for ReserveStock {
    fn name(&self) -> &str {
        "ReserveStock"
    }

    async fn execute(&self, state: &mut OrderCreationSaga) -> Result<(), StepError> {
        state.stock_reserved = true;
        Ok(())
    }

    async fn compensate(&self, state: &mut OrderCreationSaga) -> Result<(), StepError> {
        state.stock_reserved = false;
        Ok(())
    }
}

struct ChargePayment {
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl SagaStep<OrderCreationSaga> for ChargePayment {
    fn name(&self) -> &str {
        "ChargePayment"
    }

    async fn execute(&self, state: &mut OrderCreationSaga) -> Result<(), StepError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StepError::new("card declined"));
        }
        state.payment_charged = true;
        Ok(())
    }

    async fn compensate(&self, state: &mut OrderCreationSaga) -> Result<(), StepError> {
        state.payment_charged = false;
        Ok(())
    }
}

struct CreateShipment;

#[async_trait]
impl SagaStep<OrderCreationSaga> for CreateShipment {
    fn name(&self) -> &str {
        "CreateShipment"
    }

    async fn execute(&self, state: &mut OrderCreationSaga) -> Result<(), StepError> {
        state.shipment_created = true;
        Ok(())
    }

    async fn compensate(&self, state: &mut OrderCreationSaga) -> Result<(), StepError> {
        state.shipment_created = false;
        Ok(())
    }
}

type Repo = InMemorySagaRepository<OrderCreationSaga>;

fn orchestrator(repo: Repo, fail_payment: Arc<AtomicBool>) -> SagaOrchestrator<OrderCreationSaga, Repo> {
    SagaOrchestrator::new(repo)
        .add_step(Box::new(ReserveStock))
        .add_step(Box::new(ChargePayment { fail: fail_payment }))
        .add_step(Box::new(CreateShipment))
}

fn step_names(records: &[saga::StepRecord]) -> Vec<&str> {
    records.iter().map(|r| r.step_name.as_str()).collect()
}

#[tokio::test]
async fn happy_path_completes_all_steps_in_order() {
    let repo = Repo::new();
    let orchestrator = orchestrator(repo.clone(), Arc::new(AtomicBool::new(false)));
    let mut state = OrderCreationSaga::new();

    let status = orchestrator.execute(&mut state).await.unwrap();

    assert_eq!(status, SagaStatus::Completed);
    assert!(state.stock_reserved && state.payment_charged && state.shipment_created);
    assert_eq!(
        step_names(&state.context.completed_steps),
        vec!["ReserveStock", "ChargePayment", "CreateShipment"]
    );
    assert!(state.context.compensated_steps.is_empty());
    assert!(state.context.completed_at.is_some());

    let persisted = repo
        .get_by_correlation_id(state.context.correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.context.status, SagaStatus::Completed);
    // InProgress save + 3 step saves + completion save.
    assert_eq!(persisted.context.version, 5);
}

#[tokio::test]
async fn failure_at_step_two_compensates_step_one_in_reverse() {
    let repo = Repo::new();
    let orchestrator = orchestrator(repo.clone(), Arc::new(AtomicBool::new(true)));
    let mut state = OrderCreationSaga::new();

    let status = orchestrator.execute(&mut state).await.unwrap();

    assert_eq!(status, SagaStatus::Compensated);
    assert!(!state.stock_reserved);
    assert!(!state.payment_charged);
    assert_eq!(step_names(&state.context.completed_steps), vec!["ReserveStock"]);
    assert_eq!(
        step_names(&state.context.compensated_steps),
        vec!["ReserveStock"]
    );
    let error = state.context.error_message.as_deref().unwrap();
    assert!(error.contains("ChargePayment"));
    assert!(error.contains("card declined"));
}

#[tokio::test]
async fn rerunning_a_terminal_saga_is_rejected() {
    let repo = Repo::new();
    let orchestrator = orchestrator(repo, Arc::new(AtomicBool::new(false)));
    let mut state = OrderCreationSaga::new();

    orchestrator.execute(&mut state).await.unwrap();
    let err = orchestrator.execute(&mut state).await.unwrap_err();
    assert!(matches!(
        err,
        SagaError::InvalidStatus {
            actual: SagaStatus::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn compensate_is_idempotent() {
    let repo = Repo::new();
    let orchestrator = orchestrator(repo, Arc::new(AtomicBool::new(true)));
    let mut state = OrderCreationSaga::new();

    orchestrator.execute(&mut state).await.unwrap();
    assert_eq!(state.context.compensated_steps.len(), 1);

    // Already Compensated: a second call must not add records.
    orchestrator.compensate(&mut state).await.unwrap();
    assert_eq!(state.context.compensated_steps.len(), 1);
    assert_eq!(state.context.status, SagaStatus::Compensated);

    // And a never-started saga has nothing to undo.
    let mut fresh = OrderCreationSaga::new();
    orchestrator.compensate(&mut fresh).await.unwrap();
    assert_eq!(fresh.context.status, SagaStatus::NotStarted);
}

#[tokio::test]
async fn resume_skips_the_completed_prefix() {
    let repo = Repo::new();
    let fail_payment = Arc::new(AtomicBool::new(false));
    let orchestrator = orchestrator(repo.clone(), Arc::clone(&fail_payment));

    // Simulate a crash after step one: InProgress, current_step = 1.
    let mut state = OrderCreationSaga::new();
    state.context.status = SagaStatus::InProgress;
    state.context.current_step = 1;
    state.stock_reserved = true;
    state
        .context
        .completed_steps
        .push(saga::StepRecord::new("ReserveStock"));
    repo.save(&mut state).await.unwrap();

    let status = orchestrator.execute(&mut state).await.unwrap();

    assert_eq!(status, SagaStatus::Completed);
    // ReserveStock ran before the crash and must not run again.
    assert_eq!(
        step_names(&state.context.completed_steps),
        vec!["ReserveStock", "ChargePayment", "CreateShipment"]
    );
}

#[tokio::test]
async fn stale_writer_gets_a_concurrency_conflict() {
    let repo = Repo::new();
    let orchestrator = orchestrator(repo.clone(), Arc::new(AtomicBool::new(false)));

    let mut state = OrderCreationSaga::new();
    repo.save(&mut state).await.unwrap();

    let stale = repo
        .get_by_correlation_id(state.context.correlation_id)
        .await
        .unwrap()
        .unwrap();

    // The winner completes the saga, bumping the stored version.
    orchestrator.execute(&mut state).await.unwrap();

    let mut loser = stale;
    let err = orchestrator.execute(&mut loser).await.unwrap_err();
    assert!(matches!(err, SagaError::ConcurrencyConflict(_)));
}

#[tokio::test]
async fn recovery_scanner_compensates_stuck_sagas() {
    let repo = Repo::new();
    let orchestrator = Arc::new(orchestrator(repo.clone(), Arc::new(AtomicBool::new(false))));

    // A saga that stalled after its first step, 45 minutes ago.
    let mut stuck = OrderCreationSaga::new();
    stuck.context.status = SagaStatus::InProgress;
    stuck.context.current_step = 1;
    stuck.stock_reserved = true;
    stuck
        .context
        .completed_steps
        .push(saga::StepRecord::new("ReserveStock"));
    stuck.context.updated_at = Utc::now() - chrono::Duration::minutes(45);
    repo.save(&mut stuck).await.unwrap();

    // A healthy in-progress saga that must be left alone.
    let mut healthy = OrderCreationSaga::new();
    healthy.context.status = SagaStatus::InProgress;
    repo.save(&mut healthy).await.unwrap();

    let scanner = RecoveryScanner::new(Arc::clone(&orchestrator), repo.clone()).with_config(
        RecoveryScannerConfig {
            startup_delay: Duration::from_millis(1),
            scan_interval: Duration::from_millis(10),
            stuck_timeout: Duration::from_secs(30 * 60),
        },
    );

    let recovered = scanner.run_once().await.unwrap();
    assert_eq!(recovered, 1);

    let compensated = repo
        .get_by_correlation_id(stuck.context.correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(compensated.context.status, SagaStatus::Compensated);
    assert!(!compensated.stock_reserved);
    assert_eq!(
        step_names(&compensated.context.compensated_steps),
        vec!["ReserveStock"]
    );

    let untouched = repo
        .get_by_correlation_id(healthy.context.correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.context.status, SagaStatus::InProgress);

    // Nothing left to recover on the next pass.
    assert_eq!(scanner.run_once().await.unwrap(), 0);
}

#[tokio::test]
async fn compensation_failure_is_recorded_and_does_not_stall() {
    struct BrokenUndo;

    #[async_trait]
    impl SagaStep<OrderCreationSaga> for BrokenUndo {
        fn name(&self) -> &str {
            "BrokenUndo"
        }

        async fn execute(&self, _state: &mut OrderCreationSaga) -> Result<(), StepError> {
            Ok(())
        }

        async fn compensate(&self, _state: &mut OrderCreationSaga) -> Result<(), StepError> {
            Err(StepError::new("undo endpoint gone"))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl SagaStep<OrderCreationSaga> for AlwaysFails {
        fn name(&self) -> &str {
            "AlwaysFails"
        }

        async fn execute(&self, _state: &mut OrderCreationSaga) -> Result<(), StepError> {
            Err(StepError::new("boom"))
        }

        async fn compensate(&self, _state: &mut OrderCreationSaga) -> Result<(), StepError> {
            Ok(())
        }
    }

    let repo = Repo::new();
    let orchestrator = SagaOrchestrator::new(repo.clone())
        .add_step(Box::new(BrokenUndo))
        .add_step(Box::new(AlwaysFails));

    let mut state = OrderCreationSaga::new();
    let status = orchestrator.execute(&mut state).await.unwrap();

    // The broken compensation is recorded anyway so recovery never loops
    // on it, and the saga still reaches its terminal status.
    assert_eq!(status, SagaStatus::Compensated);
    assert_eq!(
        step_names(&state.context.compensated_steps),
        vec!["BrokenUndo"]
    );
}
