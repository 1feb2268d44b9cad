use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::orchestrator::SagaOrchestrator;
use crate::repository::SagaStateRepository;
use crate::state::SagaState;

/// Tuning knobs for the recovery scanner.
#[derive(Debug, Clone)]
pub struct RecoveryScannerConfig {
    /// Grace period after startup before the first scan, so in-flight
    /// sagas from a rolling restart are not compensated prematurely.
    pub startup_delay: Duration,
    /// Time between scans.
    pub scan_interval: Duration,
    /// An `InProgress` saga whose `updated_at` is older than this is
    /// considered stuck.
    pub stuck_timeout: Duration,
}

impl Default for RecoveryScannerConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(60),
            scan_interval: Duration::from_secs(300),
            stuck_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Background scanner that compensates sagas stuck `InProgress`.
///
/// A saga gets stuck when its owning process crashed between steps. The
/// scanner finds rows whose `updated_at` went stale past the timeout and
/// runs compensation on each. There is no cross-instance claim on rows:
/// two replicas may pick up the same saga, which is safe because
/// compensation is idempotent and versioned saves make one of the two
/// writers lose.
pub struct RecoveryScanner<S, R> {
    orchestrator: Arc<SagaOrchestrator<S, R>>,
    repository: R,
    config: RecoveryScannerConfig,
}

impl<S, R> RecoveryScanner<S, R>
where
    S: SagaState,
    R: SagaStateRepository<S>,
{
    pub fn new(orchestrator: Arc<SagaOrchestrator<S, R>>, repository: R) -> Self {
        Self {
            orchestrator,
            repository,
            config: RecoveryScannerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RecoveryScannerConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            saga_type = S::SAGA_TYPE,
            startup_delay_s = self.config.startup_delay.as_secs(),
            scan_interval_s = self.config.scan_interval.as_secs(),
            stuck_timeout_s = self.config.stuck_timeout.as_secs(),
            "saga recovery scanner started"
        );

        tokio::select! {
            _ = tokio::time::sleep(self.config.startup_delay) => {}
            _ = shutdown.changed() => {
                tracing::info!("saga recovery scanner shutting down");
                return;
            }
        }

        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "saga recovery scan failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("saga recovery scanner shutting down");
                    return;
                }
            }
        }
    }

    /// Scans once. Returns the number of stuck sagas compensated.
    ///
    /// A failure on one saga is logged and counted but never aborts the
    /// rest of the batch.
    #[tracing::instrument(skip(self), fields(saga_type = S::SAGA_TYPE))]
    pub async fn run_once(&self) -> Result<usize> {
        let stale_before = Utc::now()
            - chrono::Duration::from_std(self.config.stuck_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let stuck = self.repository.get_timed_out(stale_before).await?;

        if stuck.is_empty() {
            return Ok(0);
        }
        tracing::warn!(count = stuck.len(), "found stuck sagas, compensating");

        let mut recovered = 0;
        for mut state in stuck {
            let correlation_id = state.context().correlation_id;
            match self.orchestrator.compensate(&mut state).await {
                Ok(()) => {
                    metrics::counter!("saga_recoveries_total").increment(1);
                    tracing::info!(%correlation_id, "stuck saga compensated");
                    recovered += 1;
                }
                Err(e) => {
                    metrics::counter!("saga_recovery_failures_total").increment(1);
                    tracing::error!(
                        %correlation_id,
                        error = %e,
                        "failed to compensate stuck saga"
                    );
                }
            }
        }
        Ok(recovered)
    }
}
