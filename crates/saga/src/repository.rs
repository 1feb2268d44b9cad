use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;

use crate::error::Result;
use crate::state::SagaState;

/// Persistence for one saga type's states.
///
/// Saves are optimistic: the caller's in-memory `version` must match the
/// stored one, otherwise the save fails with
/// [`SagaError::ConcurrencyConflict`](crate::SagaError::ConcurrencyConflict)
/// and the caller reloads. A successful save bumps the version both in
/// storage and on the passed state.
#[async_trait]
pub trait SagaStateRepository<S: SagaState>: Send + Sync {
    async fn get_by_correlation_id(&self, correlation_id: CorrelationId) -> Result<Option<S>>;

    async fn save(&self, state: &mut S) -> Result<()>;

    /// Sagas still `InProgress` whose `updated_at` is older than the
    /// cutoff. Feeds the recovery scanner.
    async fn get_timed_out(&self, stale_before: DateTime<Utc>) -> Result<Vec<S>>;
}
