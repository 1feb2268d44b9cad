use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::repository::SagaStateRepository;
use crate::state::{SagaState, SagaStatus};

/// In-memory saga repository for tests and single-process setups.
pub struct InMemorySagaRepository<S> {
    states: Arc<RwLock<HashMap<CorrelationId, S>>>,
}

impl<S> InMemorySagaRepository<S> {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn saga_count(&self) -> usize {
        self.states.read().await.len()
    }
}

impl<S> Default for InMemorySagaRepository<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for InMemorySagaRepository<S> {
    fn clone(&self) -> Self {
        Self {
            states: Arc::clone(&self.states),
        }
    }
}

#[async_trait]
impl<S: SagaState> SagaStateRepository<S> for InMemorySagaRepository<S> {
    async fn get_by_correlation_id(&self, correlation_id: CorrelationId) -> Result<Option<S>> {
        Ok(self.states.read().await.get(&correlation_id).cloned())
    }

    async fn save(&self, state: &mut S) -> Result<()> {
        let correlation_id = state.context().correlation_id;
        let mut states = self.states.write().await;

        let stored_version = states
            .get(&correlation_id)
            .map(|stored| stored.context().version)
            .unwrap_or(0);
        if state.context().version != stored_version {
            return Err(SagaError::ConcurrencyConflict(correlation_id));
        }

        state.context_mut().version += 1;
        states.insert(correlation_id, state.clone());
        Ok(())
    }

    async fn get_timed_out(&self, stale_before: DateTime<Utc>) -> Result<Vec<S>> {
        Ok(self
            .states
            .read()
            .await
            .values()
            .filter(|state| {
                let context = state.context();
                context.status == SagaStatus::InProgress && context.updated_at < stale_before
            })
            .cloned()
            .collect())
    }
}
