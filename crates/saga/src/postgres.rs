use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{Result, SagaError};
use crate::repository::SagaStateRepository;
use crate::state::{SagaState, SagaStatus};

/// Postgres-backed saga repository.
///
/// The concrete state is stored as one JSONB document; status, step and
/// timestamp columns are promoted out of it so the recovery scanner's
/// selection runs as a plain indexed query. Optimistic concurrency uses a
/// version column: updates are conditional on the loaded version, inserts
/// only accept a version of 0.
pub struct PostgresSagaRepository<S> {
    pool: PgPool,
    _marker: PhantomData<fn() -> S>,
}

impl<S> PostgresSagaRepository<S> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    /// Runs the bundled schema migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

impl<S> Clone for PostgresSagaRepository<S> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _marker: PhantomData,
        }
    }
}

fn row_to_state<S: SagaState>(row: &PgRow) -> Result<S> {
    let state: serde_json::Value = row.try_get("state").map_err(SagaError::Database)?;
    Ok(serde_json::from_value(state)?)
}

#[async_trait]
impl<S: SagaState> SagaStateRepository<S> for PostgresSagaRepository<S> {
    async fn get_by_correlation_id(&self, correlation_id: CorrelationId) -> Result<Option<S>> {
        let row = sqlx::query(
            "SELECT state FROM saga_states WHERE correlation_id = $1 AND saga_type = $2",
        )
        .bind(correlation_id.as_uuid())
        .bind(S::SAGA_TYPE)
        .fetch_optional(&self.pool)
        .await
        .map_err(SagaError::Database)?;

        row.as_ref().map(row_to_state).transpose()
    }

    async fn save(&self, state: &mut S) -> Result<()> {
        let loaded_version = state.context().version;
        let correlation_id = state.context().correlation_id;

        // Serialize with the post-save version so the stored document and
        // the version column stay in step.
        state.context_mut().version = loaded_version + 1;
        let document = match serde_json::to_value(&*state) {
            Ok(document) => document,
            Err(e) => {
                state.context_mut().version = loaded_version;
                return Err(SagaError::Serialization(e));
            }
        };
        let context = state.context();

        let result = if loaded_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO saga_states
                    (correlation_id, saga_type, status, current_step, created_at,
                     updated_at, completed_at, error_message, state, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (correlation_id) DO NOTHING
                "#,
            )
            .bind(correlation_id.as_uuid())
            .bind(S::SAGA_TYPE)
            .bind(context.status.as_str())
            .bind(context.current_step as i64)
            .bind(context.created_at)
            .bind(context.updated_at)
            .bind(context.completed_at)
            .bind(&context.error_message)
            .bind(&document)
            .bind(context.version)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE saga_states
                SET status = $3, current_step = $4, updated_at = $5,
                    completed_at = $6, error_message = $7, state = $8,
                    version = $9
                WHERE correlation_id = $1 AND saga_type = $2 AND version = $10
                "#,
            )
            .bind(correlation_id.as_uuid())
            .bind(S::SAGA_TYPE)
            .bind(context.status.as_str())
            .bind(context.current_step as i64)
            .bind(context.updated_at)
            .bind(context.completed_at)
            .bind(&context.error_message)
            .bind(&document)
            .bind(context.version)
            .bind(loaded_version)
            .execute(&self.pool)
            .await
        };

        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(()),
            Ok(_) => {
                state.context_mut().version = loaded_version;
                Err(SagaError::ConcurrencyConflict(correlation_id))
            }
            Err(e) => {
                state.context_mut().version = loaded_version;
                Err(SagaError::Database(e))
            }
        }
    }

    async fn get_timed_out(&self, stale_before: DateTime<Utc>) -> Result<Vec<S>> {
        let rows = sqlx::query(
            r#"
            SELECT state
            FROM saga_states
            WHERE saga_type = $1 AND status = $2 AND updated_at < $3
            ORDER BY updated_at ASC
            "#,
        )
        .bind(S::SAGA_TYPE)
        .bind(SagaStatus::InProgress.as_str())
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await
        .map_err(SagaError::Database)?;

        rows.iter().map(row_to_state).collect()
    }
}
