use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId, EventId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::error::{OutboxError, Result};
use crate::message::OutboxMessage;
use crate::repository::OutboxRepository;

const INSERT_SQL: &str = r#"
    INSERT INTO outbox_messages
        (id, event_type, payload, occurred_at, processed_at, error,
         retry_count, correlation_id, aggregate_id)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

/// PostgreSQL-backed outbox repository.
#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    /// Creates a new PostgreSQL outbox repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the workspace database migrations (all messaging tables).
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Appends a pending message inside the caller's transaction.
    ///
    /// This is the outbox pattern's write path: the event row commits or
    /// rolls back together with the state change that produced it.
    pub async fn add_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &OutboxMessage,
    ) -> Result<()> {
        bind_message(sqlx::query(INSERT_SQL), message)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        Ok(OutboxMessage {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            occurred_at: row.try_get("occurred_at")?,
            processed_at: row.try_get("processed_at")?,
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
            correlation_id: row
                .try_get::<Option<Uuid>, _>("correlation_id")?
                .map(CorrelationId::from_uuid),
            aggregate_id: row
                .try_get::<Option<Uuid>, _>("aggregate_id")?
                .map(AggregateId::from_uuid),
        })
    }
}

fn bind_message<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    message: &'q OutboxMessage,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(message.id.as_uuid())
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(message.occurred_at)
        .bind(message.processed_at)
        .bind(&message.error)
        .bind(message.retry_count)
        .bind(message.correlation_id.map(|c| c.as_uuid()))
        .bind(message.aggregate_id.map(|a| a.as_uuid()))
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn add(&self, message: OutboxMessage) -> Result<()> {
        bind_message(sqlx::query(INSERT_SQL), &message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_unprocessed(
        &self,
        max_retries: i32,
        batch_size: i64,
    ) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbox_messages
            WHERE processed_at IS NULL AND retry_count < $1
            ORDER BY occurred_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_retries)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn get_failed(&self, max_retries: i32, batch_size: i64) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbox_messages
            WHERE processed_at IS NULL AND retry_count >= $1
            ORDER BY occurred_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_retries)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn mark_processed(&self, id: EventId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET processed_at = NOW(), error = NULL WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: EventId, error: &str) -> Result<i32> {
        let retry_count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE outbox_messages
            SET retry_count = retry_count + 1, error = $2
            WHERE id = $1
            RETURNING retry_count
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        retry_count.ok_or(OutboxError::NotFound(id))
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_messages WHERE processed_at IS NOT NULL AND processed_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
