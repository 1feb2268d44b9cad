use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, EventId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::InboxError;
use crate::message::InboxMessage;
use crate::repository::InboxRepository;

const SELECT_COLUMNS: &str = "id, event_id, consumer, event_type, payload, received_at, \
     processed_at, error, processing_attempts, correlation_id";

/// Postgres-backed inbox. Dedup relies on the `unique_event_consumer`
/// constraint on `(event_id, consumer)`.
#[derive(Clone)]
pub struct PostgresInboxRepository {
    pool: PgPool,
}

impl PostgresInboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &PgRow) -> Result<InboxMessage, sqlx::Error> {
    Ok(InboxMessage {
        id: row.try_get("id")?,
        event_id: EventId::from_uuid(row.try_get("event_id")?),
        consumer: row.try_get("consumer")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        received_at: row.try_get("received_at")?,
        processed_at: row.try_get("processed_at")?,
        error: row.try_get("error")?,
        processing_attempts: row.try_get("processing_attempts")?,
        correlation_id: row
            .try_get::<Option<Uuid>, _>("correlation_id")?
            .map(CorrelationId::from_uuid),
    })
}

#[async_trait]
impl InboxRepository for PostgresInboxRepository {
    async fn add_if_absent(&self, message: &InboxMessage) -> Result<bool, InboxError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbox_messages
                (id, event_id, consumer, event_type, payload, received_at,
                 processed_at, error, processing_attempts, correlation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT ON CONSTRAINT unique_event_consumer DO NOTHING
            "#,
        )
        .bind(message.id)
        .bind(message.event_id.as_uuid())
        .bind(&message.consumer)
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(message.received_at)
        .bind(message.processed_at)
        .bind(&message.error)
        .bind(message.processing_attempts)
        .bind(message.correlation_id.map(|c| c.as_uuid()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists_by_event_id(
        &self,
        event_id: EventId,
        consumer: &str,
    ) -> Result<bool, InboxError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM inbox_messages WHERE event_id = $1 AND consumer = $2)",
        )
        .bind(event_id.as_uuid())
        .bind(consumer)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn get_by_event_id(
        &self,
        event_id: EventId,
        consumer: &str,
    ) -> Result<Option<InboxMessage>, InboxError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM inbox_messages WHERE event_id = $1 AND consumer = $2",
        ))
        .bind(event_id.as_uuid())
        .bind(consumer)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_message).transpose().map_err(Into::into)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), InboxError> {
        let result = sqlx::query(
            "UPDATE inbox_messages SET processed_at = $2, error = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InboxError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<i32, InboxError> {
        let row = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET error = $2, processing_attempts = processing_attempts + 1
            WHERE id = $1
            RETURNING processing_attempts
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("processing_attempts")?),
            None => Err(InboxError::NotFound(id)),
        }
    }

    async fn get_unprocessed(&self, batch_size: i64) -> Result<Vec<InboxMessage>, InboxError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM inbox_messages
            WHERE processed_at IS NULL
            ORDER BY received_at ASC
            LIMIT $1
            "#,
        ))
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row_to_message(row).map_err(Into::into))
            .collect()
    }

    async fn get_failed_eligible_for_retry(
        &self,
        max_attempts: i32,
        batch_size: i64,
    ) -> Result<Vec<InboxMessage>, InboxError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM inbox_messages
            WHERE processed_at IS NULL
              AND error IS NOT NULL
              AND processing_attempts < $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
        ))
        .bind(max_attempts)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row_to_message(row).map_err(Into::into))
            .collect()
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, InboxError> {
        let result = sqlx::query(
            "DELETE FROM inbox_messages WHERE processed_at IS NOT NULL AND processed_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
