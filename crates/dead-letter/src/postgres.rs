use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::Result;
use crate::message::{DeadLetterFilter, DeadLetterMessage, DeadLetterStats};
use crate::repository::{DeadLetterPage, DeadLetterRepository};

/// PostgreSQL-backed dead letter repository.
#[derive(Clone)]
pub struct PostgresDeadLetterRepository {
    pool: PgPool,
}

impl PostgresDeadLetterRepository {
    /// Creates a new PostgreSQL dead letter repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_message(row: PgRow) -> Result<DeadLetterMessage> {
        Ok(DeadLetterMessage {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            original_timestamp: row.try_get("original_timestamp")?,
            moved_to_dlq_at: row.try_get("moved_to_dlq_at")?,
            failure_reason: row.try_get("failure_reason")?,
            error_details: row.try_get("error_details")?,
            total_attempts: row.try_get("total_attempts")?,
            service_name: row.try_get("service_name")?,
            correlation_id: row
                .try_get::<Option<Uuid>, _>("correlation_id")?
                .map(CorrelationId::from_uuid),
            original_message_id: row.try_get("original_message_id")?,
            reprocessed: row.try_get("reprocessed")?,
            reprocessed_at: row.try_get("reprocessed_at")?,
            operator_notes: row.try_get("operator_notes")?,
        })
    }
}

#[async_trait]
impl DeadLetterRepository for PostgresDeadLetterRepository {
    async fn add(&self, message: DeadLetterMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letter_messages
                (id, event_type, payload, original_timestamp, moved_to_dlq_at,
                 failure_reason, error_details, total_attempts, service_name,
                 correlation_id, original_message_id, reprocessed, reprocessed_at,
                 operator_notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(message.id)
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(message.original_timestamp)
        .bind(message.moved_to_dlq_at)
        .bind(&message.failure_reason)
        .bind(&message.error_details)
        .bind(message.total_attempts)
        .bind(&message.service_name)
        .bind(message.correlation_id.map(|c| c.as_uuid()))
        .bind(message.original_message_id)
        .bind(message.reprocessed)
        .bind(message.reprocessed_at)
        .bind(&message.operator_notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_paged(
        &self,
        filter: &DeadLetterFilter,
        page: i64,
        page_size: i64,
    ) -> Result<DeadLetterPage> {
        let offset = (page - 1).max(0) * page_size;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM dead_letter_messages
            WHERE ($1::text IS NULL OR service_name = $1)
              AND ($2::timestamptz IS NULL OR moved_to_dlq_at >= $2)
              AND ($3::timestamptz IS NULL OR moved_to_dlq_at < $3)
              AND ($4::boolean IS NULL OR reprocessed = $4)
            "#,
        )
        .bind(&filter.service_name)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.reprocessed)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM dead_letter_messages
            WHERE ($1::text IS NULL OR service_name = $1)
              AND ($2::timestamptz IS NULL OR moved_to_dlq_at >= $2)
              AND ($3::timestamptz IS NULL OR moved_to_dlq_at < $3)
              AND ($4::boolean IS NULL OR reprocessed = $4)
            ORDER BY moved_to_dlq_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(&filter.service_name)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.reprocessed)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>>>()?;

        Ok(DeadLetterPage {
            messages,
            total,
            page,
            page_size,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<DeadLetterMessage>> {
        let row = sqlx::query("SELECT * FROM dead_letter_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn mark_reprocessed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dead_letter_messages
            SET reprocessed = TRUE, reprocessed_at = $2
            WHERE id = $1 AND reprocessed = FALSE
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_notes(&self, id: Uuid, notes: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE dead_letter_messages
            SET operator_notes = CASE
                WHEN operator_notes IS NULL THEN $2
                ELSE operator_notes || E'\n' || $2
            END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_statistics(&self) -> Result<DeadLetterStats> {
        let (total, reprocessed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE reprocessed)
            FROM dead_letter_messages
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let rows =
            sqlx::query("SELECT service_name, COUNT(*) FROM dead_letter_messages GROUP BY 1")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = DeadLetterStats {
            total,
            reprocessed,
            pending: total - reprocessed,
            ..Default::default()
        };
        for row in rows {
            let service: String = row.try_get(0)?;
            let count: i64 = row.try_get(1)?;
            stats.by_service.insert(service, count);
        }

        Ok(stats)
    }

    async fn cleanup_reprocessed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM dead_letter_messages WHERE reprocessed AND reprocessed_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
