//! Outbox table access.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::{OutboxMessage, OutboxResult};

/// An event to stage for publication, one row per routing key.
#[derive(Debug, Clone)]
pub struct StagedEvent<'a> {
    pub app_uuid: Uuid,
    pub event_id: Uuid,
    pub trace_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub routing_key: &'a str,
    pub payload: &'a Value,
}

#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stage a message inside the caller's transaction.
    ///
    /// Must be called in the same transaction as the `raw_events` insert so
    /// the business write and its outbox rows commit atomically. The unique
    /// key `(app_uuid, event_id, routing_key)` makes re-submission a no-op;
    /// the return value says whether a new row was created.
    pub async fn stage(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StagedEvent<'_>,
    ) -> OutboxResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO outbox_events (
                app_uuid, event_id, trace_id, occurred_at,
                routing_key, payload, status, retries, next_attempt_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, NOW())
            ON CONFLICT (app_uuid, event_id, routing_key) DO NOTHING
            "#,
        )
        .bind(event.app_uuid)
        .bind(event.event_id)
        .bind(event.trace_id)
        .bind(event.occurred_at)
        .bind(event.routing_key)
        .bind(event.payload)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lease up to `batch` publishable rows.
    ///
    /// Selects pending rows whose `next_attempt_at` has passed and whose lock
    /// is absent or stale, in id order, skipping rows locked by concurrent
    /// relays, and stamps `locked_at` on them in one statement.
    pub async fn lease(
        &self,
        batch: i64,
        lease_timeout: Duration,
    ) -> OutboxResult<Vec<OutboxMessage>> {
        let leased = sqlx::query_as::<_, OutboxMessage>(
            r#"
            UPDATE outbox_events
            SET locked_at = NOW()
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE status = 'pending'
                  AND next_attempt_at <= NOW()
                  AND (locked_at IS NULL OR locked_at < NOW() - make_interval(secs => $2))
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, created_at, locked_at, app_uuid, event_id, trace_id,
                      occurred_at, routing_key, payload, status, retries,
                      next_attempt_at, last_error
            "#,
        )
        .bind(batch)
        .bind(lease_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        if !leased.is_empty() {
            debug!(count = leased.len(), "Leased outbox rows");
        }
        Ok(leased)
    }

    /// Broker confirmed the publish.
    pub async fn mark_sent(&self, id: i64) -> OutboxResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'sent', locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt: bump `retries`, release the lock, schedule
    /// the next attempt, and tip the row into `failed` once the cap is
    /// exceeded. Returns the resulting status string.
    pub async fn mark_attempt_failed(
        &self,
        id: i64,
        error: &str,
        retry_in: Duration,
        max_retries: i32,
    ) -> OutboxResult<String> {
        let status: String = sqlx::query_scalar(
            r#"
            UPDATE outbox_events
            SET retries = retries + 1,
                locked_at = NULL,
                last_error = $2,
                next_attempt_at = NOW() + make_interval(secs => $3),
                status = CASE WHEN retries + 1 > $4 THEN 'failed' ELSE 'pending' END
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(retry_in.as_secs_f64())
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;
        Ok(status)
    }

    /// Pending count and the age of the oldest pending row in seconds.
    pub async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let row: (i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*)::BIGINT,
                   EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT
            FROM outbox_events
            WHERE status = 'pending'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((row.0, row.1.unwrap_or(0)))
    }

    /// Reset rows created since `ts` for republication (operational backfill;
    /// consumers dedupe through the processed-events ledger).
    pub async fn replay_since(&self, ts: DateTime<Utc>) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending',
                retries = 0,
                locked_at = NULL,
                last_error = NULL,
                next_attempt_at = NOW()
            WHERE created_at >= $1
            "#,
        )
        .bind(ts)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
