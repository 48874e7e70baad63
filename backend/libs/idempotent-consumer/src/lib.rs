//! Consumer-scoped idempotency ledger.
//!
//! The broker delivers at least once; redeliveries, publisher retries and
//! processor restarts all hand the same event to a consumer more than once.
//! The ledger turns those duplicates into no-ops: each consumer inserts
//! `(consumer, app_uuid, event_id)` into `processed_events` inside the same
//! transaction as its side effects, and a primary-key collision means the
//! work already happened: the message is acked without re-applying.
//!
//! Ten workers racing on the same event is safe: exactly one insert wins, the
//! other nine observe the conflict and skip. There is no separate
//! check-then-act window because the insert *is* the check.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid retention duration: {0}")]
    InvalidRetention(String),
}

/// Handle on the `processed_events` table.
#[derive(Clone)]
pub struct ProcessedLedger {
    pool: PgPool,
    retention: Duration,
}

impl ProcessedLedger {
    /// `retention` bounds ledger growth; see [`Self::cleanup_old_entries`].
    pub fn new(pool: PgPool, retention: Duration) -> Self {
        Self { pool, retention }
    }

    /// Record the event as processed by `consumer` inside the caller's
    /// transaction.
    ///
    /// Returns `true` when this call inserted the row (first processing) and
    /// `false` on a primary-key collision (duplicate delivery). Rolling the
    /// transaction back also rolls the ledger entry back, so a failed
    /// dispatch leaves the event eligible for retry.
    pub async fn mark_processed(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        consumer: &str,
        app_uuid: Uuid,
        event_id: Uuid,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (consumer, app_uuid, event_id, processed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (consumer, app_uuid, event_id) DO NOTHING
            "#,
        )
        .bind(consumer)
        .bind(app_uuid)
        .bind(event_id)
        .execute(&mut **tx)
        .await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!(consumer, %event_id, "Event already processed, skipping");
        }
        Ok(inserted)
    }

    /// Pool-level variant for callers without an open transaction.
    pub async fn is_processed(
        &self,
        consumer: &str,
        app_uuid: Uuid,
        event_id: Uuid,
    ) -> LedgerResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events
                WHERE consumer = $1 AND app_uuid = $2 AND event_id = $3
            )
            "#,
        )
        .bind(consumer)
        .bind(app_uuid)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Delete ledger entries older than the retention horizon.
    ///
    /// Run periodically from a background task. Entries only need to outlive
    /// the broker's redelivery window, so days of retention is generous.
    pub async fn cleanup_old_entries(&self) -> LedgerResult<u64> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.retention)
                .map_err(|e| LedgerError::InvalidRetention(e.to_string()))?;

        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, %cutoff, "Cleaned up old processed-event entries");
        }
        Ok(deleted)
    }
}
