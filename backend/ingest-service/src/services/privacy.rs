//! Opt-out registry and right-to-erasure support.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::Result;

/// Per-table deletion counts returned by `/v1/privacy/delete`.
#[derive(Debug, Default, Serialize)]
pub struct DeletionReport {
    pub raw_events: u64,
    pub license_state: u64,
    pub device_hourly_presence: u64,
    pub user_hourly_presence: u64,
    pub customer_360: u64,
    pub opt_out: u64,
}

pub struct PrivacyService {
    pool: PgPool,
}

impl PrivacyService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register an opt-out. Idempotent: repeated calls are no-ops.
    pub async fn opt_out(&self, app_uuid: Uuid, anon_user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO opt_out (app_uuid, anon_user_id)
            VALUES ($1, $2)
            ON CONFLICT (app_uuid, anon_user_id) DO NOTHING
            "#,
        )
        .bind(app_uuid)
        .bind(anon_user_id)
        .execute(&self.pool)
        .await?;
        info!(%app_uuid, "Opt-out registered");
        Ok(())
    }

    /// Erase all stored data for `(app_uuid, anon_user_id)`.
    ///
    /// Device-keyed presence rows are resolved through `raw_events` before
    /// those rows disappear, so the deletes must run in this order inside one
    /// transaction. The opt-out marker survives unless the caller explicitly
    /// asks for it to go too.
    pub async fn delete_user_data(
        &self,
        app_uuid: Uuid,
        anon_user_id: &str,
        delete_opt_out: bool,
    ) -> Result<DeletionReport> {
        let mut tx = self.pool.begin().await?;
        let mut report = DeletionReport::default();

        report.device_hourly_presence = sqlx::query(
            r#"
            DELETE FROM device_hourly_presence
            WHERE app_uuid = $1
              AND device_id_hash IN (
                  SELECT DISTINCT device_id_hash FROM raw_events
                  WHERE app_uuid = $1 AND anon_user_id = $2
              )
            "#,
        )
        .bind(app_uuid)
        .bind(anon_user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        report.user_hourly_presence = self
            .delete_by_user(&mut tx, "user_hourly_presence", app_uuid, anon_user_id)
            .await?;
        report.raw_events = self
            .delete_by_user(&mut tx, "raw_events", app_uuid, anon_user_id)
            .await?;
        report.license_state = self
            .delete_by_user(&mut tx, "license_state", app_uuid, anon_user_id)
            .await?;
        report.customer_360 = self
            .delete_by_user(&mut tx, "customer_360", app_uuid, anon_user_id)
            .await?;

        if delete_opt_out {
            report.opt_out = self
                .delete_by_user(&mut tx, "opt_out", app_uuid, anon_user_id)
                .await?;
        }

        tx.commit().await?;
        info!(%app_uuid, ?report, "User data deleted");
        Ok(report)
    }

    async fn delete_by_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        app_uuid: Uuid,
        anon_user_id: &str,
    ) -> Result<u64> {
        // Table names come from the fixed list above, never from input.
        let sql = format!("DELETE FROM {table} WHERE app_uuid = $1 AND anon_user_id = $2");
        let deleted = sqlx::query(&sql)
            .bind(app_uuid)
            .bind(anon_user_id)
            .execute(&mut **tx)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}
