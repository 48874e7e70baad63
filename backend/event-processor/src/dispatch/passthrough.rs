//! Raw / session / screen / ui / system families.
//!
//! No materialization contract yet; the queues are reserved for future
//! materializers. The consumer verifies envelope minima (done upstream) and
//! keeps the per-user snapshot's seen window and last-event fields current.

use event_schema::NormalizedEvent;
use sqlx::{Postgres, Transaction};

use crate::error::DispatchError;

pub async fn materialize(
    tx: &mut Transaction<'_, Postgres>,
    event: &NormalizedEvent,
) -> Result<(), DispatchError> {
    sqlx::query(
        r#"
        INSERT INTO customer_360 (
            app_uuid, anon_user_id, first_seen, last_seen, last_event_name, last_event_ts
        ) VALUES ($1, $2, $3, $3, $4, $3)
        ON CONFLICT (app_uuid, anon_user_id) DO UPDATE SET
            first_seen = LEAST(customer_360.first_seen, EXCLUDED.first_seen),
            last_seen = GREATEST(customer_360.last_seen, EXCLUDED.last_seen),
            last_event_name = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_event_name ELSE customer_360.last_event_name END,
            last_event_ts = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_event_ts ELSE customer_360.last_event_ts END
        "#,
    )
    .bind(event.app_uuid)
    .bind(&event.anon_user_id)
    .bind(event.occurred_at)
    .bind(&event.event_name)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
