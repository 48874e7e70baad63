//! Geo family materializer.
//!
//! One geolocated event upserts both presence facts, feeds the hourly
//! aggregates with the insert deltas, and refreshes the per-user snapshot.
//! The precision policy lives entirely in the upsert statement: geo
//! dimensions are overwritten only by a strictly better fix, while
//! `first_event_ts` always keeps the earliest observation. Both rules are
//! order-independent, so replays and permutations converge on the same row.

use chrono::{DateTime, Utc};
use event_schema::NormalizedEvent;
use geo_enrich::GeoDimensions;
use sqlx::{Postgres, Transaction};

use crate::error::DispatchError;

/// Which presence rows this event created (vs merely updated). Aggregate
/// counters advance only on creation, which is what keeps redelivered
/// messages from inflating counts.
#[derive(Debug, Clone, Copy)]
pub struct PresenceDeltas {
    pub device_inserted: bool,
    pub user_inserted: bool,
}

pub async fn materialize(
    tx: &mut Transaction<'_, Postgres>,
    event: &NormalizedEvent,
    dims: &GeoDimensions,
    bucket: DateTime<Utc>,
) -> Result<PresenceDeltas, DispatchError> {
    let device_inserted = upsert_presence(
        tx,
        "device_hourly_presence",
        "device_id_hash",
        &event.device_id_hash,
        event,
        dims,
        bucket,
    )
    .await?;
    let user_inserted = upsert_presence(
        tx,
        "user_hourly_presence",
        "anon_user_id",
        &event.anon_user_id,
        event,
        dims,
        bucket,
    )
    .await?;

    let deltas = PresenceDeltas {
        device_inserted,
        user_inserted,
    };
    bump_aggregates(tx, event, dims, bucket, deltas).await?;
    update_customer(tx, event, dims, deltas).await?;
    Ok(deltas)
}

/// `true` precision rank comparison: the stored row is only upgraded, never
/// degraded.
fn upgrade_condition(table: &str) -> String {
    format!(
        "CASE {table}.geo_precision_class WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0 END \
         < CASE EXCLUDED.geo_precision_class WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0 END"
    )
}

fn presence_upsert_sql(table: &str, entity_col: &str) -> String {
    let upgrade = upgrade_condition(table);
    format!(
        r#"
        INSERT INTO {table} (
            app_uuid, hour_bucket, {entity_col}, geo_precision_class,
            h3_r7, h3_r9, h3_r11, place_id,
            country_code, province_code, municipality_code, sector_code,
            first_event_ts
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (app_uuid, hour_bucket, {entity_col}) DO UPDATE SET
            h3_r7 = CASE WHEN {upgrade} THEN EXCLUDED.h3_r7 ELSE {table}.h3_r7 END,
            h3_r9 = CASE WHEN {upgrade} THEN EXCLUDED.h3_r9 ELSE {table}.h3_r9 END,
            h3_r11 = CASE WHEN {upgrade} THEN EXCLUDED.h3_r11 ELSE {table}.h3_r11 END,
            place_id = CASE WHEN {upgrade} THEN EXCLUDED.place_id ELSE {table}.place_id END,
            country_code = CASE WHEN {upgrade} THEN EXCLUDED.country_code ELSE {table}.country_code END,
            province_code = CASE WHEN {upgrade} THEN EXCLUDED.province_code ELSE {table}.province_code END,
            municipality_code = CASE WHEN {upgrade} THEN EXCLUDED.municipality_code ELSE {table}.municipality_code END,
            sector_code = CASE WHEN {upgrade} THEN EXCLUDED.sector_code ELSE {table}.sector_code END,
            geo_precision_class = CASE WHEN {upgrade} THEN EXCLUDED.geo_precision_class ELSE {table}.geo_precision_class END,
            first_event_ts = LEAST({table}.first_event_ts, EXCLUDED.first_event_ts)
        RETURNING (xmax = 0) AS inserted
        "#
    )
}

async fn upsert_presence(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    entity_col: &str,
    entity: &str,
    event: &NormalizedEvent,
    dims: &GeoDimensions,
    bucket: DateTime<Utc>,
) -> Result<bool, DispatchError> {
    let inserted: bool = sqlx::query_scalar(&presence_upsert_sql(table, entity_col))
        .bind(event.app_uuid)
        .bind(bucket)
        .bind(entity)
        .bind(dims.precision.as_str())
        .bind(&dims.h3_r7)
        .bind(&dims.h3_r9)
        .bind(&dims.h3_r11)
        .bind(dims.place_id)
        .bind(&dims.country_code)
        .bind(&dims.province_code)
        .bind(&dims.municipality_code)
        .bind(&dims.sector_code)
        .bind(event.occurred_at)
        .fetch_one(&mut **tx)
        .await?;
    Ok(inserted)
}

/// Advance the hourly aggregates by the presence insert deltas.
async fn bump_aggregates(
    tx: &mut Transaction<'_, Postgres>,
    event: &NormalizedEvent,
    dims: &GeoDimensions,
    bucket: DateTime<Utc>,
    deltas: PresenceDeltas,
) -> Result<(), DispatchError> {
    let device_delta = i64::from(deltas.device_inserted);
    let user_delta = i64::from(deltas.user_inserted);
    if device_delta + user_delta == 0 {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO agg_h3_r9_hourly (app_uuid, hour_bucket, h3_r9, device_count, user_count)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (app_uuid, hour_bucket, h3_r9) DO UPDATE SET
            device_count = agg_h3_r9_hourly.device_count + EXCLUDED.device_count,
            user_count = agg_h3_r9_hourly.user_count + EXCLUDED.user_count
        "#,
    )
    .bind(event.app_uuid)
    .bind(bucket)
    .bind(&dims.h3_r9)
    .bind(device_delta)
    .bind(user_delta)
    .execute(&mut **tx)
    .await?;

    if let Some(place_id) = dims.place_id {
        sqlx::query(
            r#"
            INSERT INTO agg_place_hourly (app_uuid, hour_bucket, place_id, device_count, user_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (app_uuid, hour_bucket, place_id) DO UPDATE SET
                device_count = agg_place_hourly.device_count + EXCLUDED.device_count,
                user_count = agg_place_hourly.user_count + EXCLUDED.user_count
            "#,
        )
        .bind(event.app_uuid)
        .bind(bucket)
        .bind(place_id)
        .bind(device_delta)
        .bind(user_delta)
        .execute(&mut **tx)
        .await?;
    }

    if dims.country_code.is_some() {
        sqlx::query(
            r#"
            INSERT INTO agg_admin_hourly (
                app_uuid, hour_bucket, country_code, province_code, municipality_code,
                device_count, user_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (app_uuid, hour_bucket, country_code, province_code, municipality_code)
            DO UPDATE SET
                device_count = agg_admin_hourly.device_count + EXCLUDED.device_count,
                user_count = agg_admin_hourly.user_count + EXCLUDED.user_count
            "#,
        )
        .bind(event.app_uuid)
        .bind(bucket)
        .bind(dims.country_code.as_deref().unwrap_or(""))
        .bind(dims.province_code.as_deref().unwrap_or(""))
        .bind(dims.municipality_code.as_deref().unwrap_or(""))
        .bind(i64::from(deltas.device_inserted))
        .bind(i64::from(deltas.user_inserted))
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Refresh the per-user snapshot: seen window, last-event fields (gated on
/// the event being at least as new as anything seen so far), geo counters
/// and distinct hour counters.
async fn update_customer(
    tx: &mut Transaction<'_, Postgres>,
    event: &NormalizedEvent,
    dims: &GeoDimensions,
    deltas: PresenceDeltas,
) -> Result<(), DispatchError> {
    sqlx::query(
        r#"
        INSERT INTO customer_360 (
            app_uuid, anon_user_id, first_seen, last_seen,
            last_event_name, last_event_ts,
            last_h3_r9, last_place_id, last_country_code, last_province_code,
            geo_events_count, device_hours_count, user_hours_count
        ) VALUES ($1, $2, $3, $3, $4, $3, $5, $6, $7, $8, 1, $9, $10)
        ON CONFLICT (app_uuid, anon_user_id) DO UPDATE SET
            first_seen = LEAST(customer_360.first_seen, EXCLUDED.first_seen),
            last_seen = GREATEST(customer_360.last_seen, EXCLUDED.last_seen),
            last_event_name = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_event_name ELSE customer_360.last_event_name END,
            last_event_ts = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_event_ts ELSE customer_360.last_event_ts END,
            last_h3_r9 = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_h3_r9 ELSE customer_360.last_h3_r9 END,
            last_place_id = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_place_id ELSE customer_360.last_place_id END,
            last_country_code = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_country_code ELSE customer_360.last_country_code END,
            last_province_code = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_province_code ELSE customer_360.last_province_code END,
            geo_events_count = customer_360.geo_events_count + 1,
            device_hours_count = customer_360.device_hours_count + EXCLUDED.device_hours_count,
            user_hours_count = customer_360.user_hours_count + EXCLUDED.user_hours_count
        "#,
    )
    .bind(event.app_uuid)
    .bind(&event.anon_user_id)
    .bind(event.occurred_at)
    .bind(&event.event_name)
    .bind(&dims.h3_r9)
    .bind(dims.place_id)
    .bind(&dims.country_code)
    .bind(&dims.province_code)
    .bind(i64::from(deltas.device_inserted))
    .bind(i64::from(deltas.user_inserted))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_sql_references_the_right_table() {
        let sql = presence_upsert_sql("device_hourly_presence", "device_id_hash");
        assert!(sql.contains("INSERT INTO device_hourly_presence"));
        assert!(sql.contains("ON CONFLICT (app_uuid, hour_bucket, device_id_hash)"));
        assert!(sql.contains("LEAST(device_hourly_presence.first_event_ts"));
        assert!(!sql.contains("user_hourly_presence"));

        let sql = presence_upsert_sql("user_hourly_presence", "anon_user_id");
        assert!(sql.contains("ON CONFLICT (app_uuid, hour_bucket, anon_user_id)"));
    }

    #[test]
    fn upgrade_condition_ranks_precision() {
        let cond = upgrade_condition("t");
        assert!(cond.contains("WHEN 'high' THEN 2"));
        assert!(cond.contains("WHEN 'medium' THEN 1"));
        assert!(cond.contains("ELSE 0"));
    }
}
