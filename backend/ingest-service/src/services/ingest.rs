//! Transactional event acceptance.
//!
//! Each accepted item commits one transaction containing the immutable
//! `raw_events` row and its staged outbox rows. The broker is never contacted
//! here; durability comes from the commit, delivery from the outbox relay.

use event_schema::{routing_keys, NormalizedEvent};
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;
use transactional_outbox::{OutboxRepository, StagedEvent};
use uuid::Uuid;

use crate::error::Result;

pub struct IngestService {
    pool: PgPool,
    outbox: OutboxRepository,
}

impl IngestService {
    pub fn new(pool: PgPool) -> Self {
        let outbox = OutboxRepository::new(pool.clone());
        Self { pool, outbox }
    }

    /// Whether `(app_uuid, anon_user_id)` has opted out of collection.
    pub async fn is_opted_out(&self, app_uuid: Uuid, anon_user_id: &str) -> Result<bool> {
        let opted_out: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM opt_out WHERE app_uuid = $1 AND anon_user_id = $2)",
        )
        .bind(app_uuid)
        .bind(anon_user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(opted_out)
    }

    /// Store one normalized event and stage its outbox rows atomically.
    ///
    /// Returns `true` when the event was a duplicate: the unique key
    /// `(app_uuid, event_id)` absorbed the insert and nothing new was
    /// written. Outbox staging is idempotent per destination, so re-running
    /// after a partial failure converges on the same rows.
    pub async fn ingest_one(&self, event: &NormalizedEvent, document: &Value) -> Result<bool> {
        let geo = event
            .geo_context()
            .unwrap_or_default();
        let payload = serde_json::to_value(event)
            .map_err(|e| crate::error::IngestError::Internal(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO raw_events (
                received_at, event_id, trace_id, producer, actor, app_uuid,
                event_name, occurred_at, anon_user_id, device_id_hash,
                session_id, sdk_version, event_version,
                geo_lat, geo_lon, geo_accuracy_m, geo_source,
                payload, context, document
            ) VALUES (
                NOW(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19
            )
            ON CONFLICT (app_uuid, event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(event.trace_id)
        .bind(&event.producer)
        .bind(&event.actor)
        .bind(event.app_uuid)
        .bind(&event.event_name)
        .bind(event.occurred_at)
        .bind(&event.anon_user_id)
        .bind(&event.device_id_hash)
        .bind(&event.session_id)
        .bind(&event.sdk_version)
        .bind(&event.event_version)
        .bind(geo.as_ref().map(|g| g.lat))
        .bind(geo.as_ref().map(|g| g.lon))
        .bind(geo.as_ref().map(|g| g.accuracy_m))
        .bind(geo.as_ref().and_then(|g| g.source.clone()))
        .bind(&event.payload)
        .bind(&event.context)
        .bind(document)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        for routing_key in routing_keys(&event.event_name) {
            self.outbox
                .stage(
                    &mut tx,
                    &StagedEvent {
                        app_uuid: event.app_uuid,
                        event_id: event.event_id,
                        trace_id: event.trace_id,
                        occurred_at: event.occurred_at,
                        routing_key,
                        payload: &payload,
                    },
                )
                .await?;
        }

        tx.commit().await?;

        debug!(
            event_id = %event.event_id,
            event_name = %event.event_name,
            deduped = !inserted,
            "Event ingested"
        );
        Ok(!inserted)
    }
}
