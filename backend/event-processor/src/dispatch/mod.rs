//! Per-queue dispatch.
//!
//! Each worker is bound to one domain queue and carries a queue role; the
//! role picks the materializer. The geo and license queues feed real
//! materializers, every other queue verifies envelope minima and maintains
//! the per-user snapshot's last-event fields (the queues and their bindings
//! are reserved for future materializers).

pub mod geo;
pub mod license;
pub mod passthrough;

use event_schema::{routing, NormalizedEvent};
use geo_enrich::{hour_bucket, GeoResolver};
use idempotent_consumer::ProcessedLedger;
use sqlx::PgPool;
use tracing::debug;

use crate::error::DispatchError;

/// The domain queue a worker consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    Raw,
    Geo,
    License,
    Session,
    Screen,
    Ui,
    System,
}

impl QueueRole {
    pub fn from_routing_key(routing_key: &str) -> Option<Self> {
        match routing_key {
            routing::RK_RAW => Some(QueueRole::Raw),
            routing::RK_GEO => Some(QueueRole::Geo),
            routing::RK_LICENSE => Some(QueueRole::License),
            routing::RK_SESSION => Some(QueueRole::Session),
            routing::RK_SCREEN => Some(QueueRole::Screen),
            routing::RK_UI => Some(QueueRole::Ui),
            routing::RK_SYSTEM => Some(QueueRole::System),
            _ => None,
        }
    }

    pub fn routing_key(self) -> &'static str {
        match self {
            QueueRole::Raw => routing::RK_RAW,
            QueueRole::Geo => routing::RK_GEO,
            QueueRole::License => routing::RK_LICENSE,
            QueueRole::Session => routing::RK_SESSION,
            QueueRole::Screen => routing::RK_SCREEN,
            QueueRole::Ui => routing::RK_UI,
            QueueRole::System => routing::RK_SYSTEM,
        }
    }

    /// Ledger scope: each queue deduplicates independently, so the same event
    /// can be materialized by the geo consumer and passed through by the raw
    /// consumer.
    pub fn consumer_name(self) -> &'static str {
        match self {
            QueueRole::Raw => "processor.raw",
            QueueRole::Geo => "processor.geo",
            QueueRole::License => "processor.license",
            QueueRole::Session => "processor.session",
            QueueRole::Screen => "processor.screen",
            QueueRole::Ui => "processor.ui",
            QueueRole::System => "processor.system",
        }
    }

    /// All roles the processor runs workers for.
    pub fn all() -> [QueueRole; 7] {
        [
            QueueRole::Raw,
            QueueRole::Geo,
            QueueRole::License,
            QueueRole::Session,
            QueueRole::Screen,
            QueueRole::Ui,
            QueueRole::System,
        ]
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Side effects committed.
    Applied,
    /// Idempotency ledger collision: already processed, nothing re-applied.
    Duplicate,
}

/// Shared dispatch state for all workers.
#[derive(Clone)]
pub struct Dispatcher {
    pool: PgPool,
    resolver: GeoResolver,
    ledger: ProcessedLedger,
}

impl Dispatcher {
    pub fn new(pool: PgPool, ledger: ProcessedLedger) -> Self {
        let resolver = GeoResolver::new(pool.clone());
        Self {
            pool,
            resolver,
            ledger,
        }
    }

    /// Run one event through its materializer.
    ///
    /// Exactly one transaction per dispatch: the ledger insert and the
    /// materialized writes commit (or roll back) together, which is what
    /// makes redelivery harmless. Reference-geometry lookups run before the
    /// transaction opens so no locks are held across them.
    pub async fn process(
        &self,
        role: QueueRole,
        event: &NormalizedEvent,
    ) -> Result<Outcome, DispatchError> {
        verify_minimum(event)?;

        // Enrichment reads (and the idempotent h3_cells insert) happen
        // outside the materialization transaction.
        let geo = match role {
            QueueRole::Geo => {
                let ctx = event
                    .geo_context()
                    .map_err(|e| DispatchError::minimal_event(e.to_string()))?
                    .ok_or_else(|| {
                        DispatchError::minimal_event("geo event without context.geo")
                    })?;
                let dims = self
                    .resolver
                    .resolve(ctx.lat, ctx.lon, ctx.accuracy_m, event.occurred_at)
                    .await?;
                Some(dims)
            }
            _ => None,
        };

        let mut tx = self.pool.begin().await?;

        let fresh = self
            .ledger
            .mark_processed(&mut tx, role.consumer_name(), event.app_uuid, event.event_id)
            .await?;
        if !fresh {
            tx.rollback().await?;
            return Ok(Outcome::Duplicate);
        }

        match role {
            QueueRole::Geo => {
                let dims = geo.as_ref().expect("resolved above for geo role");
                let bucket = hour_bucket(event.occurred_at);
                geo::materialize(&mut tx, event, dims, bucket).await?;
            }
            QueueRole::License => {
                license::materialize(&mut tx, event).await?;
            }
            _ => {
                passthrough::materialize(&mut tx, event).await?;
            }
        }

        tx.commit().await?;
        debug!(
            event_id = %event.event_id,
            consumer = role.consumer_name(),
            "Event dispatched"
        );
        Ok(Outcome::Applied)
    }
}

/// Envelope minimum shared by every family.
fn verify_minimum(event: &NormalizedEvent) -> Result<(), DispatchError> {
    if event.event_name.is_empty() {
        return Err(DispatchError::minimal_event("empty event_name"));
    }
    if event.anon_user_id.is_empty() || event.device_id_hash.is_empty() {
        return Err(DispatchError::minimal_event("missing anonymized identifiers"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_routing_key() {
        for role in QueueRole::all() {
            assert_eq!(QueueRole::from_routing_key(role.routing_key()), Some(role));
        }
        assert_eq!(QueueRole::from_routing_key("sb.events.dlq"), None);
    }

    #[test]
    fn consumer_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            QueueRole::all().iter().map(|r| r.consumer_name()).collect();
        assert_eq!(names.len(), QueueRole::all().len());
    }
}
