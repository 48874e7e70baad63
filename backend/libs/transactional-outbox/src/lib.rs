//! Transactional outbox: reliable at-least-once bridge from PostgreSQL to the
//! topic exchange.
//!
//! The ingest service stages messages in `outbox_events` inside the same
//! transaction as the business write, so an accepted event can never be lost
//! between the database and the broker. The [`relay::OutboxRelay`] is the only
//! producer to the exchange: it leases pending rows with `FOR UPDATE SKIP
//! LOCKED` (publishers scale horizontally without stepping on each other),
//! publishes with confirms, and walks each row through
//! `pending → sent | pending (retry) | failed`.
//!
//! A relay killed mid-lease leaves `locked_at` set; rows whose lock is older
//! than the lease timeout are treated as pending again on the next poll.

pub mod backoff;
pub mod metrics;
pub mod relay;
pub mod repository;

pub use backoff::BackoffPolicy;
pub use metrics::OutboxMetrics;
pub use relay::{OutboxRelay, RelayConfig};
pub use repository::{OutboxRepository, StagedEvent};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub type OutboxResult<T> = Result<T, OutboxError>;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("broker error: {0}")]
    Publish(#[from] event_bus::BusError),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outbox row lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "sent" => Some(OutboxStatus::Sent),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// A staged message as stored in `outbox_events`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub app_uuid: Uuid,
    pub event_id: Uuid,
    pub trace_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub routing_key: String,
    pub payload: Value,
    pub status: String,
    pub retries: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [OutboxStatus::Pending, OutboxStatus::Sent, OutboxStatus::Failed] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("published"), None);
    }
}
