//! Event schema registry for the analytics pipeline.
//!
//! Defines the producer-facing envelopes (strict and lax), the single
//! normalized record every downstream component consumes, the routing-key
//! table that fans events out over the topic exchange, and the dead-letter
//! envelope. Producers, the ingest service, the outbox relay and the
//! processor all depend on this crate and nothing else for wire shapes.

pub mod dlq;
pub mod envelope;
pub mod routing;

pub use dlq::{DeadLetterEnvelope, DeadLetterReason, DeadLetterSource};
pub use envelope::{
    Envelope, EnvelopeMode, GeoContext, LaxEnvelope, NormalizedEvent, StrictEnvelope,
    ValidationError,
};
pub use routing::{queue_name, routing_keys, EventFamily, DOMAIN_ROUTING_KEYS, RK_DLQ, RK_RAW};

use serde::{Deserialize, Serialize};

/// Per-item rejection reported in the batch ingest response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedItem {
    /// Zero-based index of the item in the submitted batch.
    pub index: usize,
    pub code: String,
    pub message: String,
}

/// Response body of `POST /v1/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Number of items accepted (including deduplicated re-submissions).
    pub accepted: usize,
    /// One flag per accepted item, in submission order: `true` when the item
    /// collided with an already-stored event and no new row was written.
    pub deduped: Vec<bool>,
    pub rejected: Vec<RejectedItem>,
}

impl IngestResponse {
    pub fn new() -> Self {
        Self {
            accepted: 0,
            deduped: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl Default for IngestResponse {
    fn default() -> Self {
        Self::new()
    }
}
