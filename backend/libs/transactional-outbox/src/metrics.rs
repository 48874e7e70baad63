//! Prometheus gauges and counters for the relay.

use prometheus::{IntCounter, IntGauge};

#[derive(Clone)]
pub struct OutboxMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub published: IntCounter,
    pub failed: IntCounter,
}

impl OutboxMetrics {
    pub fn new() -> Self {
        let registry = prometheus::default_registry();

        let pending = IntGauge::new(
            "outbox_pending_count",
            "Number of outbox rows currently pending publication",
        )
        .expect("valid metric for outbox_pending_count");
        let oldest_pending_age_seconds = IntGauge::new(
            "outbox_oldest_pending_age_seconds",
            "Age in seconds of the oldest pending outbox row",
        )
        .expect("valid metric for outbox_oldest_pending_age_seconds");
        let published = IntCounter::new(
            "outbox_published_total",
            "Total outbox rows confirmed by the broker",
        )
        .expect("valid metric for outbox_published_total");
        let failed = IntCounter::new(
            "outbox_failed_total",
            "Total outbox rows that exceeded the retry cap",
        )
        .expect("valid metric for outbox_failed_total");

        // Re-registration in tests returns an error we can ignore.
        let _ = registry.register(Box::new(pending.clone()));
        let _ = registry.register(Box::new(oldest_pending_age_seconds.clone()));
        let _ = registry.register(Box::new(published.clone()));
        let _ = registry.register(Box::new(failed.clone()));

        Self {
            pending,
            oldest_pending_age_seconds,
            published,
            failed,
        }
    }
}

impl Default for OutboxMetrics {
    fn default() -> Self {
        Self::new()
    }
}
