//! Ingest counters on the default Prometheus registry.

use prometheus::IntCounter;

#[derive(Clone)]
pub struct IngestMetrics {
    pub accepted: IntCounter,
    pub rejected: IntCounter,
    pub deduped: IntCounter,
}

impl IngestMetrics {
    pub fn new() -> Self {
        let registry = prometheus::default_registry();

        let accepted = IntCounter::new("ingest_events_accepted_total", "Accepted batch items")
            .expect("valid metric for ingest_events_accepted_total");
        let rejected = IntCounter::new("ingest_events_rejected_total", "Rejected batch items")
            .expect("valid metric for ingest_events_rejected_total");
        let deduped = IntCounter::new(
            "ingest_events_deduped_total",
            "Accepted items that deduplicated against an existing event",
        )
        .expect("valid metric for ingest_events_deduped_total");

        let _ = registry.register(Box::new(accepted.clone()));
        let _ = registry.register(Box::new(rejected.clone()));
        let _ = registry.register(Box::new(deduped.clone()));

        Self {
            accepted,
            rejected,
            deduped,
        }
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}
