//! Processor counters on the default Prometheus registry.

use prometheus::IntCounter;

#[derive(Clone)]
pub struct ProcessorMetrics {
    pub processed: IntCounter,
    pub duplicates: IntCounter,
    pub retried: IntCounter,
    pub dead_lettered: IntCounter,
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        let registry = prometheus::default_registry();

        let processed = IntCounter::new(
            "processor_events_processed_total",
            "Events materialized and acked",
        )
        .expect("valid metric for processor_events_processed_total");
        let duplicates = IntCounter::new(
            "processor_events_duplicate_total",
            "Deliveries skipped by the idempotency ledger",
        )
        .expect("valid metric for processor_events_duplicate_total");
        let retried = IntCounter::new(
            "processor_events_retried_total",
            "Deliveries republished with an incremented retry header",
        )
        .expect("valid metric for processor_events_retried_total");
        let dead_lettered = IntCounter::new(
            "processor_events_dead_lettered_total",
            "Deliveries published to the DLQ",
        )
        .expect("valid metric for processor_events_dead_lettered_total");

        let _ = registry.register(Box::new(processed.clone()));
        let _ = registry.register(Box::new(duplicates.clone()));
        let _ = registry.register(Box::new(retried.clone()));
        let _ = registry.register(Box::new(dead_lettered.clone()));

        Self {
            processed,
            duplicates,
            retried,
            dead_lettered,
        }
    }
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        Self::new()
    }
}
