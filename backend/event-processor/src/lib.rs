//! Event processor: consumes the domain queues, deduplicates through the
//! processed-events ledger, and materializes hourly presence facts, the
//! per-user snapshot and license state. Failed messages either retry with a
//! header-counted backoff ladder or land in the DLQ; the terminal state of
//! every delivery is an ack.

pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod retry;
