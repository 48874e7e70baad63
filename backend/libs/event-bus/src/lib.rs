//! AMQP plumbing shared by the outbox publisher and the event processor.
//!
//! One topic exchange (`sb.events`), eight durable queues bound by routing
//! key, publisher confirms on every publish. Topology declaration is
//! idempotent: the publisher declares authoritatively on boot and after every
//! reconnect; the processor asserts the same declarations before consuming.

pub mod headers;
pub mod topology;

pub use headers::{event_headers, identity_headers, retry_count, set_retry_count, RETRY_HEADER};
pub use topology::{declare_topology, QueueSpec, EXCHANGE, QUEUES};

use event_schema::DeadLetterEnvelope;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("broker negatively acknowledged publish on {routing_key}")]
    Nacked { routing_key: String },

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Connect to the broker.
pub async fn connect(url: &str) -> Result<Connection, BusError> {
    let conn = Connection::connect(url, ConnectionProperties::default()).await?;
    debug!("Connected to AMQP broker");
    Ok(conn)
}

/// Open a channel with publisher confirms enabled.
pub async fn create_confirmed_channel(conn: &Connection) -> Result<Channel, BusError> {
    let channel = conn.create_channel().await?;
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await?;
    Ok(channel)
}

/// Publish a persistent message and wait for the broker confirm.
///
/// A nack (or a channel error while waiting) surfaces as an error so the
/// caller can schedule a retry; this function never retries on its own.
pub async fn publish_confirmed(
    channel: &Channel,
    routing_key: &str,
    payload: &[u8],
    headers: FieldTable,
) -> Result<(), BusError> {
    let properties = BasicProperties::default()
        .with_content_type("application/json".into())
        .with_delivery_mode(2)
        .with_headers(headers);

    let confirmation = channel
        .basic_publish(
            EXCHANGE,
            routing_key,
            BasicPublishOptions::default(),
            payload,
            properties,
        )
        .await?
        .await?;

    if confirmation.is_ack() {
        debug!(routing_key, "Publish confirmed");
        Ok(())
    } else {
        warn!(routing_key, "Publish nacked by broker");
        Err(BusError::Nacked {
            routing_key: routing_key.to_string(),
        })
    }
}

/// Serialize and publish a dead-letter envelope to `sb.events.dlq`.
pub async fn publish_dead_letter(
    channel: &Channel,
    envelope: &DeadLetterEnvelope,
) -> Result<(), BusError> {
    let payload = serde_json::to_vec(envelope)?;
    publish_confirmed(channel, event_schema::RK_DLQ, &payload, FieldTable::default()).await
}
