//! Queue worker: one long-lived consumer per domain queue.
//!
//! Message lifecycle: decode → dedup-check → dispatch → ack, with side exits
//! to `retried` (republished with an incremented `sb_retry` header after a
//! jittered backoff) and `dlq`. The original delivery is always acked once
//! its outcome is safely recorded elsewhere; the worker never nack-requeues.
//! Broker-level redelivery only happens when the worker itself dies between
//! consuming and acking, which the idempotency ledger absorbs.

use anyhow::{Context as _, Result};
use event_schema::{
    queue_name, DeadLetterEnvelope, DeadLetterReason, DeadLetterSource, NormalizedEvent,
};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, Consumer};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ProcessorSettings;
use crate::dispatch::{Dispatcher, Outcome, QueueRole};
use crate::error::DispatchError;
use crate::metrics::ProcessorMetrics;
use crate::retry;

pub struct QueueWorker {
    role: QueueRole,
    settings: ProcessorSettings,
    dispatcher: Dispatcher,
    metrics: ProcessorMetrics,
}

impl QueueWorker {
    pub fn new(
        role: QueueRole,
        settings: ProcessorSettings,
        dispatcher: Dispatcher,
        metrics: ProcessorMetrics,
    ) -> Self {
        Self {
            role,
            settings,
            dispatcher,
            metrics,
        }
    }

    /// Consume until shutdown. Reconnects with a flat delay on any broker
    /// failure; the in-flight delivery is finished before exiting.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let queue = queue_name(self.role.routing_key());
        info!(queue = %queue, "Queue worker starting");

        while !*shutdown.borrow() {
            let (_connection, channel, mut consumer) = match self.subscribe().await {
                Ok(parts) => parts,
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Broker unavailable, retrying in 5s");
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };
            info!(queue = %queue, "Consumer ready");

            loop {
                let delivery = tokio::select! {
                    maybe = consumer.next() => maybe,
                    _ = shutdown.changed() => {
                        info!(queue = %queue, "Queue worker draining and shutting down");
                        return;
                    }
                };

                match delivery {
                    Some(Ok(delivery)) => {
                        if let Err(e) = self.handle_delivery(&channel, delivery).await {
                            error!(queue = %queue, error = %e, "Delivery handling hit a broker error, reconnecting");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!(queue = %queue, error = %e, "Consumer stream error, reconnecting");
                        break;
                    }
                    None => {
                        warn!(queue = %queue, "Consumer stream ended, reconnecting");
                        break;
                    }
                }
            }
        }
        info!(queue = %queue, "Queue worker stopped");
    }

    async fn subscribe(&self) -> Result<(Connection, Channel, Consumer), event_bus::BusError> {
        let connection = event_bus::connect(&self.settings.amqp_url).await?;
        let channel = event_bus::create_confirmed_channel(&connection).await?;
        // Assert, not own: the publisher is the authoritative declarer.
        event_bus::declare_topology(&channel).await?;
        channel
            .basic_qos(self.settings.prefetch, BasicQosOptions::default())
            .await?;
        let consumer = channel
            .basic_consume(
                &queue_name(self.role.routing_key()),
                self.role.consumer_name(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok((connection, channel, consumer))
    }

    /// Walk one delivery through the state machine.
    ///
    /// Returns `Err` only when the broker itself failed (ack, retry publish
    /// or DLQ publish); in that case the delivery stays unacked and will be
    /// redelivered after reconnect, which the ledger makes harmless.
    async fn handle_delivery(&self, channel: &Channel, delivery: Delivery) -> Result<()> {
        let decoded: Value = match serde_json::from_slice(&delivery.data) {
            Ok(v) => v,
            Err(e) => {
                self.dead_letter(
                    channel,
                    &delivery,
                    DeadLetterReason::JsonDecode,
                    None,
                    "serde_json::Error",
                    &e.to_string(),
                )
                .await?;
                return self.ack(delivery).await;
            }
        };

        let event: NormalizedEvent = match serde_json::from_value(decoded.clone()) {
            Ok(ev) => ev,
            Err(e) => {
                self.dead_letter(
                    channel,
                    &delivery,
                    DeadLetterReason::InvalidDocumentType,
                    Some(decoded),
                    "serde_json::Error",
                    &e.to_string(),
                )
                .await?;
                return self.ack(delivery).await;
            }
        };

        match self.dispatcher.process(self.role, &event).await {
            Ok(Outcome::Applied) => {
                self.metrics.processed.inc();
                self.ack(delivery).await
            }
            Ok(Outcome::Duplicate) => {
                self.metrics.duplicates.inc();
                debug!(event_id = %event.event_id, "Duplicate delivery acked");
                self.ack(delivery).await
            }
            Err(DispatchError::Permanent {
                reason,
                kind,
                message,
            }) => {
                warn!(
                    event_id = %event.event_id,
                    ?reason,
                    %message,
                    "Permanent dispatch failure, dead-lettering"
                );
                self.dead_letter(channel, &delivery, reason, Some(decoded), &kind, &message)
                    .await?;
                self.ack(delivery).await
            }
            Err(DispatchError::Transient { message }) => {
                let attempt = event_bus::retry_count(&delivery.properties);
                if retry::exhausted(attempt, self.settings.max_retries) {
                    warn!(
                        event_id = %event.event_id,
                        attempt,
                        %message,
                        "Retry budget exhausted, dead-lettering"
                    );
                    self.dead_letter(
                        channel,
                        &delivery,
                        DeadLetterReason::PermanentBusiness,
                        Some(decoded),
                        "RetryExhausted",
                        &message,
                    )
                    .await?;
                    return self.ack(delivery).await;
                }

                let delay = retry::retry_delay(
                    attempt,
                    self.settings.retry_base,
                    self.settings.max_backoff,
                );
                warn!(
                    event_id = %event.event_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %message,
                    "Transient dispatch failure, republishing"
                );
                tokio::time::sleep(delay).await;

                let mut headers = event_bus::event_headers(&event);
                event_bus::set_retry_count(&mut headers, attempt + 1);
                event_bus::publish_confirmed(
                    channel,
                    self.role.routing_key(),
                    &delivery.data,
                    headers,
                )
                .await
                .context("failed to republish for retry")?;

                self.metrics.retried.inc();
                self.ack(delivery).await
            }
        }
    }

    async fn ack(&self, delivery: Delivery) -> Result<()> {
        delivery
            .ack(BasicAckOptions::default())
            .await
            .context("failed to ack delivery")
    }

    async fn dead_letter(
        &self,
        channel: &Channel,
        delivery: &Delivery,
        reason: DeadLetterReason,
        decoded: Option<Value>,
        kind: &str,
        message: &str,
    ) -> Result<()> {
        let envelope = DeadLetterEnvelope::new(
            reason,
            DeadLetterSource {
                queue: queue_name(self.role.routing_key()),
                routing_key: delivery.routing_key.to_string(),
                delivery_tag: delivery.delivery_tag,
            },
            &delivery.data,
            decoded,
            kind,
            message,
        );
        event_bus::publish_dead_letter(channel, &envelope)
            .await
            .context("failed to publish to DLQ")?;
        self.metrics.dead_lettered.inc();
        Ok(())
    }
}
