//! Broker topology: the `sb.events` topic exchange and its durable queues.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::info;

use crate::BusError;
use event_schema::routing;

/// The single durable topic exchange all events flow through.
pub const EXCHANGE: &str = "sb.events";

/// Retention policy applied to the raw firehose and the P2 queues: messages
/// expire after 24 h and the queue drops its oldest entries beyond 100k.
const MESSAGE_TTL_MS: i64 = 24 * 60 * 60 * 1000;
const MAX_QUEUE_LENGTH: i64 = 100_000;

/// A durable queue and its binding.
#[derive(Debug, Clone, Copy)]
pub struct QueueSpec {
    pub routing_key: &'static str,
    /// Whether the protective TTL/max-length/overflow policy applies.
    pub protected: bool,
}

impl QueueSpec {
    pub fn queue_name(&self) -> String {
        routing::queue_name(self.routing_key)
    }
}

/// Full queue set: seven domain queues plus the DLQ. The geo and license
/// queues feed materializers and must not shed load; the raw firehose and the
/// P2 queues (session/screen/ui/system) are protected against unbounded
/// growth while they have no consumer doing real work.
pub const QUEUES: [QueueSpec; 8] = [
    QueueSpec { routing_key: routing::RK_RAW, protected: true },
    QueueSpec { routing_key: routing::RK_GEO, protected: false },
    QueueSpec { routing_key: routing::RK_LICENSE, protected: false },
    QueueSpec { routing_key: routing::RK_SESSION, protected: true },
    QueueSpec { routing_key: routing::RK_SCREEN, protected: true },
    QueueSpec { routing_key: routing::RK_UI, protected: true },
    QueueSpec { routing_key: routing::RK_SYSTEM, protected: true },
    QueueSpec { routing_key: routing::RK_DLQ, protected: false },
];

/// Idempotently declare the exchange, all queues and their bindings.
///
/// Safe to call on every (re)connect; RabbitMQ treats re-declaration with
/// identical arguments as a no-op.
pub async fn declare_topology(channel: &Channel) -> Result<(), BusError> {
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    for spec in QUEUES {
        let mut args = FieldTable::default();
        if spec.protected {
            args.insert("x-message-ttl".into(), AMQPValue::LongLongInt(MESSAGE_TTL_MS));
            args.insert("x-max-length".into(), AMQPValue::LongLongInt(MAX_QUEUE_LENGTH));
            args.insert("x-overflow".into(), AMQPValue::LongString("drop-head".into()));
        }

        let queue = spec.queue_name();
        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await?;

        channel
            .queue_bind(
                &queue,
                EXCHANGE,
                spec.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    info!(exchange = EXCHANGE, queues = QUEUES.len(), "Broker topology declared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_follow_stem_convention() {
        for spec in QUEUES {
            assert_eq!(spec.queue_name(), format!("{}.q", spec.routing_key));
        }
    }

    #[test]
    fn materializer_queues_are_unprotected() {
        for spec in QUEUES {
            let expect_protected = !matches!(
                spec.routing_key,
                routing::RK_GEO | routing::RK_LICENSE | routing::RK_DLQ
            );
            assert_eq!(spec.protected, expect_protected, "{}", spec.routing_key);
        }
    }
}
