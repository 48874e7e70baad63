//! Message header conventions.
//!
//! Published messages carry the event identity in headers so operators can
//! trace a message without decoding its body. The processor's retry ladder
//! rides on the `sb_retry` header.

use chrono::{DateTime, SecondsFormat, Utc};
use event_schema::NormalizedEvent;
use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use uuid::Uuid;

/// Header carrying the processor retry count.
pub const RETRY_HEADER: &str = "sb_retry";

/// Identity headers from the individual fields (used by the outbox relay,
/// which works from table rows rather than decoded events).
pub fn identity_headers(
    event_id: Uuid,
    trace_id: Uuid,
    occurred_at: DateTime<Utc>,
    app_uuid: Uuid,
) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        "event_id".into(),
        AMQPValue::LongString(event_id.to_string().into()),
    );
    headers.insert(
        "trace_id".into(),
        AMQPValue::LongString(trace_id.to_string().into()),
    );
    headers.insert(
        "occurred_at".into(),
        AMQPValue::LongString(
            occurred_at
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into(),
        ),
    );
    headers.insert(
        "app_uuid".into(),
        AMQPValue::LongString(app_uuid.to_string().into()),
    );
    headers
}

/// Standard identity headers for a published event.
pub fn event_headers(event: &NormalizedEvent) -> FieldTable {
    identity_headers(
        event.event_id,
        event.trace_id,
        event.occurred_at,
        event.app_uuid,
    )
}

/// Read the retry count from delivery properties; absent header means first
/// attempt.
pub fn retry_count(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|h| h.inner().get(RETRY_HEADER))
        .and_then(|v| match v {
            AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
            AMQPValue::ShortShortInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongUInt(n) => Some(*n),
            AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
            AMQPValue::ShortShortUInt(n) => Some(u32::from(*n)),
            _ => None,
        })
        .unwrap_or(0)
}

/// Set (or overwrite) the retry count on a header table.
pub fn set_retry_count(headers: &mut FieldTable, count: u32) {
    headers.insert(RETRY_HEADER.into(), AMQPValue::LongInt(count as i32));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_retry_header_means_zero() {
        let properties = BasicProperties::default();
        assert_eq!(retry_count(&properties), 0);
    }

    #[test]
    fn retry_header_round_trips() {
        let mut headers = FieldTable::default();
        set_retry_count(&mut headers, 3);
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(retry_count(&properties), 3);
    }

    #[test]
    fn retry_header_accepts_broker_numeric_widths() {
        for value in [
            AMQPValue::LongLongInt(5),
            AMQPValue::LongUInt(5),
            AMQPValue::ShortUInt(5),
        ] {
            let mut headers = FieldTable::default();
            headers.insert(RETRY_HEADER.into(), value);
            let properties = BasicProperties::default().with_headers(headers);
            assert_eq!(retry_count(&properties), 5);
        }
    }
}
