//! Dead-letter envelope.
//!
//! Whatever reaches the DLQ must be diagnosable without replaying it: the
//! envelope carries the failure time, a coarse reason, where the message came
//! from, the raw bytes (base64, since they may not be valid JSON) and the
//! decoded document when decoding got that far.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Payload was not valid JSON.
    JsonDecode,
    /// Payload decoded but is not an event document.
    InvalidDocumentType,
    /// Document lacks the minimum envelope fields for its family.
    MinimalEvent,
    /// Dispatch failed with a non-retryable business error.
    PermanentBusiness,
}

/// Where the failed message was consumed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterSource {
    pub queue: String,
    pub routing_key: String,
    pub delivery_tag: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterPayload {
    pub raw_value_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    pub failed_at: DateTime<Utc>,
    pub reason: DeadLetterReason,
    pub source: DeadLetterSource,
    pub payload: DeadLetterPayload,
    pub error: DeadLetterError,
}

impl DeadLetterEnvelope {
    pub fn new(
        reason: DeadLetterReason,
        source: DeadLetterSource,
        raw: &[u8],
        decoded: Option<Value>,
        error_kind: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            failed_at: Utc::now(),
            reason,
            source,
            payload: DeadLetterPayload {
                raw_value_b64: BASE64.encode(raw),
                decoded,
            },
            error: DeadLetterError {
                kind: error_kind.into(),
                message: error_message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(DeadLetterReason::JsonDecode).unwrap(),
            json!("json_decode")
        );
        assert_eq!(
            serde_json::to_value(DeadLetterReason::InvalidDocumentType).unwrap(),
            json!("invalid_document_type")
        );
        assert_eq!(
            serde_json::to_value(DeadLetterReason::MinimalEvent).unwrap(),
            json!("minimal_event")
        );
        assert_eq!(
            serde_json::to_value(DeadLetterReason::PermanentBusiness).unwrap(),
            json!("permanent_business")
        );
    }

    #[test]
    fn envelope_carries_raw_bytes_and_decoded_doc() {
        let source = DeadLetterSource {
            queue: "sb.events.geo.q".into(),
            routing_key: "sb.events.geo".into(),
            delivery_tag: 42,
        };
        let env = DeadLetterEnvelope::new(
            DeadLetterReason::MinimalEvent,
            source,
            br#"{"event_name":"geo.ping"}"#,
            Some(json!({"event_name": "geo.ping"})),
            "ValidationError",
            "missing context.geo",
        );

        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["reason"], "minimal_event");
        assert_eq!(value["source"]["delivery_tag"], 42);
        assert_eq!(value["error"]["type"], "ValidationError");
        let raw = BASE64
            .decode(value["payload"]["raw_value_b64"].as_str().unwrap())
            .unwrap();
        assert_eq!(raw, br#"{"event_name":"geo.ping"}"#);
    }

    #[test]
    fn decoded_is_omitted_when_absent() {
        let env = DeadLetterEnvelope::new(
            DeadLetterReason::JsonDecode,
            DeadLetterSource {
                queue: "sb.events.geo.q".into(),
                routing_key: "sb.events.geo".into(),
                delivery_tag: 1,
            },
            b"not json",
            None,
            "serde_json::Error",
            "expected value at line 1",
        );
        let value = serde_json::to_value(&env).unwrap();
        assert!(value["payload"].get("decoded").is_none());
    }
}
