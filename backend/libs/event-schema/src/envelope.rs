//! Producer envelopes and normalization.
//!
//! Two envelope dialects are accepted, selected by configuration. The strict
//! dialect requires every field; the lax dialect tolerates legacy aliases and
//! fills in generated/defaulted values. Both converge on [`NormalizedEvent`],
//! the only shape the rest of the pipeline ever sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Minimum accepted length for anonymized identifiers.
pub const MIN_IDENTIFIER_LEN: usize = 8;
/// Maximum accepted length for anonymized identifiers.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Envelope dialect selected by the `STRICT_ENVELOPE` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeMode {
    Strict,
    Lax,
}

/// Optional geolocation carried in `context.geo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoContext {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: f64,
    #[serde(default)]
    pub source: Option<String>,
}

/// Strict producer envelope: every field present and well-typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrictEnvelope {
    pub event_id: Uuid,
    pub event_name: String,
    pub occurred_at: DateTime<Utc>,
    pub trace_id: Uuid,
    pub producer: String,
    pub actor: String,
    pub app_uuid: Uuid,
    pub anon_user_id: String,
    pub device_id_hash: String,
    pub session_id: String,
    pub sdk_version: String,
    pub event_version: String,
    pub payload: Value,
    pub context: Value,
}

/// Lax producer envelope: legacy aliases honored, identifiers generated and
/// producer/actor defaulted when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaxEnvelope {
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default, alias = "event_type")]
    pub event_name: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trace_id: Option<Uuid>,
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    pub app_uuid: Uuid,
    pub anon_user_id: String,
    pub device_id_hash: String,
    pub session_id: String,
    #[serde(default)]
    pub sdk_version: Option<String>,
    #[serde(default)]
    pub event_version: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub context: Value,
}

/// The accepted envelope, tagged by dialect.
#[derive(Debug, Clone)]
pub enum Envelope {
    Strict(StrictEnvelope),
    Lax(LaxEnvelope),
}

impl Envelope {
    /// Decode a raw JSON document under the configured dialect.
    pub fn decode(mode: EnvelopeMode, value: &Value) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(ValidationError::NotAnObject);
        }
        match mode {
            EnvelopeMode::Strict => serde_json::from_value::<StrictEnvelope>(value.clone())
                .map(Envelope::Strict)
                .map_err(|e| ValidationError::Envelope(e.to_string())),
            EnvelopeMode::Lax => serde_json::from_value::<LaxEnvelope>(value.clone())
                .map(Envelope::Lax)
                .map_err(|e| ValidationError::Envelope(e.to_string())),
        }
    }

    /// Normalize into the internal record, applying lax defaults and the
    /// identifier hygiene rules.
    pub fn normalize(self) -> Result<NormalizedEvent, ValidationError> {
        let event = match self {
            Envelope::Strict(s) => NormalizedEvent {
                event_id: s.event_id,
                trace_id: s.trace_id,
                event_name: s.event_name,
                occurred_at: s.occurred_at,
                producer: s.producer,
                actor: s.actor,
                app_uuid: s.app_uuid,
                anon_user_id: s.anon_user_id,
                device_id_hash: s.device_id_hash,
                session_id: s.session_id,
                sdk_version: s.sdk_version,
                event_version: s.event_version,
                payload: s.payload,
                context: s.context,
            },
            Envelope::Lax(l) => NormalizedEvent {
                event_id: l.event_id.unwrap_or_else(Uuid::new_v4),
                trace_id: l.trace_id.unwrap_or_else(Uuid::new_v4),
                event_name: l
                    .event_name
                    .ok_or(ValidationError::MissingField("event_name"))?,
                occurred_at: l
                    .occurred_at
                    .ok_or(ValidationError::MissingField("occurred_at"))?,
                producer: l.producer.unwrap_or_else(|| "unknown".to_string()),
                actor: l.actor.unwrap_or_else(|| "anonymous".to_string()),
                app_uuid: l.app_uuid,
                anon_user_id: l.anon_user_id,
                device_id_hash: l.device_id_hash,
                session_id: l.session_id,
                sdk_version: l.sdk_version.unwrap_or_default(),
                event_version: l.event_version.unwrap_or_else(|| "1".to_string()),
                payload: l.payload,
                context: l.context,
            },
        };
        event.validate()?;
        Ok(event)
    }
}

/// The single internal event record used by every downstream component.
///
/// This is also the wire payload staged in the outbox and published to the
/// exchange, so it round-trips through serde unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_id: Uuid,
    pub trace_id: Uuid,
    pub event_name: String,
    pub occurred_at: DateTime<Utc>,
    pub producer: String,
    pub actor: String,
    pub app_uuid: Uuid,
    pub anon_user_id: String,
    pub device_id_hash: String,
    pub session_id: String,
    pub sdk_version: String,
    pub event_version: String,
    pub payload: Value,
    pub context: Value,
}

impl NormalizedEvent {
    /// Identifier hygiene: anonymized identifiers must look like opaque
    /// tokens. There is no length escape hatch: a raw email or phone number
    /// fails the charset check.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_identifier("anon_user_id", &self.anon_user_id)?;
        validate_identifier("device_id_hash", &self.device_id_hash)?;
        validate_identifier("session_id", &self.session_id)?;
        if self.event_name.is_empty() {
            return Err(ValidationError::MissingField("event_name"));
        }
        if self.geo_context().is_err() {
            return Err(ValidationError::InvalidGeo);
        }
        Ok(())
    }

    /// Extract `context.geo` when present.
    ///
    /// Returns `Ok(None)` when no geo block exists and `Err` when one exists
    /// but is malformed.
    pub fn geo_context(&self) -> Result<Option<GeoContext>, ValidationError> {
        match self.context.get("geo") {
            None | Some(Value::Null) => Ok(None),
            Some(geo) => serde_json::from_value::<GeoContext>(geo.clone())
                .map(Some)
                .map_err(|_| ValidationError::InvalidGeo),
        }
    }
}

fn validate_identifier(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let len_ok = (MIN_IDENTIFIER_LEN..=MAX_IDENTIFIER_LEN).contains(&value.len());
    let charset_ok = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
    if len_ok && charset_ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier(field))
    }
}

/// Envelope rejection reasons, mapped to per-item error codes in the batch
/// response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("invalid envelope: {0}")]
    Envelope(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("identifier field {0} does not match the anonymized token pattern")]
    InvalidIdentifier(&'static str),

    #[error("context.geo is present but malformed")]
    InvalidGeo,
}

impl ValidationError {
    /// Stable machine-readable code for the batch response.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::NotAnObject => "not_an_object",
            ValidationError::Envelope(_) => "invalid_envelope",
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::InvalidIdentifier(_) => "invalid_identifier",
            ValidationError::InvalidGeo => "invalid_geo",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strict_doc() -> Value {
        json!({
            "event_id": "6f2b40c8-6f1a-4f0e-9c2e-0f6f2a8b1c3d",
            "event_name": "geo.ping",
            "occurred_at": "2026-01-25T10:05:00Z",
            "trace_id": "0d4f0c6a-90ab-4a7e-8a13-3a9b6e9e8f21",
            "producer": "mobile-sdk",
            "actor": "device",
            "app_uuid": "b2a1f8ee-0f0a-4f57-8a60-3f0c5b94d7b7",
            "anon_user_id": "u_demo_12345678",
            "device_id_hash": "d_demo_12345678",
            "session_id": "s_demo_12345678",
            "sdk_version": "2.4.1",
            "event_version": "1",
            "payload": {},
            "context": {"geo": {"lat": 18.4861, "lon": -69.9312, "accuracy_m": 20.0, "source": "gps"}}
        })
    }

    #[test]
    fn strict_envelope_round_trip() {
        let event = Envelope::decode(EnvelopeMode::Strict, &strict_doc())
            .unwrap()
            .normalize()
            .unwrap();
        assert_eq!(event.event_name, "geo.ping");
        let geo = event.geo_context().unwrap().unwrap();
        assert_eq!(geo.accuracy_m, 20.0);
        assert_eq!(geo.source.as_deref(), Some("gps"));
    }

    #[test]
    fn strict_rejects_missing_field() {
        let mut doc = strict_doc();
        doc.as_object_mut().unwrap().remove("event_id");
        let err = Envelope::decode(EnvelopeMode::Strict, &doc).unwrap_err();
        assert_eq!(err.code(), "invalid_envelope");
    }

    #[test]
    fn lax_accepts_legacy_aliases_and_defaults() {
        let doc = json!({
            "event_type": "session.start",
            "timestamp": "2026-01-25T10:05:00Z",
            "app_uuid": "b2a1f8ee-0f0a-4f57-8a60-3f0c5b94d7b7",
            "anon_user_id": "u_demo_12345678",
            "device_id_hash": "d_demo_12345678",
            "session_id": "s_demo_12345678"
        });
        let event = Envelope::decode(EnvelopeMode::Lax, &doc)
            .unwrap()
            .normalize()
            .unwrap();
        assert_eq!(event.event_name, "session.start");
        assert_eq!(event.producer, "unknown");
        assert_eq!(event.actor, "anonymous");
        assert_ne!(event.event_id, Uuid::nil());
        assert_ne!(event.trace_id, Uuid::nil());
    }

    #[test]
    fn lax_still_requires_event_name() {
        let doc = json!({
            "timestamp": "2026-01-25T10:05:00Z",
            "app_uuid": "b2a1f8ee-0f0a-4f57-8a60-3f0c5b94d7b7",
            "anon_user_id": "u_demo_12345678",
            "device_id_hash": "d_demo_12345678",
            "session_id": "s_demo_12345678"
        });
        let err = Envelope::decode(EnvelopeMode::Lax, &doc)
            .unwrap()
            .normalize()
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("event_name"));
    }

    #[test]
    fn identifier_pattern_rejects_pii_shapes() {
        let mut doc = strict_doc();
        doc["anon_user_id"] = json!("user@example.com");
        let err = Envelope::decode(EnvelopeMode::Strict, &doc)
            .unwrap()
            .normalize()
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidIdentifier("anon_user_id"));

        let mut doc = strict_doc();
        doc["session_id"] = json!("short");
        let err = Envelope::decode(EnvelopeMode::Strict, &doc)
            .unwrap()
            .normalize()
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidIdentifier("session_id"));
    }

    #[test]
    fn malformed_geo_is_rejected() {
        let mut doc = strict_doc();
        doc["context"] = json!({"geo": {"lat": "not-a-number"}});
        let err = Envelope::decode(EnvelopeMode::Strict, &doc)
            .unwrap()
            .normalize()
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidGeo);
    }

    #[test]
    fn absent_geo_is_fine() {
        let mut doc = strict_doc();
        doc["context"] = json!({});
        let event = Envelope::decode(EnvelopeMode::Strict, &doc)
            .unwrap()
            .normalize()
            .unwrap();
        assert!(event.geo_context().unwrap().is_none());
    }
}
