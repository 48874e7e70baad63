//! License family materializer.
//!
//! Keeps the latest licensing snapshot per `(app_uuid, anon_user_id)`. The
//! upsert is gated on `event_ts >= updated_at` so late-arriving events never
//! overwrite newer state (ties resolve to the incoming event).

use chrono::{DateTime, Utc};
use event_schema::NormalizedEvent;
use serde_json::Value;
use sqlx::{Postgres, Transaction};

use crate::error::DispatchError;

/// License fields extracted from the event payload. Producers have shipped
/// both `plan_type`/`plan` and `license_status`/`status` spellings.
#[derive(Debug, Clone, PartialEq)]
pub struct LicenseFields {
    pub plan_type: Option<String>,
    pub license_status: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LicenseFields {
    pub fn from_payload(payload: &Value) -> Result<Self, DispatchError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| DispatchError::minimal_event("license event without object payload"))?;

        let fields = Self {
            plan_type: string_field(obj, &["plan_type", "plan"]),
            license_status: string_field(obj, &["license_status", "status"]),
            started_at: ts_field(obj, "started_at")?,
            renewed_at: ts_field(obj, "renewed_at")?,
            expires_at: ts_field(obj, "expires_at")?,
        };

        if fields.plan_type.is_none() && fields.license_status.is_none() {
            return Err(DispatchError::minimal_event(
                "license event carries neither plan nor status",
            ));
        }
        Ok(fields)
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| obj.get(*n))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn ts_field(
    obj: &serde_json::Map<String, Value>,
    name: &str,
) -> Result<Option<DateTime<Utc>>, DispatchError> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| {
                DispatchError::minimal_event(format!("unparseable {name} timestamp: {e}"))
            }),
        Some(other) => Err(DispatchError::minimal_event(format!(
            "{name} must be an ISO-8601 string, got {other}"
        ))),
    }
}

pub async fn materialize(
    tx: &mut Transaction<'_, Postgres>,
    event: &NormalizedEvent,
) -> Result<(), DispatchError> {
    let fields = LicenseFields::from_payload(&event.payload)?;

    sqlx::query(
        r#"
        INSERT INTO license_state (
            app_uuid, anon_user_id, plan_type, license_status,
            started_at, renewed_at, expires_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (app_uuid, anon_user_id) DO UPDATE SET
            plan_type = EXCLUDED.plan_type,
            license_status = EXCLUDED.license_status,
            started_at = EXCLUDED.started_at,
            renewed_at = EXCLUDED.renewed_at,
            expires_at = EXCLUDED.expires_at,
            updated_at = EXCLUDED.updated_at
        WHERE license_state.updated_at <= EXCLUDED.updated_at
        "#,
    )
    .bind(event.app_uuid)
    .bind(&event.anon_user_id)
    .bind(&fields.plan_type)
    .bind(&fields.license_status)
    .bind(fields.started_at)
    .bind(fields.renewed_at)
    .bind(fields.expires_at)
    .bind(event.occurred_at)
    .execute(&mut **tx)
    .await?;

    // Mirror into the per-user snapshot under the same recency gate, and
    // count the license event unconditionally.
    sqlx::query(
        r#"
        INSERT INTO customer_360 (
            app_uuid, anon_user_id, first_seen, last_seen,
            last_event_name, last_event_ts,
            license_events_count,
            license_plan_type, license_status, license_expires_at, license_updated_at
        ) VALUES ($1, $2, $3, $3, $4, $3, 1, $5, $6, $7, $3)
        ON CONFLICT (app_uuid, anon_user_id) DO UPDATE SET
            first_seen = LEAST(customer_360.first_seen, EXCLUDED.first_seen),
            last_seen = GREATEST(customer_360.last_seen, EXCLUDED.last_seen),
            last_event_name = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_event_name ELSE customer_360.last_event_name END,
            last_event_ts = CASE WHEN EXCLUDED.last_event_ts >= customer_360.last_seen
                THEN EXCLUDED.last_event_ts ELSE customer_360.last_event_ts END,
            license_events_count = customer_360.license_events_count + 1,
            license_plan_type = CASE WHEN customer_360.license_updated_at IS NULL
                    OR EXCLUDED.license_updated_at >= customer_360.license_updated_at
                THEN EXCLUDED.license_plan_type ELSE customer_360.license_plan_type END,
            license_status = CASE WHEN customer_360.license_updated_at IS NULL
                    OR EXCLUDED.license_updated_at >= customer_360.license_updated_at
                THEN EXCLUDED.license_status ELSE customer_360.license_status END,
            license_expires_at = CASE WHEN customer_360.license_updated_at IS NULL
                    OR EXCLUDED.license_updated_at >= customer_360.license_updated_at
                THEN EXCLUDED.license_expires_at ELSE customer_360.license_expires_at END,
            license_updated_at = CASE WHEN customer_360.license_updated_at IS NULL
                    OR EXCLUDED.license_updated_at >= customer_360.license_updated_at
                THEN EXCLUDED.license_updated_at ELSE customer_360.license_updated_at END
        "#,
    )
    .bind(event.app_uuid)
    .bind(&event.anon_user_id)
    .bind(event.occurred_at)
    .bind(&event.event_name)
    .bind(&fields.plan_type)
    .bind(&fields.license_status)
    .bind(fields.expires_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_canonical_field_names() {
        let fields = LicenseFields::from_payload(&json!({
            "plan_type": "pro",
            "license_status": "active",
            "started_at": "2026-01-01T00:00:00Z",
            "expires_at": "2027-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(fields.plan_type.as_deref(), Some("pro"));
        assert_eq!(fields.license_status.as_deref(), Some("active"));
        assert!(fields.started_at.is_some());
        assert!(fields.renewed_at.is_none());
        assert!(fields.expires_at.is_some());
    }

    #[test]
    fn accepts_legacy_field_spellings() {
        let fields = LicenseFields::from_payload(&json!({
            "plan": "trial",
            "status": "expired"
        }))
        .unwrap();
        assert_eq!(fields.plan_type.as_deref(), Some("trial"));
        assert_eq!(fields.license_status.as_deref(), Some("expired"));
    }

    #[test]
    fn empty_payload_is_a_minimal_event() {
        let err = LicenseFields::from_payload(&json!({})).unwrap_err();
        assert!(!err.is_transient());

        let err = LicenseFields::from_payload(&json!(null)).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn bad_timestamp_is_permanent() {
        let err = LicenseFields::from_payload(&json!({
            "plan_type": "pro",
            "expires_at": "next tuesday"
        }))
        .unwrap_err();
        assert!(!err.is_transient());
    }
}
