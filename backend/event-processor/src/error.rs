//! Dispatch error model.
//!
//! Every failure inside a dispatch is collapsed into one of two variants
//! before any control-flow decision: transient errors feed the retry ladder,
//! permanent errors go straight to the DLQ with a reason tag.

use error_types::{classify_sqlx, ErrorClass};
use event_schema::DeadLetterReason;
use geo_enrich::GeoError;
use idempotent_consumer::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("permanent failure ({kind}): {message}")]
    Permanent {
        reason: DeadLetterReason,
        kind: String,
        message: String,
    },
}

impl DispatchError {
    pub fn transient(message: impl Into<String>) -> Self {
        DispatchError::Transient {
            message: message.into(),
        }
    }

    pub fn minimal_event(message: impl Into<String>) -> Self {
        DispatchError::Permanent {
            reason: DeadLetterReason::MinimalEvent,
            kind: "ValidationError".to_string(),
            message: message.into(),
        }
    }

    pub fn permanent_business(kind: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::Permanent {
            reason: DeadLetterReason::PermanentBusiness,
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Transient { .. })
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        match classify_sqlx(&err) {
            ErrorClass::Transient => DispatchError::transient(err.to_string()),
            ErrorClass::Permanent => {
                DispatchError::permanent_business("sqlx::Error", err.to_string())
            }
        }
    }
}

impl From<LedgerError> for DispatchError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Database(db) => DispatchError::from(db),
            LedgerError::InvalidRetention(msg) => {
                DispatchError::permanent_business("LedgerError", msg)
            }
        }
    }
}

impl From<GeoError> for DispatchError {
    fn from(err: GeoError) -> Self {
        match err {
            GeoError::InvalidCoordinates(e) => {
                DispatchError::permanent_business("InvalidCoordinates", e.to_string())
            }
            GeoError::Database(db) => DispatchError::from(db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_maps_to_transient() {
        let err = DispatchError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }

    #[test]
    fn decode_error_maps_to_permanent() {
        let err = DispatchError::from(sqlx::Error::ColumnNotFound("x".into()));
        assert!(!err.is_transient());
        match err {
            DispatchError::Permanent { reason, .. } => {
                assert_eq!(reason, DeadLetterReason::PermanentBusiness);
            }
            _ => panic!("expected permanent"),
        }
    }

    #[test]
    fn invalid_coordinates_are_permanent() {
        let geo_err = geo_enrich::CellSet::derive(95.0, 0.0).unwrap_err();
        let err = DispatchError::from(geo_err);
        assert!(!err.is_transient());
    }
}
