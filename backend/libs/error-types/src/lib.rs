//! Shared error taxonomy for the event pipeline.
//!
//! Every failure observed by the outbox relay or the event processor is
//! classified into exactly one of two kinds before any control-flow decision
//! is made:
//!
//! - [`ErrorClass::Transient`]: connection drops, pool exhaustion, deadlocks,
//!   lock/statement timeouts. Retried locally with backoff.
//! - [`ErrorClass::Permanent`]: malformed documents, schema and constraint
//!   violations, anything a retry cannot fix. Routed to the dead-letter queue.
//!
//! The classifiers below replace catch-by-exception-type control flow with an
//! explicit mapping from driver error codes to a tagged value, so the retry
//! policy lives in one place and is unit-testable without a database.

use thiserror::Error;

/// Retryability of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff: the operation may succeed later.
    Transient,
    /// Retrying cannot help: the input or the schema is at fault.
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// A failure paired with its classification, for logging and DLQ envelopes.
#[derive(Debug, Error)]
#[error("{class:?} failure: {message}")]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub message: String,
}

impl ClassifiedError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }
}

/// PostgreSQL SQLSTATE code of a unique constraint violation.
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// Classify a database error.
///
/// SQLSTATE classes 08 (connection), 40 (serialization/deadlock), 53
/// (insufficient resources), 55P03 (lock not available) and 57014 (statement
/// cancelled by timeout) are transient. Everything else that carries a code
/// (data errors in 22, constraint violations in 23, syntax/undefined object
/// errors in 42) is permanent. Driver-level I/O and pool errors are transient.
pub fn classify_sqlx(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorClass::Transient,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) => classify_sqlstate(code),
            None => ErrorClass::Transient,
        },
        sqlx::Error::Protocol(_) => ErrorClass::Transient,
        sqlx::Error::RowNotFound => ErrorClass::Permanent,
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => ErrorClass::Permanent,
        _ => ErrorClass::Transient,
    }
}

/// Classify a raw SQLSTATE code.
pub fn classify_sqlstate(code: &str) -> ErrorClass {
    match code {
        "55P03" | "57014" => ErrorClass::Transient,
        _ if code.starts_with("08") || code.starts_with("40") || code.starts_with("53") => {
            ErrorClass::Transient
        }
        _ => ErrorClass::Permanent,
    }
}

/// Classify a broker error. AMQP failures are connection-scoped by nature:
/// channel/connection closures, I/O errors and protocol hiccups all clear on
/// reconnect, so the whole surface is transient except for client-side
/// serialization bugs (which lapin does not surface as `Error` anyway).
pub fn classify_amqp(_err: &lapin::Error) -> ErrorClass {
    ErrorClass::Transient
}

/// Whether a database error is a unique constraint violation, optionally on a
/// specific constraint. Collisions on idempotency keys are expected control
/// flow, not failures.
pub fn is_unique_violation(err: &sqlx::Error, constraint: Option<&str>) -> bool {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(PG_UNIQUE_VIOLATION) => {
            match constraint {
                Some(name) => db.constraint() == Some(name),
                None => true,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_class_is_transient() {
        assert_eq!(classify_sqlstate("08006"), ErrorClass::Transient);
        assert_eq!(classify_sqlstate("08001"), ErrorClass::Transient);
    }

    #[test]
    fn deadlock_and_serialization_are_transient() {
        assert_eq!(classify_sqlstate("40001"), ErrorClass::Transient);
        assert_eq!(classify_sqlstate("40P01"), ErrorClass::Transient);
    }

    #[test]
    fn resource_and_timeout_codes_are_transient() {
        assert_eq!(classify_sqlstate("53300"), ErrorClass::Transient);
        assert_eq!(classify_sqlstate("55P03"), ErrorClass::Transient);
        assert_eq!(classify_sqlstate("57014"), ErrorClass::Transient);
    }

    #[test]
    fn constraint_and_data_errors_are_permanent() {
        assert_eq!(classify_sqlstate(PG_UNIQUE_VIOLATION), ErrorClass::Permanent);
        assert_eq!(classify_sqlstate("23503"), ErrorClass::Permanent);
        assert_eq!(classify_sqlstate("22P02"), ErrorClass::Permanent);
        assert_eq!(classify_sqlstate("42703"), ErrorClass::Permanent);
    }

    #[test]
    fn pool_errors_are_transient() {
        assert_eq!(classify_sqlx(&sqlx::Error::PoolTimedOut), ErrorClass::Transient);
        assert_eq!(classify_sqlx(&sqlx::Error::PoolClosed), ErrorClass::Transient);
    }

    #[test]
    fn decode_errors_are_permanent() {
        assert_eq!(
            classify_sqlx(&sqlx::Error::ColumnNotFound("missing".into())),
            ErrorClass::Permanent
        );
    }
}
