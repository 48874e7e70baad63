use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Database unavailable or failing: the whole batch is rejected with a
    /// 5xx so producers retry.
    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing credentials")]
    Unauthorized,

    #[error("Invalid credentials")]
    Forbidden,

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for IngestError {
    fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngestError::Forbidden => StatusCode::FORBIDDEN,
            IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        HttpResponse::build(code).json(ErrorResponse {
            error: self.to_string(),
            code: code.as_u16(),
        })
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Database(err.to_string())
    }
}

impl From<transactional_outbox::OutboxError> for IngestError {
    fn from(err: transactional_outbox::OutboxError) -> Self {
        IngestError::Database(err.to_string())
    }
}
