//! Shared-token producer authentication.

use actix_web::HttpRequest;

use crate::config::{AuthMode, AuthSettings};
use crate::error::IngestError;

/// Check the `Authorization: Bearer` header against the configured token.
///
/// Missing header maps to 401, wrong token to 403. `AuthMode::None` admits
/// everything (trusted-network deployments).
pub fn authorize(req: &HttpRequest, auth: &AuthSettings) -> Result<(), IngestError> {
    if auth.mode == AuthMode::None {
        return Ok(());
    }

    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(IngestError::Unauthorized)?;

    let presented = header
        .strip_prefix("Bearer ")
        .ok_or(IngestError::Unauthorized)?;

    match &auth.token {
        Some(expected) if presented == expected => Ok(()),
        _ => Err(IngestError::Forbidden),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn token_settings() -> AuthSettings {
        AuthSettings {
            mode: AuthMode::Token,
            token: Some("s3cret-token".to_string()),
        }
    }

    #[test]
    fn none_mode_admits_everything() {
        let req = TestRequest::default().to_http_request();
        let settings = AuthSettings {
            mode: AuthMode::None,
            token: None,
        };
        assert!(authorize(&req, &settings).is_ok());
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(
            authorize(&req, &token_settings()),
            Err(IngestError::Unauthorized)
        ));
    }

    #[test]
    fn wrong_token_is_forbidden() {
        let req = TestRequest::default()
            .insert_header(("authorization", "Bearer nope"))
            .to_http_request();
        assert!(matches!(
            authorize(&req, &token_settings()),
            Err(IngestError::Forbidden)
        ));
    }

    #[test]
    fn correct_token_is_accepted() {
        let req = TestRequest::default()
            .insert_header(("authorization", "Bearer s3cret-token"))
            .to_http_request();
        assert!(authorize(&req, &token_settings()).is_ok());
    }
}
