//! Configuration for the ingest service.
//!
//! Loaded once at startup from environment variables (plus `.env` in
//! development); nothing outside this module and `main` reads the
//! environment.

use anyhow::{Context, Result};
use db_pool::DbConfig;
use event_schema::EnvelopeMode;
use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub ingest: IngestSettings,
    pub database: DbConfig,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Ok(Settings {
            server: ServerSettings::from_env()?,
            auth: AuthSettings::from_env()?,
            ingest: IngestSettings::from_env(),
            database: DbConfig::from_env("ingest-service")
                .context("database configuration invalid")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        let port = env::var("HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("Invalid HTTP_PORT")?;
        Ok(Self { port })
    }
}

/// Producer authentication. JWT verification is handled upstream; the service
/// itself supports either open ingestion (trusted network) or a shared
/// bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Token,
}

#[derive(Clone)]
pub struct AuthSettings {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("mode", &self.mode)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AuthSettings {
    fn from_env() -> Result<Self> {
        let mode = match env::var("AUTH_MODE").as_deref() {
            Ok("token") => AuthMode::Token,
            Ok("none") | Err(_) => AuthMode::None,
            Ok(other) => anyhow::bail!("Invalid AUTH_MODE: {other}"),
        };
        let token = env::var("AUTH_TOKEN").ok();
        if mode == AuthMode::Token && token.is_none() {
            anyhow::bail!("AUTH_MODE=token requires AUTH_TOKEN");
        }
        Ok(Self { mode, token })
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Strict vs lax envelope dialect.
    pub envelope_mode: EnvelopeMode,
    /// Inbound header consulted for a trace id when a lax envelope omits one.
    pub trace_id_header: String,
    /// Reject opted-out identifiers with `opted_out` (default) or silently
    /// accept-and-drop.
    pub reject_opted_out: bool,
}

impl IngestSettings {
    fn from_env() -> Self {
        let strict = env::var("STRICT_ENVELOPE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            envelope_mode: if strict {
                EnvelopeMode::Strict
            } else {
                EnvelopeMode::Lax
            },
            trace_id_header: env::var("TRACE_ID_HEADER")
                .unwrap_or_else(|_| "x-trace-id".to_string()),
            reject_opted_out: env::var("REJECT_OPTED_OUT")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }
}
