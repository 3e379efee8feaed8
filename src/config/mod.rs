//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Base URL of the external diff service.
    pub diff_service_url: String,
    /// Bearer token for the diff service, if it requires one.
    pub diff_service_token: Option<SecretString>,
    /// Per-request timeout for diff computations, in seconds.
    pub diff_timeout_secs: u64,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let diff_timeout_secs = match std::env::var("DIFF_TIMEOUT_SECS") {
            Ok(s) => s
                .parse()
                .map_err(|_| Error::Config(format!("DIFF_TIMEOUT_SECS is not a number: {s}")))?,
            Err(_) => 30,
        };

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            diff_service_url: required_var("DIFF_SERVICE_URL")?,
            diff_service_token: std::env::var("DIFF_SERVICE_TOKEN")
                .ok()
                .map(SecretString::from),
            diff_timeout_secs,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
