//! External diff computation.
//!
//! The diff algorithm lives in a separate service; the pipeline only
//! knows the `Differ` seam. Implementations receive the two content
//! references (stored-capture URLs or paths) and return the raw diff
//! payload. Calls may take seconds and hold no database state, so a
//! timed-out or cancelled call costs nothing but the backlog
//! redelivery.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result, ServiceErrorKind};

/// Computes the structural difference between two stored captures.
#[async_trait]
pub trait Differ: Send + Sync {
    /// `from_ref` and `to_ref` are the content references of the
    /// ancestor and the newer snapshot, in that order.
    async fn compute(&self, from_ref: &str, to_ref: &str) -> Result<Value>;
}

/// HTTP client for the diff service.
///
/// The service exposes `GET /diff?a=<ref>&b=<ref>` returning the diff
/// payload as JSON. Timeouts, non-OK statuses, and transport failures
/// all surface as distinguishable `ExternalService` kinds.
pub struct HttpDiffer {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpDiffer {
    pub fn new(base_url: &str, token: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.diff_service_url,
            config.diff_service_token.clone(),
            Duration::from_secs(config.diff_timeout_secs),
        )
    }
}

#[async_trait]
impl Differ for HttpDiffer {
    async fn compute(&self, from_ref: &str, to_ref: &str) -> Result<Value> {
        let mut request = self
            .client
            .get(format!("{}/diff", self.base_url))
            .query(&[("a", from_ref), ("b", to_ref)]);

        if let Some(ref token) = self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ExternalService {
                kind: ServiceErrorKind::Status,
                message: format!("diff service returned {status}"),
            });
        }

        let payload: Value = response.json().await?;
        Ok(payload)
    }
}
