//! HTTP scoring capability
//!
//! POSTs the raw asset bytes to a scoring endpoint and expects a JSON body of
//! the form `{"score": 0.82, "metadata": {...}, "cost": 0.02}`. The blocking
//! `ureq` call runs on the blocking pool so workers stay responsive.

use crate::asset::Asset;
use crate::error::{MediagateError, MediagateResult};
use crate::stage::remote::{ScoreResponse, Scorer};
use crate::stage::CapabilityError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Scorer that calls a remote HTTP endpoint
pub struct HttpScorer {
    target: Arc<Target>,
    /// Set when a key variable was configured but not present
    missing_key: Option<String>,
}

/// Request settings shared with the blocking pool
struct Target {
    endpoint: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl HttpScorer {
    /// Create a scorer, reading the API key from `api_key_env` if given
    pub fn new(endpoint: &str, api_key_env: Option<&str>, timeout: Duration) -> MediagateResult<Self> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(MediagateError::User(format!(
                "Scoring endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }

        let (api_key, missing_key) = match api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.is_empty() => (Some(key), None),
                _ => {
                    warn!("API key variable {} is not set; calls to {} will be refused", var, endpoint);
                    (None, Some(var.to_string()))
                }
            },
            None => (None, None),
        };

        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();

        Ok(Self {
            target: Arc::new(Target {
                endpoint: endpoint.to_string(),
                api_key,
                agent: ureq::Agent::new_with_config(config),
            }),
            missing_key,
        })
    }
}

impl Target {
    fn post(&self, body: &[u8], content_type: &str, content_hash: &str) -> Result<ScoreResponse, CapabilityError> {
        let mut request = self
            .agent
            .post(&self.endpoint)
            .header("Content-Type", content_type)
            .header("X-Content-Hash", content_hash);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let mut response = request.send(body).map_err(classify)?;

        // Accepted by the provider from here on
        let text = response.body_mut().read_to_string().map_err(|e| {
            CapabilityError::transient(format!("reading response body: {}", e)).delivered()
        })?;

        serde_json::from_str(&text).map_err(|e| {
            CapabilityError::internal(format!("malformed scoring response: {}", e)).delivered()
        })
    }
}

/// Map transport and status failures onto capability error kinds
fn classify(err: ureq::Error) -> CapabilityError {
    match err {
        ureq::Error::StatusCode(code @ (401 | 403)) => {
            CapabilityError::authentication(format!("endpoint refused credentials (HTTP {})", code))
        }
        ureq::Error::StatusCode(code @ (400 | 413 | 415 | 422)) => {
            CapabilityError::invalid_input(format!("endpoint rejected the asset (HTTP {})", code))
        }
        ureq::Error::StatusCode(code @ (408 | 429)) => {
            CapabilityError::transient(format!("endpoint asked to retry later (HTTP {})", code))
        }
        ureq::Error::StatusCode(code) if code >= 500 => {
            CapabilityError::transient(format!("endpoint failed (HTTP {})", code))
        }
        ureq::Error::StatusCode(code) => {
            CapabilityError::internal(format!("endpoint rejected request (HTTP {})", code))
        }
        ureq::Error::Timeout(which) => CapabilityError::timeout(format!("{:?} timed out", which)),
        ureq::Error::Io(e) => CapabilityError::transient(format!("network error: {}", e)),
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => {
            CapabilityError::transient(err.to_string())
        }
        other => CapabilityError::internal(other.to_string()),
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(&self, asset: &Asset) -> Result<ScoreResponse, CapabilityError> {
        if let Some(ref var) = self.missing_key {
            return Err(CapabilityError::authentication(format!(
                "API key variable {} is not set",
                var
            )));
        }

        let body = tokio::fs::read(&asset.path).await.map_err(|e| {
            CapabilityError::internal(format!("reading {}: {}", asset.path.display(), e))
        })?;

        let content_type = asset
            .media
            .map(|m| m.mime)
            .unwrap_or("application/octet-stream");
        let content_hash = asset.content_hash.clone();
        let target = Arc::clone(&self.target);

        debug!("POST {} ({} bytes, {})", target.endpoint, body.len(), content_type);

        tokio::task::spawn_blocking(move || target.post(&body, content_type, &content_hash))
            .await
            .map_err(|e| CapabilityError::internal(format!("scoring task failed: {}", e)))?
    }
}
