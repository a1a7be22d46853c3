//! Client for the external prescription image-analysis service
//!
//! The service receives an image reference and answers with a list of
//! medicines. Failures, rate limiting included, are reported to the
//! caller as-is; nothing here retries.

use std::time::Duration;

use async_trait::async_trait;
use carelink_core::analysis::AnalysisPayload;
use reqwest::{header, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Analysis service is rate limiting requests")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Analysis service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Analysis request failed: {0}")]
    Transport(String),

    #[error("Analysis response could not be decoded: {0}")]
    Decode(String),

    #[error("No analysis endpoint is configured")]
    NotConfigured,
}

impl AnalysisError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AnalysisError::RateLimited { .. })
    }
}

/// Turns an image reference into recognized medicines
#[async_trait]
pub trait PrescriptionAnalyzer: Send + Sync {
    async fn analyze(&self, image_ref: &str) -> Result<AnalysisPayload, AnalysisError>;
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    image_url: &'a str,
}

/// JSON-over-HTTP analyzer
pub struct HttpAnalyzer {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpAnalyzer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("carelink/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.into(),
            http_client,
        }
    }

    /// Analyzer for the configured endpoint
    pub fn from_config(config: &Config) -> Result<Self, AnalysisError> {
        let endpoint = config
            .analysis_endpoint
            .clone()
            .ok_or(AnalysisError::NotConfigured)?;
        Ok(Self::new(
            endpoint,
            Duration::from_secs(config.analysis_timeout_secs),
        ))
    }
}

#[async_trait]
impl PrescriptionAnalyzer for HttpAnalyzer {
    async fn analyze(&self, image_ref: &str) -> Result<AnalysisPayload, AnalysisError> {
        tracing::debug!(endpoint = %self.endpoint, "Requesting prescription analysis");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&AnalyzeRequest {
                image_url: image_ref,
            })
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            tracing::warn!(?retry_after_secs, "Analysis service rate limited the request");
            return Err(AnalysisError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Analysis service returned an error");
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: AnalysisPayload = response
            .json()
            .await
            .map_err(|e| AnalysisError::Decode(e.to_string()))?;
        tracing::info!(medicines = payload.medicines.len(), "Prescription analyzed");
        Ok(payload)
    }
}
