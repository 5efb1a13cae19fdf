//! Synthesis engine HTTP client
//!
//! The engine is both the third reading source (its `audio_query` response
//! exposes the phonetic analysis as accent phrases and moras) and the final
//! renderer. The [`SynthesisEngine`] trait keeps the pipeline testable
//! without a running engine; [`HttpEngine`] speaks the engine's REST API.

use std::time::Duration;

use thiserror::Error;

use crate::error::{Error, UpstreamKind};
use crate::retry::Retryable;
use crate::types::AudioQuery;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:50021";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Engine client errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine network error: {0}")]
    Network(String),

    #[error("engine returned {0}: {1}")]
    Status(u16, String),

    #[error("engine response unparseable: {0}")]
    Parse(String),
}

impl EngineError {
    /// Network failures and server-side errors are worth retrying; 4xx
    /// means our request is wrong and will stay wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Network(_) => true,
            EngineError::Status(code, _) => *code >= 500,
            EngineError::Parse(_) => false,
        }
    }
}

impl Retryable for EngineError {
    fn is_retryable(&self) -> bool {
        EngineError::is_retryable(self)
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Network(message) => {
                Error::Upstream { upstream: UpstreamKind::Engine, message }
            }
            EngineError::Status(code, body) => {
                let message = format!("status {code}: {body}");
                if code >= 500 {
                    Error::Upstream { upstream: UpstreamKind::Engine, message }
                } else {
                    Error::Malformed { upstream: UpstreamKind::Engine, message }
                }
            }
            EngineError::Parse(message) => {
                Error::Malformed { upstream: UpstreamKind::Engine, message }
            }
        }
    }
}

/// The two engine operations the pipeline needs.
#[async_trait::async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Ask the engine to analyze `text` and return its synthesis query.
    async fn audio_query(&self, text: &str, style_id: u32)
        -> Result<AudioQuery, EngineError>;

    /// Render a (possibly patched) query to WAV bytes.
    async fn synthesis(&self, query: &AudioQuery, style_id: u32)
        -> Result<Vec<u8>, EngineError>;
}

/// REST client for a locally running synthesis engine.
pub struct HttpEngine {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpEngine {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, EngineError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
            .build()
            .map_err(|e| EngineError::Network(e.to_string()))?;

        Ok(Self { http_client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// Build the client from run configuration.
    pub fn from_config(config: &crate::config::EngineConfig) -> Result<Self, EngineError> {
        Self::new(&config.base_url, Some(Duration::from_secs(config.timeout_secs)))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Status(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl SynthesisEngine for HttpEngine {
    async fn audio_query(
        &self,
        text: &str,
        style_id: u32,
    ) -> Result<AudioQuery, EngineError> {
        tracing::debug!(chars = text.chars().count(), style_id, "requesting audio query");

        let response = self
            .http_client
            .post(self.endpoint("audio_query"))
            .query(&[("text", text), ("speaker", &style_id.to_string())])
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let response = Self::check_status(response).await?;
        let query: AudioQuery = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;

        tracing::debug!(
            accent_phrases = query.accent_phrases.len(),
            moras = query.mora_count(),
            "audio query received"
        );
        Ok(query)
    }

    async fn synthesis(
        &self,
        query: &AudioQuery,
        style_id: u32,
    ) -> Result<Vec<u8>, EngineError> {
        let response = self
            .http_client
            .post(self.endpoint("synthesis"))
            .query(&[("speaker", &style_id.to_string())])
            .json(query)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let response = Self::check_status(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        tracing::debug!(bytes = bytes.len(), "synthesis complete");
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// Tests
// ============================================================================
