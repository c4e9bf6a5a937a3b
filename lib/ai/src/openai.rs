//! OpenAI-compatible HTTP backend.

use crate::backend::{CompletionBackend, CompletionRequest, CompletionResponse};
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Completion backend speaking `POST <base>/v1/chat/completions`.
pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Creates a backend for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// The full completions URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    #[instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        debug!(status = status.as_u16(), "completion response received");

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("completion quota exceeded");
            return Err(LlmError::QuotaExceeded);
        }

        let body = response.text().await.map_err(|e| LlmError::Transport {
            reason: e.to_string(),
        })?;

        serde_json::from_str(&body).map_err(|e| {
            warn!(status = status.as_u16(), error = %e, "unparseable completion body");
            LlmError::MalformedResponse {
                reason: e.to_string(),
            }
        })
    }
}
