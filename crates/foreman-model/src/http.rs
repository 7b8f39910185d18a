//! OpenAI-compatible chat completion client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::ModelError;
use crate::protocol::ModelClient;
use crate::types::{parse_reply, CompletionBody, CompletionResponse, ModelReply, ModelRequest};

/// Client for a `/chat/completions` endpoint.
///
/// Transport errors, 429 and 5xx responses are retried with exponential
/// backoff; everything else is returned to the caller on first failure.
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    http: reqwest::Client,

    /// Base URL, e.g. `https://api.openai.com/v1`.
    api_base: String,

    /// Bearer token (optional for local endpoints).
    api_key: Option<String>,

    /// Model name sent with every request.
    model: String,

    /// Total attempts per request.
    max_attempts: u32,

    /// Delay before the first retry; doubled after each attempt.
    initial_backoff: Duration,
}

impl HttpModelClient {
    /// Create a new client for the given API base URL.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: None,
            model: "gpt-4o".to_string(),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the number of attempts per request (minimum 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay before the first retry.
    pub fn with_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ModelError> {
        self.http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    async fn attempt(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let body = CompletionBody {
            model: &self.model,
            messages: &request.messages,
        };

        let mut builder = self.http.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ModelError::EmptyResponse)?;

        debug!(content_len = content.len(), "Model reply received");
        Ok(parse_reply(&content))
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        info!(
            model = %self.model,
            messages = request.messages.len(),
            "Sending model request"
        );

        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.attempt(request).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Model request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for HttpModelClient {
    fn default() -> Self {
        Self::new("https://api.openai.com/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = HttpModelClient::new("http://localhost:8000/v1/")
            .with_api_key("test-key")
            .with_model("local-model")
            .with_max_attempts(0);

        assert_eq!(client.endpoint(), "http://localhost:8000/v1/chat/completions");
        assert_eq!(client.api_key, Some("test-key".to_string()));
        assert_eq!(client.model, "local-model");
        assert_eq!(client.max_attempts, 1);
    }

    #[test]
    fn test_status_retry_policy() {
        let retry = ModelError::Status {
            code: 503,
            body: String::new(),
        };
        let fatal = ModelError::Status {
            code: 401,
            body: String::new(),
        };
        assert!(retry.is_retryable());
        assert!(!fatal.is_retryable());
        assert!(!ModelError::EmptyResponse.is_retryable());
    }
}
