//! Inference API client.
//!
//! Sends the whole conversation plus the selected model to the configured
//! chat endpoint and decodes the reply. Two request/response shapes are
//! supported:
//!
//! - **Ollama**: `{model, messages, stream: false}` → `message.content`
//! - **OpenRouter** (OpenAI-compatible): `{model, messages}` with bearer auth
//!   and identification headers → `choices[0].message.content`
//!
//! Every failure is a distinguished [`InferenceError`]; [`reply_text`] turns
//! the outcome into the text the user sees, so a relay always has a reply.

use async_trait::async_trait;
use relay_common::{InferenceConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::Turn;

/// Inference call failure.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Transport(String),

    #[error("HTTP {status}")]
    Status { status: u16, message: Option<String> },

    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Result of one inference call. `Ok(None)` means the provider answered
/// successfully without any reply text.
pub type InferenceResult<T> = Result<T, InferenceError>;

/// Remote chat model.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Provider shape, used to word user-facing error replies.
    fn provider(&self) -> ProviderKind;

    /// Send `history` to `model` and return the reply text, if any.
    async fn chat(&self, model: &str, history: &[Turn]) -> InferenceResult<Option<String>>;
}

// ============================================================================
// Wire Types
// ============================================================================

/// Request body for both providers.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Turn],
    /// Ollama only; OpenRouter requests omit the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Ollama `/api/chat` response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

/// OpenAI-style chat completion response.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

/// Error envelopes: `{"error": {"message": ..}}`, `{"error": ".."}`, `{"message": ".."}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Nested { error: ErrorDetail },
    Flat { error: String },
    Bare { message: String },
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Decode a success body into reply text. Blank text counts as no reply.
pub fn decode_reply(provider: ProviderKind, body: &str) -> InferenceResult<Option<String>> {
    let content = match provider {
        ProviderKind::Ollama => serde_json::from_str::<OllamaChatResponse>(body)
            .map_err(|e| InferenceError::Decode(e.to_string()))?
            .message
            .and_then(|m| m.content),
        ProviderKind::OpenRouter => serde_json::from_str::<CompletionResponse>(body)
            .map_err(|e| InferenceError::Decode(e.to_string()))?
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content),
    };

    Ok(content.filter(|c| !c.trim().is_empty()))
}

/// Best-effort provider error message from a failure body.
pub fn extract_error_message(body: &str) -> Option<String> {
    let message = match serde_json::from_str::<ErrorBody>(body).ok()? {
        ErrorBody::Nested { error } => error.message,
        ErrorBody::Flat { error } => error,
        ErrorBody::Bare { message } => message,
    };
    Some(message).filter(|m| !m.trim().is_empty())
}

/// Text sent to the user (and stored as the assistant turn) for an outcome.
pub fn reply_text(provider: ProviderKind, outcome: InferenceResult<Option<String>>) -> String {
    let name = provider.display_name();
    match outcome {
        Ok(Some(reply)) => reply,
        Ok(None) => format!("{name} API returned no reply."),
        Err(InferenceError::Status { status, message }) => match provider {
            ProviderKind::Ollama => format!("{name} API error with status code {status}"),
            ProviderKind::OpenRouter => format!(
                "{name} API error: {}",
                message.unwrap_or_else(|| format!("HTTP {status}"))
            ),
        },
        Err(InferenceError::Decode(e)) => {
            format!("{name} API returned an unreadable response: {e}")
        }
        Err(e @ (InferenceError::Timeout(_) | InferenceError::Transport(_))) => {
            format!("Error contacting {name} API: {e}")
        }
    }
}

// ============================================================================
// HTTP Client
// ============================================================================

/// reqwest-backed inference client.
pub struct HttpInferenceClient {
    client: reqwest::Client,
    provider: ProviderKind,
    endpoint: String,
    api_key: Option<String>,
    app_url: Option<String>,
    app_name: String,
    timeout: Duration,
}

impl HttpInferenceClient {
    /// Create a client for `provider` posting to `endpoint`.
    pub fn new(provider: ProviderKind, endpoint: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(120);
        Self {
            client: build_http_client(timeout),
            provider,
            endpoint: endpoint.into(),
            api_key: None,
            app_url: None,
            app_name: "dm-relay".to_string(),
            timeout,
        }
    }

    /// Create a client from the inference configuration.
    pub fn from_config(config: &InferenceConfig) -> Self {
        let mut client = Self::new(config.provider, config.endpoint())
            .with_timeout(Duration::from_secs(config.timeout_secs()))
            .with_app_name(config.app_name());
        client.api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
        client.app_url = config.app_url.clone();
        client
    }

    /// Set the bearer credential.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = build_http_client(timeout);
        self
    }

    /// Set the `X-Title` identification header value.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the `HTTP-Referer` identification header value.
    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = Some(app_url.into());
        self
    }

    fn build_request(&self, body: &ChatRequest<'_>) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(body)
            .timeout(self.timeout);

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        if self.provider == ProviderKind::OpenRouter {
            request = request.header("X-Title", &self.app_name);
            if let Some(ref url) = self.app_url {
                request = request.header("HTTP-Referer", url);
            }
        }

        request
    }

    fn map_transport(&self, error: &reqwest::Error) -> InferenceError {
        if error.is_timeout() {
            InferenceError::Timeout(self.timeout.as_secs())
        } else {
            InferenceError::Transport(error.to_string())
        }
    }
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn chat(&self, model: &str, history: &[Turn]) -> InferenceResult<Option<String>> {
        let body = ChatRequest {
            model,
            messages: history,
            stream: (self.provider == ProviderKind::Ollama).then_some(false),
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            provider = %self.provider,
            model = %model,
            turns = history.len(),
            "Calling inference API"
        );

        let response = self
            .build_request(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_transport(&e))?;

        if !status.is_success() {
            let message = extract_error_message(&text);
            tracing::warn!(
                status = status.as_u16(),
                error = ?message,
                "Inference API returned an error status"
            );
            return Err(InferenceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        decode_reply(self.provider, &text)
    }
}
