//! OpenRouter adapter for chat completions.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// A single chat completion round trip, without retries.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

// =============================================================================
// ADAPTER
// =============================================================================

/// Judge verdicts are tiny; anything larger is a misbehaving model.
const MAX_RESPONSE_LEN: usize = 256 * 1024;

/// Two proposals plus instructions comfortably fit below this.
const MAX_INPUT_CHARS: usize = 400_000;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(120))
    }

    /// Reads `OPENROUTER_API_KEY`, `OPENROUTER_BASE_URL` and `OPENROUTER_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;
        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));
        Self::with_config(api_key, base_url, timeout)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert("X-Title", HeaderValue::from_static("tournament-harness"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn error_context(status: u16, headers: &HeaderMap) -> ErrorContext {
        let ctx = ErrorContext::new().with_status(status);
        match headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        }
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let total_chars: usize = req.messages.iter().map(|m| m.content.len()).sum();
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();
        let api_req = ChatApiRequest {
            model: req.model.model_id(),
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let mut response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let ctx = Self::error_context(status.as_u16(), response.headers());

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    "openrouter",
                    format!("Response exceeds {MAX_RESPONSE_LEN} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).to_string();

        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(ProviderError::rate_limited(Duration::from_secs(30), ctx));
            }
            let message = serde_json::from_str::<ChatApiResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.error)
                .and_then(|error| {
                    error.message.map(|m| match error.code {
                        Some(code) => format!("{m} (code {code})"),
                        None => m,
                    })
                })
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ProviderError::provider_with_context(
                "openrouter",
                message,
                status.is_server_error(),
                ctx,
            ));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider("openrouter", format!("Invalid JSON: {e}"), false)
        })?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::provider(
                "openrouter",
                error.message.unwrap_or_default(),
                false,
            ));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider("openrouter", "No choices in response", false))?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProviderError::provider(
                "openrouter",
                "Empty completion content",
                true,
            ));
        }

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}
