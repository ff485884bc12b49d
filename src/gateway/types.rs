//! Request/response types for chat completions used by remote judges.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// MESSAGES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// Chat model specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatModel {
    /// OpenRouter model, e.g. "anthropic/claude-opus-4".
    OpenRouter(String),
}

impl ChatModel {
    pub fn openrouter(model_id: impl Into<String>) -> Self {
        ChatModel::OpenRouter(model_id.into())
    }

    pub fn model_id(&self) -> &str {
        match self {
            ChatModel::OpenRouter(id) => id,
        }
    }

    /// Vendor prefix of the routed model ("anthropic" from "anthropic/claude-opus-4").
    pub fn vendor(&self) -> &str {
        match self {
            ChatModel::OpenRouter(id) => id.split('/').next().unwrap_or(id),
        }
    }
}

/// Request for chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: ChatModel,
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0). Judges run at 0.
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>) -> Self {
        Self {
            model,
            messages,
            temperature: 0.0,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Response from chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency: Duration,
    pub finish_reason: FinishReason,
}
