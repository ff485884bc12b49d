//! Judge oracle backed by a chat-completions gateway.

use std::sync::Arc;

use async_trait::async_trait;

use super::{JudgeError, JudgeOracle, JudgePrompt};
use crate::gateway::{ChatGateway, ChatModel, ChatRequest, FinishReason, ProviderError};
use crate::model::Judge;

/// Verdicts are one short object; this leaves room for a rationale.
const MAX_VERDICT_TOKENS: u32 = 400;

pub struct GatewayOracle {
    gateway: Arc<dyn ChatGateway>,
    temperature: f32,
}

impl GatewayOracle {
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self {
            gateway,
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl JudgeOracle for GatewayOracle {
    async fn complete(&self, judge: &Judge, prompt: &JudgePrompt) -> Result<String, JudgeError> {
        let req = ChatRequest::new(ChatModel::openrouter(&judge.model), prompt.to_messages())
            .temperature(self.temperature)
            .max_tokens(MAX_VERDICT_TOKENS)
            .json();
        let resp = self.gateway.chat(req).await?;
        if resp.finish_reason == FinishReason::ContentFilter {
            return Err(JudgeError::Provider(ProviderError::refused(format!(
                "{} response blocked by content filter",
                judge.model
            ))));
        }
        Ok(resp.content)
    }
}
