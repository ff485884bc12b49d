//! Provider gateway for OpenRouter chat completions.

pub mod error;
pub mod openrouter;
pub mod types;

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use openrouter::{ChatProvider, OpenRouterAdapter};

pub use error::{ErrorContext, ProviderError};
pub use types::*;

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Transport-level retries for retryable provider errors (429, 5xx, connect).
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// Retrying gateway over a single chat provider.
pub struct ProviderGateway<P: ChatProvider = OpenRouterAdapter> {
    provider: P,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<P: ChatProvider> ChatGateway for ProviderGateway<P> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl ProviderGateway<OpenRouterAdapter> {
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self::with_config(
            OpenRouterAdapter::from_env()?,
            GatewayConfig::default(),
        ))
    }
}

impl<P: ChatProvider> ProviderGateway<P> {
    pub fn with_config(provider: P, config: GatewayConfig) -> Self {
        Self { provider, config }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.provider.chat(&req).await {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    let delay = match &err {
                        ProviderError::RateLimited { retry_after, .. } => {
                            (*retry_after).min(backoff_delay(self.config.retry_base_delay, 5))
                        }
                        _ => backoff_delay(self.config.retry_base_delay, attempt),
                    };
                    debug!(
                        model = req.model.model_id(),
                        attempt,
                        code = err.code(),
                        "retrying chat completion"
                    );
                    attempt += 1;
                    sleep(delay).await;
                }
            }
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base * multiplier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 9), Duration::from_millis(3200));
    }
}
