//! Generation provider implementations.
//!
//! Provides concrete implementations of the `LlmProvider` trait for:
//! - OpenAI-compatible APIs (OpenAI, Azure, Ollama, vLLM, LM Studio)
//! - Anthropic Messages API
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config.

pub mod anthropic;
pub mod openai_compat;

use crate::brain::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

pub use crate::config::RetryConfig;
pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatibleProvider;

const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Run `operation`, retrying transient failures with backoff from `retry`.
///
/// A rate-limit reply waits at least as long as the provider asked.
/// Anything that is not [`LlmError::is_transient`] is returned at once.
pub async fn with_retry<F, Fut, T>(retry: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                let wait = retry
                    .delay(attempt)
                    .max(e.retry_after().unwrap_or_default());
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max = retry.max_retries,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "Generation call failed; retrying"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wraps a provider so every completion goes through [`with_retry`].
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    retry: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        with_retry(&self.retry, || self.inner.complete(request.clone())).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }
}

/// Create a single provider without retry wrapping.
fn create_single_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(config)?)),
        "openai" | "openai-compatible" | "azure" | "vllm" | "lmstudio" => {
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
        "ollama" => {
            let config = LlmConfig {
                base_url: Some(
                    config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| OLLAMA_DEFAULT_BASE_URL.to_string()),
                ),
                ..config.clone()
            };
            Ok(Arc::new(OpenAiCompatibleProvider::new(&config)?))
        }
        other => Err(LlmError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}

/// Create a generation provider based on the configuration.
///
/// Routes to the appropriate implementation:
/// - `"anthropic"` → `AnthropicProvider`
/// - `"ollama"` → `OpenAiCompatibleProvider` against a local Ollama
/// - `"openai"` and other OpenAI-shaped endpoints → `OpenAiCompatibleProvider`
///
/// The result retries transient errors per `config.retry` unless
/// `max_retries` is zero.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = create_single_provider(config)?;
    tracing::debug!(
        provider = provider.provider_name(),
        model = provider.model_name(),
        "Generation provider ready"
    );
    if config.retry.max_retries == 0 {
        return Ok(provider);
    }
    Ok(Arc::new(RetryingProvider::new(provider, config.retry.clone())))
}
