//! Answer generation through an external language model.
//!
//! Generation is optional: with no provider configured the answer pipeline returns a fixed
//! fallback answer without calling out. Both adapters speak the provider's REST API directly.

mod gemini;
mod ollama;

pub use gemini::GeminiGenerationClient;
pub use ollama::OllamaGenerationClient;

use crate::config::{GenerationConfig, GenerationProvider};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced while asking a provider for an answer.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Provider is misconfigured or could not be reached.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Input to a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Document excerpt the answer should be grounded in.
    pub context: String,
    /// Question as asked.
    pub question: String,
}

impl GenerationRequest {
    /// Prompt sent to the model.
    pub fn prompt(&self) -> String {
        format!(
            "Given this context: {}\n Answer this question: {}",
            self.context, self.question
        )
    }
}

/// Provider output. `text` may be empty when the model declined to answer.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    /// Generated answer text.
    pub text: String,
    /// Total tokens billed for the call, when the provider reports it.
    pub tokens_used: Option<i64>,
}

/// Interface implemented by answer generation providers.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Answer `request.question` from `request.context`.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationClientError>;
}

/// Build the configured generation client, or `None` when generation is disabled.
pub fn build_generation_client(
    config: &GenerationConfig,
) -> Result<Option<Arc<dyn GenerationClient>>, GenerationClientError> {
    let client: Arc<dyn GenerationClient> = match config.provider {
        GenerationProvider::None => return Ok(None),
        GenerationProvider::Gemini => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                GenerationClientError::ProviderUnavailable("Gemini API key is not set".into())
            })?;
            Arc::new(GeminiGenerationClient::new(
                config.base_url.clone(),
                config.model.clone(),
                api_key,
                config.timeout,
            )?)
        }
        GenerationProvider::Ollama => Arc::new(OllamaGenerationClient::new(
            config.base_url.clone(),
            config.model.clone(),
            config.timeout,
        )?),
    };
    tracing::info!(provider = ?config.provider, model = %config.model, "Generation client ready");
    Ok(Some(client))
}

fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, GenerationClientError> {
    reqwest::Client::builder()
        .user_agent(concat!("smartdoc/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|error| {
            GenerationClientError::ProviderUnavailable(format!(
                "failed to construct HTTP client: {error}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(provider: GenerationProvider, api_key: Option<&str>) -> GenerationConfig {
        GenerationConfig {
            provider,
            api_key: api_key.map(str::to_string),
            model: "test-model".into(),
            base_url: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn prompt_embeds_context_and_question() {
        let request = GenerationRequest {
            context: "hello world".into(),
            question: "hi?".into(),
        };
        assert_eq!(
            request.prompt(),
            "Given this context: hello world\n Answer this question: hi?"
        );
    }

    #[test]
    fn disabled_provider_builds_no_client() {
        assert!(
            build_generation_client(&config(GenerationProvider::None, None))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn gemini_requires_an_api_key() {
        assert!(matches!(
            build_generation_client(&config(GenerationProvider::Gemini, None)),
            Err(GenerationClientError::ProviderUnavailable(_))
        ));
        assert!(
            build_generation_client(&config(GenerationProvider::Gemini, Some("key")))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn ollama_builds_without_a_key() {
        assert!(
            build_generation_client(&config(GenerationProvider::Ollama, None))
                .unwrap()
                .is_some()
        );
    }
}
