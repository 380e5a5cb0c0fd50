//! Text and image generation capabilities.
//!
//! - **Text**: Anthropic via rig-core, behind the [`TextGenerator`] trait.
//! - **Image**: Imagen via the Gemini REST API, behind [`ImageGenerator`]
//!   (see [`image`]). Image generation never fails; it degrades to `None`.

pub mod image;

pub use image::{GeminiImageGenerator, ImageConfig, ImageGenerator, NoImages};

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Default text model.
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

/// Default completion budget.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// A text-completion capability: `complete(prompt, system) -> text`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt` under the `system` context. Transport and HTTP
    /// failures surface as errors.
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError>;
}

/// Configuration for the text provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub max_tokens: u64,
}

impl LlmConfig {
    pub fn new(api_key: secrecy::SecretString) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Create the Anthropic text provider.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigWriter::new(
        model,
        &config.model,
        config.max_tokens,
    )))
}

/// Bridges a rig `CompletionModel` to [`TextGenerator`].
pub struct RigWriter<M> {
    model: M,
    model_name: String,
    max_tokens: u64,
}

impl<M> RigWriter<M> {
    pub fn new(model: M, model_name: &str, max_tokens: u64) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            max_tokens,
        }
    }
}

#[async_trait]
impl<M> TextGenerator for RigWriter<M>
where
    M: CompletionModel + Clone + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        let agent = rig::agent::AgentBuilder::new(self.model.clone())
            .preamble(system)
            .max_tokens(self.max_tokens)
            .build();

        let text = agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.model_name.clone(),
                reason: e.to_string(),
            })?;

        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.model_name.clone(),
                reason: "empty completion".to_string(),
            });
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_provider_missing_key_still_constructs() {
        // rig-core accepts any key at construction; auth fails on first request.
        let config = LlmConfig::new(secrecy::SecretString::from("test-key"));
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn llm_config_defaults() {
        let config = LlmConfig::new(secrecy::SecretString::from("k"));
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.model, "claude-haiku-4-5-20251001");
    }
}
