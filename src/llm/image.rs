//! Hero image generation.
//!
//! Best-effort: a missing key, an HTTP failure or an empty prediction all
//! yield `None`. Callers treat "no image" as a normal outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::catalog::Topic;
use crate::error::LlmError;

/// Default Imagen model.
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-4.0-fast-generate-001";

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const PROVIDER: &str = "gemini";

/// An image-generation capability. Never fails.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, topic: &Topic) -> Option<Vec<u8>>;
}

/// Image provider configuration.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout: Duration,
}

impl ImageConfig {
    /// Build from `GEMINI_API_KEY` / `PRESS_IMAGE_MODEL`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            api_key: lookup("GEMINI_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            model: lookup("PRESS_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Always returns `None`. Used when no image key is configured.
pub struct NoImages;

#[async_trait]
impl ImageGenerator for NoImages {
    async fn generate_image(&self, topic: &Topic) -> Option<Vec<u8>> {
        tracing::warn!(slug = %topic.slug, "No image key configured, skipping image");
        None
    }
}

fn image_from_payload(payload: &PredictResponse) -> Result<Vec<u8>, LlmError> {
    decode_first_image(payload).ok_or_else(|| invalid_response("no image in response".into()))
}

fn request_failed(reason: String) -> LlmError {
    LlmError::RequestFailed {
        provider: PROVIDER.into(),
        reason,
    }
}

fn invalid_response(reason: String) -> LlmError {
    LlmError::InvalidResponse {
        provider: PROVIDER.into(),
        reason,
    }
}

/// Imagen over the Gemini REST `:predict` endpoint.
pub struct GeminiImageGenerator {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl GeminiImageGenerator {
    /// Pick the provider for `config`: Imagen when a key is set, otherwise [`NoImages`].
    pub fn from_config(config: &ImageConfig) -> Arc<dyn ImageGenerator> {
        let Some(ref api_key) = config.api_key else {
            return Arc::new(NoImages);
        };
        match reqwest::Client::builder().timeout(config.timeout).build() {
            Ok(http) => Arc::new(Self {
                http,
                api_key: api_key.clone(),
                model: config.model.clone(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build image HTTP client, images disabled");
                Arc::new(NoImages)
            }
        }
    }

    async fn request(&self, topic: &Topic) -> Result<Vec<u8>, LlmError> {
        let url = format!("{API_BASE}/{}:predict", self.model);
        let body = serde_json::json!({
            "instances": [{ "prompt": image_prompt(topic) }],
            "parameters": { "sampleCount": 1, "aspectRatio": "16:9" },
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(request_failed(format!(
                "HTTP {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let payload: PredictResponse = response
            .json()
            .await
            .map_err(|e| invalid_response(e.to_string()))?;
        image_from_payload(&payload)
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageGenerator {
    async fn generate_image(&self, topic: &Topic) -> Option<Vec<u8>> {
        match self.request(topic).await {
            Ok(bytes) => {
                tracing::info!(slug = %topic.slug, bytes = bytes.len(), "Image generated");
                Some(bytes)
            }
            Err(e) => {
                tracing::warn!(slug = %topic.slug, error = %e, "Image generation failed");
                None
            }
        }
    }
}

/// Prompt for a topic's hero image.
pub fn image_prompt(topic: &Topic) -> String {
    format!(
        "Professional tennis photography: {}. \
         Dynamic action shot on a modern tennis court, dramatic lighting, \
         sports magazine quality, 16:9 aspect ratio, photorealistic. \
         Category: {}.",
        topic.title, topic.category
    )
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
}

fn decode_first_image(payload: &PredictResponse) -> Option<Vec<u8>> {
    let encoded = payload
        .predictions
        .iter()
        .find_map(|p| p.bytes_base64_encoded.as_deref())?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()
        .filter(|bytes| !bytes.is_empty())
}
