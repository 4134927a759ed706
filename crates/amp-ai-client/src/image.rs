//! Text-to-image synthesis providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{AiError, AiResult};
use crate::fallback::Provider;
use crate::http_client;
use crate::retry::RetryPolicy;

/// Produces image bytes from a prompt.
#[async_trait]
pub trait ImageSynthesizer: Provider {
    async fn synthesize(&self, prompt: &str) -> AiResult<Vec<u8>>;
}

/// Reject empty payloads as failures.
fn non_empty(provider: &str, bytes: Vec<u8>) -> AiResult<Vec<u8>> {
    if bytes.is_empty() {
        Err(AiError::EmptyResult(provider.to_string()))
    } else {
        Ok(bytes)
    }
}

// =============================================================================
// DeepAI
// =============================================================================

pub const DEEPAI_NAME: &str = "deepai/text2img";

#[derive(Debug, Clone)]
pub struct DeepAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for DeepAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.deepai.org".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl DeepAiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("DEEPAI_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("DEEPAI_BASE_URL").unwrap_or(defaults.base_url),
            timeout: crate::env_secs("DEEPAI_TIMEOUT_SECS", defaults.timeout),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeepAiResponse {
    output_url: Option<String>,
}

pub struct DeepAiSynthesizer {
    http: Client,
    api_key: String,
    base_url: String,
}

impl DeepAiSynthesizer {
    pub fn new(config: &DeepAiConfig) -> AiResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AiError::NotConfigured("DEEPAI_API_KEY".into()))?;
        Ok(Self {
            http: http_client(config.timeout)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Provider for DeepAiSynthesizer {
    fn name(&self) -> &str {
        DEEPAI_NAME
    }
}

#[async_trait]
impl ImageSynthesizer for DeepAiSynthesizer {
    #[instrument(skip(self, prompt))]
    async fn synthesize(&self, prompt: &str) -> AiResult<Vec<u8>> {
        let url = format!("{}/api/text2img", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Api-Key", &self.api_key)
            .form(&[("text", prompt)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::from_status(DEEPAI_NAME, status, body));
        }

        let output_url = response
            .json::<DeepAiResponse>()
            .await?
            .output_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AiError::InvalidResponse("DeepAI response has no output_url".into()))?;

        debug!("Fetching DeepAI output");
        let image = self.http.get(&output_url).send().await?;
        if !image.status().is_success() {
            let status = image.status().as_u16();
            return Err(AiError::from_status(DEEPAI_NAME, status, "output download failed"));
        }
        non_empty(DEEPAI_NAME, image.bytes().await?.to_vec())
    }
}

// =============================================================================
// Hugging Face inference
// =============================================================================

const DEFAULT_HF_MODELS: [&str; 3] = [
    "stabilityai/stable-diffusion-xl-base-1.0",
    "runwayml/stable-diffusion-v1-5",
    "CompVis/stable-diffusion-v1-4",
];

pub const NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, ugly, bad anatomy, watermark, text, signature, logo, username, grainy, pixelated, low resolution, wrong product type, different characteristics than described";

#[derive(Debug, Clone)]
pub struct HuggingFaceConfig {
    pub api_token: Option<String>,
    /// Models tried in order.
    pub models: Vec<String>,
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            models: DEFAULT_HF_MODELS.iter().map(|m| m.to_string()).collect(),
            base_url: "https://api-inference.huggingface.co".to_string(),
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::model_loading(),
        }
    }
}

impl HuggingFaceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_token: std::env::var("HUGGINGFACE_API_TOKEN").ok().filter(|k| !k.is_empty()),
            models: std::env::var("HUGGINGFACE_MODELS")
                .ok()
                .map(|s| crate::split_list(&s))
                .filter(|m| !m.is_empty())
                .unwrap_or(defaults.models),
            base_url: std::env::var("HUGGINGFACE_BASE_URL").unwrap_or(defaults.base_url),
            timeout: crate::env_secs("HUGGINGFACE_TIMEOUT_SECS", defaults.timeout),
            retry: defaults.retry,
        }
    }
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    negative_prompt: &'static str,
    num_inference_steps: u32,
    guidance_scale: f32,
    width: u32,
    height: u32,
}

impl Default for InferenceParameters {
    fn default() -> Self {
        Self {
            negative_prompt: NEGATIVE_PROMPT,
            num_inference_steps: 50,
            guidance_scale: 7.5,
            width: 1024,
            height: 1024,
        }
    }
}

/// One Hugging Face text-to-image model.
pub struct HuggingFaceSynthesizer {
    http: Client,
    api_token: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl HuggingFaceSynthesizer {
    pub fn new(config: &HuggingFaceConfig, model: impl Into<String>) -> AiResult<Self> {
        let api_token = config
            .api_token
            .clone()
            .ok_or_else(|| AiError::NotConfigured("HUGGINGFACE_API_TOKEN".into()))?;
        Ok(Self {
            http: http_client(config.timeout)?,
            api_token,
            model: model.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry,
        })
    }

    async fn infer(&self, prompt: &str) -> AiResult<Vec<u8>> {
        let url = format!("{}/models/{}", self.base_url, self.model);
        let request = InferenceRequest {
            inputs: prompt,
            parameters: InferenceParameters::default(),
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::from_status(&self.model, status, body));
        }
        non_empty(&self.model, response.bytes().await?.to_vec())
    }
}

impl Provider for HuggingFaceSynthesizer {
    fn name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ImageSynthesizer for HuggingFaceSynthesizer {
    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn synthesize(&self, prompt: &str) -> AiResult<Vec<u8>> {
        self.retry.run(&self.model, || self.infer(prompt)).await
    }
}

/// DeepAI when configured, then each Hugging Face model.
pub fn synthesizer_chain(
    deepai: &DeepAiConfig,
    huggingface: &HuggingFaceConfig,
) -> AiResult<Vec<Arc<dyn ImageSynthesizer>>> {
    let mut chain: Vec<Arc<dyn ImageSynthesizer>> = Vec::new();
    if deepai.api_key.is_some() {
        chain.push(Arc::new(DeepAiSynthesizer::new(deepai)?));
    }
    if huggingface.api_token.is_some() {
        for model in &huggingface.models {
            chain.push(Arc::new(HuggingFaceSynthesizer::new(huggingface, model.clone())?));
        }
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_skips_unconfigured_providers() {
        let chain =
            synthesizer_chain(&DeepAiConfig::default(), &HuggingFaceConfig::default()).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_chain_order() {
        let deepai = DeepAiConfig {
            api_key: Some("d".into()),
            ..DeepAiConfig::default()
        };
        let hf = HuggingFaceConfig {
            api_token: Some("h".into()),
            ..HuggingFaceConfig::default()
        };
        let names: Vec<String> = synthesizer_chain(&deepai, &hf)
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                DEEPAI_NAME,
                "stabilityai/stable-diffusion-xl-base-1.0",
                "runwayml/stable-diffusion-v1-5",
                "CompVis/stable-diffusion-v1-4",
            ]
        );
    }

    #[test]
    fn test_inference_parameters_serialize() {
        let json = serde_json::to_value(InferenceParameters::default()).unwrap();
        assert_eq!(json["num_inference_steps"], 50);
        assert_eq!(json["guidance_scale"], 7.5);
        assert_eq!(json["width"], 1024);
    }
}
