//! Product image analysis.
//!
//! Gemini models describe the uploaded image; when none of them answers,
//! [`FilenameHeuristic`] derives a description from the file name so the
//! pipeline always has analysis text to build prompts from.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{AiError, AiResult};
use crate::fallback::Provider;
use crate::http_client;

/// Instruction sent with every image.
pub const ANALYSIS_PROMPT: &str = "Analyze this product image in detail. Describe: product type, packaging, colors, branding, size/volume, material, and visible text/logos. Be very specific and objective.";

const DEFAULT_MODELS: [&str; 2] = ["gemini-1.5-flash", "gemini-pro-vision"];
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Uploaded image plus the labels the heuristic needs.
#[derive(Debug, Clone)]
pub struct ProductImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
    /// Product label chosen by the user; may be empty.
    pub product_label: String,
}

/// Turns a product image into descriptive text.
#[async_trait]
pub trait VisionAnalyzer: Provider {
    async fn analyze(&self, image: &ProductImage) -> AiResult<String>;
}

// =============================================================================
// Gemini
// =============================================================================

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    /// Models tried in order.
    pub models: Vec<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("GOOGLE_API_KEY"))
                .ok()
                .filter(|k| !k.is_empty()),
            models: std::env::var("GEMINI_VISION_MODELS")
                .ok()
                .map(|s| crate::split_list(&s))
                .filter(|m| !m.is_empty())
                .unwrap_or(defaults.models),
            base_url: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url),
            timeout: crate::env_secs("GEMINI_TIMEOUT_SECS", defaults.timeout),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// One Gemini model used for vision analysis.
pub struct GeminiVision {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiVision {
    pub fn new(config: &GeminiConfig, model: impl Into<String>) -> AiResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AiError::NotConfigured("GEMINI_API_KEY".into()))?;
        Ok(Self {
            http: http_client(config.timeout)?,
            api_key,
            model: model.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Provider for GeminiVision {
    fn name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl VisionAnalyzer for GeminiVision {
    #[instrument(skip(self, image), fields(model = %self.model, size = image.bytes.len()))]
    async fn analyze(&self, image: &ProductImage) -> AiResult<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: ANALYSIS_PROMPT,
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: &image.mime_type,
                            data: STANDARD.encode(&image.bytes),
                        },
                    },
                ],
            }],
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::from_status(&self.model, status, body));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AiError::EmptyResult(self.model.clone()));
        }
        debug!(chars = text.len(), "Gemini analysis received");
        Ok(text)
    }
}

// =============================================================================
// Filename heuristic
// =============================================================================

static SIZE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(ml|l|kg|g|oz|lb)").expect("size pattern is valid"));

/// Last-resort analyzer that never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilenameHeuristic;

pub const HEURISTIC_NAME: &str = "filename-heuristic";

impl FilenameHeuristic {
    /// Describe a product from its file name and label.
    pub fn describe(file_name: &str, product_label: &str) -> String {
        let file_name = file_name.to_lowercase();
        let product = match product_label.trim() {
            "" => "product",
            label => label,
        };

        let size = SIZE_PATTERN
            .captures(&file_name)
            .map(|c| format!("{}{} ", &c[1], c[2].to_lowercase()))
            .unwrap_or_default();

        let container = if file_name.contains("can") {
            "aluminum can container"
        } else if file_name.contains("bottle") {
            "bottle container"
        } else if file_name.contains("pack") {
            "packet packaging"
        } else if file_name.contains("box") {
            "box packaging"
        } else {
            "commercial packaging"
        };

        format!(
            "This appears to be a {}{} in {} format, suitable for retail display and commercial advertising",
            size, product, container
        )
    }
}

impl Provider for FilenameHeuristic {
    fn name(&self) -> &str {
        HEURISTIC_NAME
    }
}

#[async_trait]
impl VisionAnalyzer for FilenameHeuristic {
    async fn analyze(&self, image: &ProductImage) -> AiResult<String> {
        Ok(Self::describe(&image.file_name, &image.product_label))
    }
}

/// Configured Gemini models in order, then the heuristic.
pub fn analyzer_chain(config: &GeminiConfig) -> AiResult<Vec<Arc<dyn VisionAnalyzer>>> {
    let mut chain: Vec<Arc<dyn VisionAnalyzer>> = Vec::new();
    if config.api_key.is_some() {
        for model in &config.models {
            chain.push(Arc::new(GeminiVision::new(config, model.clone())?));
        }
    }
    chain.push(Arc::new(FilenameHeuristic));
    Ok(chain)
}
