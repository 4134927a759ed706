//! Image-to-video synthesis on RunPod.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{AiError, AiResult};
use crate::http_client;

pub const DEFAULT_VIDEO_PROMPT: &str =
    "Professional promotional video, cinematic quality, smooth camera movement";

const DEFAULT_ENDPOINT_ID: &str = "wan-2-1-i2v-720";

/// Upper bound for a downloaded video.
const MAX_VIDEO_BYTES: u64 = 512 * 1024 * 1024;

/// Animates a still image.
#[async_trait]
pub trait VideoSynthesizer: Send + Sync {
    /// Model identifier recorded on the video.
    fn model(&self) -> &str;

    /// Generate a video and return the provider URL of the result.
    async fn generate(&self, prompt: &str, image_url: &str) -> AiResult<String>;

    /// Fetch the bytes behind a provider result URL.
    async fn download(&self, url: &str) -> AiResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct RunPodConfig {
    pub api_key: Option<String>,
    pub endpoint_id: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for RunPodConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint_id: DEFAULT_ENDPOINT_ID.to_string(),
            base_url: "https://api.runpod.ai/v2".to_string(),
            timeout: Duration::from_secs(600),
        }
    }
}

impl RunPodConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("RUNPOD_API_KEY").ok().filter(|k| !k.is_empty()),
            endpoint_id: std::env::var("RUNPOD_ENDPOINT_ID")
                .ok()
                .filter(|e| !e.is_empty())
                .unwrap_or(defaults.endpoint_id),
            base_url: std::env::var("RUNPOD_BASE_URL").unwrap_or(defaults.base_url),
            timeout: crate::env_secs("RUNPOD_TIMEOUT_SECS", defaults.timeout),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    input: VideoInput<'a>,
}

/// Fixed generation parameters for 5 s 720p clips.
#[derive(Debug, Serialize)]
struct VideoInput<'a> {
    prompt: &'a str,
    image: &'a str,
    max_tokens: u32,
    temperature: f32,
    num_inference_steps: u32,
    guidance: u32,
    negative_prompt: &'static str,
    size: &'static str,
    duration: u32,
    flow_shift: u32,
    seed: i64,
    enable_prompt_optimization: bool,
    enable_safety_checker: bool,
}

impl<'a> VideoInput<'a> {
    fn new(prompt: &'a str, image: &'a str) -> Self {
        Self {
            prompt,
            image,
            max_tokens: 256,
            temperature: 0.7,
            num_inference_steps: 30,
            guidance: 5,
            negative_prompt: "blurry, low quality, distorted, amateur",
            size: "1280*720",
            duration: 5,
            flow_shift: 5,
            seed: -1,
            enable_prompt_optimization: true,
            enable_safety_checker: true,
        }
    }
}

/// Fields a result URL has been seen under.
#[derive(Debug, Default, Deserialize)]
struct VideoLocation {
    result: Option<String>,
    video_url: Option<String>,
    url: Option<String>,
}

impl VideoLocation {
    fn into_url(self) -> Option<String> {
        [self.result, self.video_url, self.url]
            .into_iter()
            .flatten()
            .find(|u| !u.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RunOutput {
    Located(VideoLocation),
    Bare(String),
    Other(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    output: Option<RunOutput>,
    #[serde(flatten)]
    top: VideoLocation,
    #[serde(default)]
    status: Option<String>,
}

impl RunResponse {
    /// `output.{result,video_url,url}` first, then the same keys at the top level.
    fn video_url(self) -> Option<String> {
        let nested = match self.output {
            Some(RunOutput::Located(location)) => location.into_url(),
            Some(RunOutput::Bare(url)) if url.starts_with("http") => Some(url),
            _ => None,
        };
        nested.or_else(|| self.top.into_url())
    }
}

pub struct RunPodVideoSynthesizer {
    http: Client,
    api_key: String,
    endpoint_id: String,
    base_url: String,
}

impl RunPodVideoSynthesizer {
    pub fn new(config: &RunPodConfig) -> AiResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AiError::NotConfigured("RUNPOD_API_KEY".into()))?;
        Ok(Self {
            http: http_client(config.timeout)?,
            api_key,
            endpoint_id: config.endpoint_id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VideoSynthesizer for RunPodVideoSynthesizer {
    fn model(&self) -> &str {
        &self.endpoint_id
    }

    #[instrument(skip(self, prompt), fields(endpoint = %self.endpoint_id))]
    async fn generate(&self, prompt: &str, image_url: &str) -> AiResult<String> {
        let url = format!("{}/{}/runsync", self.base_url, self.endpoint_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&RunRequest {
                input: VideoInput::new(prompt, image_url),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::from_status("RunPod", status, body));
        }

        let parsed: RunResponse = response.json().await?;
        debug!(status = ?parsed.status, "RunPod job finished");
        let video_url = parsed
            .video_url()
            .ok_or_else(|| AiError::InvalidResponse("No video URL returned".into()))?;
        info!("RunPod returned video");
        Ok(video_url)
    }

    #[instrument(skip(self, url))]
    async fn download(&self, url: &str) -> AiResult<Vec<u8>> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(AiError::from_status("RunPod download", status, "failed to download video"));
        }
        if response.content_length().is_some_and(|len| len > MAX_VIDEO_BYTES) {
            return Err(AiError::InvalidResponse(format!(
                "Video exceeds {} bytes",
                MAX_VIDEO_BYTES
            )));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AiError::EmptyResult("RunPod download".into()));
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn url_of(body: serde_json::Value) -> Option<String> {
        serde_json::from_value::<RunResponse>(body).unwrap().video_url()
    }

    #[test]
    fn test_known_response_shapes() {
        assert_eq!(url_of(json!({"output": {"result": "https://r/1.mp4"}})).as_deref(), Some("https://r/1.mp4"));
        assert_eq!(url_of(json!({"output": {"video_url": "https://r/2.mp4"}})).as_deref(), Some("https://r/2.mp4"));
        assert_eq!(url_of(json!({"output": {"url": "https://r/3.mp4"}})).as_deref(), Some("https://r/3.mp4"));
        assert_eq!(url_of(json!({"result": "https://r/4.mp4"})).as_deref(), Some("https://r/4.mp4"));
        assert_eq!(
            url_of(json!({"video_url": "https://r/5.mp4"})).as_deref(),
            Some("https://r/5.mp4")
        );
        assert_eq!(url_of(json!({"url": "https://r/6.mp4"})).as_deref(), Some("https://r/6.mp4"));
    }

    #[test]
    fn test_nested_output_wins_over_top_level() {
        let body = json!({"output": {"video_url": "https://nested"}, "url": "https://top"});
        assert_eq!(url_of(body).as_deref(), Some("https://nested"));
    }

    #[test]
    fn test_unknown_shapes_have_no_url() {
        assert!(url_of(json!({"status": "COMPLETED", "output": [1, 2]})).is_none());
        assert!(url_of(json!({"output": {"result": ""}})).is_none());
        assert!(url_of(json!({})).is_none());
    }

    #[test]
    fn test_input_parameters() {
        let json = serde_json::to_value(VideoInput::new("p", "https://img")).unwrap();
        assert_eq!(json["size"], "1280*720");
        assert_eq!(json["seed"], -1);
        assert_eq!(json["guidance"], 5);
        assert_eq!(json["enable_safety_checker"], true);
    }
}
