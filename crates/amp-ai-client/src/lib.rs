//! Clients for the AI providers behind the generation pipelines.
//!
//! Each capability is a trait ([`VisionAnalyzer`], [`ImageSynthesizer`],
//! [`VideoSynthesizer`]) with one implementation per provider. Ordered
//! chains of analyzers and synthesizers are driven by [`first_success`].

use std::time::Duration;

use reqwest::Client;

pub mod error;
pub mod fallback;
pub mod image;
pub mod retry;
pub mod video;
pub mod vision;

pub use error::{AiError, AiResult};
pub use fallback::{first_success, Attempt, Outcome, Provider};
pub use image::{
    synthesizer_chain, DeepAiConfig, DeepAiSynthesizer, HuggingFaceConfig,
    HuggingFaceSynthesizer, ImageSynthesizer,
};
pub use retry::RetryPolicy;
pub use video::{RunPodConfig, RunPodVideoSynthesizer, VideoSynthesizer, DEFAULT_VIDEO_PROMPT};
pub use vision::{
    analyzer_chain, FilenameHeuristic, GeminiConfig, GeminiVision, ProductImage, VisionAnalyzer,
};

pub(crate) fn http_client(timeout: Duration) -> AiResult<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("amp-ai-client/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(AiError::Network)
}

pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub(crate) fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
