//! Application state.

use std::sync::Arc;

use amp_ai_client::{ImageSynthesizer, VideoSynthesizer, VisionAnalyzer};
use amp_firestore::LedgerStore;
use amp_storage::BlobStore;

use crate::auth::TokenVerifier;
use crate::config::ApiConfig;
use crate::services::{ImagePipeline, VideoPipeline};

/// Collaborators built in `main` (or by tests) and injected into the state.
pub struct Services {
    pub ledger: Arc<dyn LedgerStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Vision analyzers in fallback order.
    pub analyzers: Vec<Arc<dyn VisionAnalyzer>>,
    /// Image synthesizers in fallback order.
    pub synthesizers: Vec<Arc<dyn ImageSynthesizer>>,
    /// `None` when no video provider is configured.
    pub video: Option<Arc<dyn VideoSynthesizer>>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub ledger: Arc<dyn LedgerStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub image_pipeline: Arc<ImagePipeline>,
    pub video_pipeline: Arc<VideoPipeline>,
}

impl AppState {
    /// Wire the pipelines from the injected services.
    pub fn new(config: ApiConfig, services: Services) -> Self {
        let step_timeout = config.pipeline_step_timeout;

        let image_pipeline = ImagePipeline::new(
            Arc::clone(&services.ledger),
            Arc::clone(&services.blobs),
            services.analyzers,
            services.synthesizers,
            step_timeout,
        );
        let video_pipeline = VideoPipeline::new(
            Arc::clone(&services.ledger),
            Arc::clone(&services.blobs),
            services.video,
            step_timeout,
        );

        Self {
            config,
            ledger: services.ledger,
            blobs: services.blobs,
            verifier: services.verifier,
            image_pipeline: Arc::new(image_pipeline),
            video_pipeline: Arc::new(video_pipeline),
        }
    }
}
