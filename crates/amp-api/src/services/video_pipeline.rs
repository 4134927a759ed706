//! Animate a generated advertisement image into a short promotional video.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use url::Url;

use amp_ai_client::{AiError, VideoSynthesizer, DEFAULT_VIDEO_PROMPT};
use amp_firestore::{LedgerStore, UserIdentity};
use amp_models::{
    sanitize_path_segment, ChargeRequest, GenerationType, NewVideo, SelectedProduct,
    VIDEO_DURATION_SECS, VIDEO_FORMAT, VIDEO_RESOLUTION,
};
use amp_storage::{generated_videos_folder, BlobStore, StorageError, UploadRequest};

use super::pipeline::{
    preflight, settle, step, BillingSummary, PipelineError, PipelineResult, Stage,
};
use crate::metrics;

const DEFAULT_STYLE: &str = "promotional";
const UNKNOWN_PRODUCT: &str = "Unknown Product";

/// Video generation input, as posted by the client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub image_url: String,
    pub video_prompt: Option<String>,
    pub product_name: Option<String>,
    pub style: Option<String>,
    pub description: Option<String>,
    pub selected_product: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl VideoRequest {
    /// Product name used for storage paths and the record.
    fn product_label(&self) -> Option<&str> {
        non_blank(&self.product_name).or_else(|| non_blank(&self.selected_product))
    }
}

/// Result of a successful video pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGeneration {
    pub video_id: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub duration: u32,
    pub resolution: String,
    pub format: String,
    pub source_image_id: String,
    pub product_name: String,
    pub generated_at: DateTime<Utc>,
    /// Provider-hosted copy of the video.
    pub runpod_url: String,
    pub download_url: String,
    pub billing: BillingSummary,
}

/// Reject requests that cannot reach the provider.
pub fn validate_video_request(request: &VideoRequest) -> PipelineResult<()> {
    if request.image_id.trim().is_empty() || request.image_url.trim().is_empty() {
        return Err(PipelineError::invalid("Image URL and Image ID are required"));
    }
    match Url::parse(request.image_url.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(PipelineError::invalid("Image URL must be an absolute http(s) URL")),
    }
}

/// Video generation pipeline.
pub struct VideoPipeline {
    ledger: Arc<dyn LedgerStore>,
    blobs: Arc<dyn BlobStore>,
    synthesizer: Option<Arc<dyn VideoSynthesizer>>,
    step_timeout: Duration,
}

impl VideoPipeline {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        blobs: Arc<dyn BlobStore>,
        synthesizer: Option<Arc<dyn VideoSynthesizer>>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            blobs,
            synthesizer,
            step_timeout,
        }
    }

    #[instrument(skip(self, identity, request), fields(user_id = %identity.uid, image_id = %request.image_id))]
    pub async fn run(
        &self,
        identity: &UserIdentity,
        request: VideoRequest,
    ) -> PipelineResult<VideoGeneration> {
        let started = Instant::now();
        let result = self.generate(identity, request).await;

        let outcome = match &result {
            Ok(g) if g.billing.is_pending() => "pending",
            Ok(_) => "charged",
            Err(PipelineError::Invalid(_) | PipelineError::Ledger(_)) => "rejected",
            Err(_) => "failed",
        };
        metrics::record_generation(
            GenerationType::Video.as_str(),
            outcome,
            started.elapsed().as_secs_f64(),
        );
        result
    }

    async fn generate(
        &self,
        identity: &UserIdentity,
        request: VideoRequest,
    ) -> PipelineResult<VideoGeneration> {
        let started = Instant::now();
        validate_video_request(&request)?;
        preflight(self.ledger.as_ref(), identity, GenerationType::Video).await?;

        let synthesizer = self.synthesizer.as_ref().ok_or_else(|| {
            PipelineError::upstream(Stage::VideoSynthesis, "Video generation is not configured")
        })?;

        let image_id = request.image_id.trim().to_string();
        let image_url = request.image_url.trim().to_string();
        let prompt = non_blank(&request.video_prompt).unwrap_or(DEFAULT_VIDEO_PROMPT);

        let runpod_url = step(
            Stage::VideoSynthesis,
            self.step_timeout,
            |e: AiError| e.to_string(),
            synthesizer.generate(prompt, &image_url),
        )
        .await?;
        info!(url = %runpod_url, "Video generated");

        let bytes = step(
            Stage::VideoDownload,
            self.step_timeout,
            |e: AiError| format!("Failed to download video: {}", e),
            synthesizer.download(&runpod_url),
        )
        .await?;

        let segment = sanitize_path_segment(request.product_label().unwrap_or_default());
        let file_name = format!("video_{}_{}.mp4", image_id, Utc::now().timestamp_millis());

        let stored = step(
            Stage::VideoUpload,
            self.step_timeout,
            |e: StorageError| format!("Failed to store video: {}", e),
            self.blobs.upload(
                bytes,
                UploadRequest::new(file_name, generated_videos_folder(&segment), "video/mp4")
                    .with_tags(["ai-generated", "video", segment.as_str()]),
            ),
        )
        .await?;

        let product_name = request.product_label().unwrap_or(UNKNOWN_PRODUCT).to_string();
        let recorded_prompt = non_blank(&request.video_prompt)
            .map(String::from)
            .unwrap_or_else(|| format!("Professional promotional video for {}", product_name));
        let generated_at = Utc::now();

        let video = NewVideo {
            id: NewVideo::new_id(),
            video_id: stored.id.clone(),
            video_url: stored.url.clone(),
            thumbnail_url: image_url.clone(),
            file_name: stored.name.clone(),
            file_size: stored.size,
            original_image_id: image_id.clone(),
            original_image_url: image_url.clone(),
            product_name: product_name.clone(),
            style: non_blank(&request.style).unwrap_or(DEFAULT_STYLE).to_string(),
            description: request.description.clone().unwrap_or_default(),
            video_prompt: recorded_prompt,
            selected_product: SelectedProduct::generated(product_name.clone(), image_url.clone()),
            model: synthesizer.model().to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            generated_at,
        };

        let billing = settle(
            self.ledger.as_ref(),
            &identity.uid,
            ChargeRequest::Video(video),
            self.step_timeout,
        )
        .await;

        Ok(VideoGeneration {
            video_id: stored.id,
            video_url: stored.url.clone(),
            thumbnail_url: image_url,
            file_name: stored.name,
            file_size: stored.size,
            duration: VIDEO_DURATION_SECS,
            resolution: VIDEO_RESOLUTION.to_string(),
            format: VIDEO_FORMAT.to_string(),
            source_image_id: image_id,
            product_name,
            generated_at,
            runpod_url,
            download_url: stored.url,
            billing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::*;
    use amp_firestore::{ChargeReceipt, LedgerError};

    fn request() -> VideoRequest {
        VideoRequest {
            image_id: "img-1".into(),
            image_url: "https://cdn.test/amplify/generated-images/ad.png".into(),
            product_name: Some("Acme Soda!! 2.0".into()),
            ..Default::default()
        }
    }

    fn rich_user(uid: &str) -> amp_models::UserRecord {
        user_with_credits(uid, 25)
    }

    #[test]
    fn test_missing_fields_rejected() {
        let mut req = request();
        req.image_url = "  ".into();
        assert_eq!(
            validate_video_request(&req).unwrap_err().to_string(),
            "Image URL and Image ID are required"
        );

        let mut req = request();
        req.image_url = "ftp://example.com/a.png".into();
        assert!(matches!(
            validate_video_request(&req),
            Err(PipelineError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_url_makes_no_external_calls() {
        let mut ledger = MockLedger::new();
        ledger.expect_upsert_user().never();
        let mut blobs = MockBlobs::new();
        blobs.expect_upload().never();
        let video = Arc::new(FakeVideo::ok("https://runpod.test/v.mp4", b"mp4"));

        let pipeline = VideoPipeline::new(
            Arc::new(ledger),
            Arc::new(blobs),
            Some(video.clone()),
            Duration::from_secs(5),
        );
        let mut req = request();
        req.image_url.clear();

        let err = pipeline.run(&identity("u1"), req).await.unwrap_err();
        assert!(matches!(err, PipelineError::Invalid(_)));
        assert_eq!(video.calls(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_credits_checked_before_provider() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_upsert_user()
            .returning(|id| Ok(user_with_credits(&id.uid, 9)));
        let video = Arc::new(FakeVideo::ok("https://runpod.test/v.mp4", b"mp4"));

        let pipeline = VideoPipeline::new(
            Arc::new(ledger),
            Arc::new(MockBlobs::new()),
            Some(video.clone()),
            Duration::from_secs(5),
        );
        let err = pipeline.run(&identity("u1"), request()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Ledger(ref e) if e.is_insufficient_credits()));
        assert_eq!(video.calls(), 0);
    }

    #[tokio::test]
    async fn test_happy_path_stores_under_product_folder() {
        let mut ledger = MockLedger::new();
        ledger.expect_upsert_user().returning(|id| Ok(rich_user(&id.uid)));
        ledger
            .expect_create_video()
            .times(1)
            .withf(|uid, video| {
                uid == "u1"
                    && video.original_image_id == "img-1"
                    && video.product_name == "Acme Soda!! 2.0"
                    && video.style == "promotional"
                    && video.video_prompt == "Professional promotional video for Acme Soda!! 2.0"
                    && video.selected_product.category == "Generated"
            })
            .returning(|_, video| {
                Ok(ChargeReceipt {
                    record_id: Some(video.id),
                    remaining_credits: 15,
                })
            });

        let mut blobs = MockBlobs::new();
        blobs
            .expect_upload()
            .times(1)
            .withf(|bytes, req| {
                req.folder == "amplify/generated/acme-soda-2-0"
                    && req.file_name.starts_with("video_img-1_")
                    && req.file_name.ends_with(".mp4")
                    && bytes == b"mp4"
            })
            .returning(stored_echo);

        let pipeline = VideoPipeline::new(
            Arc::new(ledger),
            Arc::new(blobs),
            Some(Arc::new(FakeVideo::ok("https://runpod.test/v.mp4", b"mp4"))),
            Duration::from_secs(5),
        );

        let generation = pipeline.run(&identity("u1"), request()).await.unwrap();
        assert_eq!(generation.runpod_url, "https://runpod.test/v.mp4");
        assert_eq!(generation.duration, 5);
        assert_eq!(generation.resolution, "1280x720");
        assert_eq!(generation.source_image_id, "img-1");
        assert_eq!(generation.download_url, generation.video_url);
        assert_eq!(generation.billing.remaining_credits, Some(15));

        let json = serde_json::to_value(&generation).unwrap();
        assert!(json.get("sourceImageId").is_some());
        assert!(json.get("runpodUrl").is_some());
    }

    #[tokio::test]
    async fn test_provider_failure_reports_runpod_and_skips_ledger() {
        let mut ledger = MockLedger::new();
        ledger.expect_upsert_user().returning(|id| Ok(rich_user(&id.uid)));
        ledger.expect_create_video().never();
        ledger.expect_save_pending_charge().never();
        let mut blobs = MockBlobs::new();
        blobs.expect_upload().never();

        let video = FakeVideo {
            generate_result: Err(AiError::InvalidResponse("No video URL returned".into())),
            ..FakeVideo::ok("", b"")
        };
        let pipeline = VideoPipeline::new(
            Arc::new(ledger),
            Arc::new(blobs),
            Some(Arc::new(video)),
            Duration::from_secs(5),
        );

        let err = pipeline.run(&identity("u1"), request()).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::VideoSynthesis));
        assert!(err.to_string().contains("No video URL returned"));
    }

    #[tokio::test]
    async fn test_download_failure_stage() {
        let mut ledger = MockLedger::new();
        ledger.expect_upsert_user().returning(|id| Ok(rich_user(&id.uid)));
        ledger.expect_create_video().never();

        let video = FakeVideo {
            download_result: Err(AiError::EmptyResult("download".into())),
            ..FakeVideo::ok("https://runpod.test/v.mp4", b"")
        };
        let pipeline = VideoPipeline::new(
            Arc::new(ledger),
            Arc::new(MockBlobs::new()),
            Some(Arc::new(video)),
            Duration::from_secs(5),
        );

        let err = pipeline.run(&identity("u1"), request()).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::VideoDownload));
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_upstream_failure() {
        let mut ledger = MockLedger::new();
        ledger.expect_upsert_user().returning(|id| Ok(rich_user(&id.uid)));
        let pipeline = VideoPipeline::new(
            Arc::new(ledger),
            Arc::new(MockBlobs::new()),
            None,
            Duration::from_secs(5),
        );
        let err = pipeline.run(&identity("u1"), request()).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::VideoSynthesis));
    }

    #[tokio::test]
    async fn test_ledger_failure_after_upload_is_pending() {
        let mut ledger = MockLedger::new();
        ledger.expect_upsert_user().returning(|id| Ok(rich_user(&id.uid)));
        ledger
            .expect_create_video()
            .times(1)
            .returning(|uid, _| Err(LedgerError::UserNotFound(uid.to_string())));
        ledger
            .expect_save_pending_charge()
            .times(1)
            .withf(|charge| charge.request.generation_type() == GenerationType::Video)
            .returning(|_| Ok(()));
        let mut blobs = MockBlobs::new();
        blobs.expect_upload().returning(stored_echo);

        let pipeline = VideoPipeline::new(
            Arc::new(ledger),
            Arc::new(blobs),
            Some(Arc::new(FakeVideo::ok("https://runpod.test/v.mp4", b"mp4"))),
            Duration::from_secs(5),
        );
        let generation = pipeline.run(&identity("u1"), request()).await.unwrap();
        assert!(generation.billing.is_pending());
        assert_eq!(generation.billing.credits_used, 10);
    }
}
