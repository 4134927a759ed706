//! Upload, analyze and turn a product photo into an advertisement image.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use amp_ai_client::{
    first_success, FilenameHeuristic, ImageSynthesizer, Outcome, ProductImage, VisionAnalyzer,
};
use amp_firestore::{LedgerStore, UserIdentity};
use amp_models::{
    split_file_name, timestamped_file_name, ChargeRequest, GenerationType, NewImage,
};
use amp_storage::{
    BlobStore, StorageError, StoredObject, UploadRequest, GENERATED_IMAGES_FOLDER, UPLOADS_FOLDER,
};

use super::pipeline::{
    preflight, settle, step, BillingSummary, PipelineError, PipelineResult, Stage,
};
use super::prompts;
use crate::metrics;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const FILE_TOO_LARGE: &str = "File size too large. Maximum 10MB allowed.";

/// Accepted upload content types.
pub const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Model recorded when the original upload stands in for a synthesized image.
pub const ORIGINAL_UPLOAD_MODEL: &str = "original-upload";

/// A file received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

/// Image generation input.
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub file: Option<UploadedFile>,
    pub description: String,
    pub selected_product: String,
    pub selected_style: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalAsset {
    pub file_id: String,
    pub url: String,
    pub thumbnail_url: String,
    pub file_name: String,
    pub size: u64,
}

impl From<StoredObject> for OriginalAsset {
    fn from(stored: StoredObject) -> Self {
        Self {
            file_id: stored.id,
            url: stored.url,
            thumbnail_url: stored.thumbnail_url,
            file_name: stored.name,
            size: stored.size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedAsset {
    pub image_url: String,
    pub image_file_id: String,
    pub video_prompt: String,
    pub has_ai_generation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub description: String,
    pub selected_product: String,
    pub selected_style: String,
    pub uploaded_at: DateTime<Utc>,
    pub video_prompt: String,
}

/// Result of a successful image pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ImageGeneration {
    pub original: OriginalAsset,
    pub generated: GeneratedAsset,
    pub metadata: GenerationMetadata,
    pub billing: BillingSummary,
}

/// Check the upload before anything leaves the process.
pub fn validate_upload(file: Option<&UploadedFile>) -> PipelineResult<&UploadedFile> {
    let file = file
        .filter(|f| !f.bytes.is_empty())
        .ok_or_else(|| PipelineError::invalid("No file uploaded"))?;

    if !ALLOWED_MIME_TYPES.contains(&file.content_type.as_str()) {
        return Err(PipelineError::invalid(
            "Invalid file type. Only JPEG, PNG, GIF, and WebP are allowed.",
        ));
    }

    if file.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(PipelineError::invalid(FILE_TOO_LARGE));
    }

    Ok(file)
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

fn tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    tags.into_iter()
        .filter(|t| !t.trim().is_empty())
        .map(String::from)
        .collect()
}

/// Image generation pipeline.
pub struct ImagePipeline {
    ledger: Arc<dyn LedgerStore>,
    blobs: Arc<dyn BlobStore>,
    analyzers: Vec<Arc<dyn VisionAnalyzer>>,
    synthesizers: Vec<Arc<dyn ImageSynthesizer>>,
    step_timeout: Duration,
}

impl ImagePipeline {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        blobs: Arc<dyn BlobStore>,
        analyzers: Vec<Arc<dyn VisionAnalyzer>>,
        synthesizers: Vec<Arc<dyn ImageSynthesizer>>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            blobs,
            analyzers,
            synthesizers,
            step_timeout,
        }
    }

    /// Run the pipeline for one upload.
    #[instrument(skip(self, identity, request), fields(user_id = %identity.uid))]
    pub async fn run(
        &self,
        identity: &UserIdentity,
        request: ImageRequest,
    ) -> PipelineResult<ImageGeneration> {
        let started = Instant::now();
        let result = self.generate(identity, request).await;

        let outcome = match &result {
            Ok(g) if g.billing.is_pending() => "pending",
            Ok(_) => "charged",
            Err(PipelineError::Invalid(_) | PipelineError::Ledger(_)) => "rejected",
            Err(_) => "failed",
        };
        metrics::record_generation(
            GenerationType::Image.as_str(),
            outcome,
            started.elapsed().as_secs_f64(),
        );
        result
    }

    async fn generate(
        &self,
        identity: &UserIdentity,
        request: ImageRequest,
    ) -> PipelineResult<ImageGeneration> {
        let started = Instant::now();
        let file = validate_upload(request.file.as_ref())?;
        preflight(self.ledger.as_ref(), identity, GenerationType::Image).await?;

        let style = request.selected_style.as_str();
        let uploaded_at = Utc::now();
        let millis = uploaded_at.timestamp_millis();
        let (stem, ext) = split_file_name(&file.file_name, extension_for(&file.content_type));

        let original = step(
            Stage::OriginalUpload,
            self.step_timeout,
            |e: StorageError| format!("Upload failed: {}", e),
            self.blobs.upload(
                file.bytes.clone(),
                UploadRequest::new(
                    timestamped_file_name("", stem, millis, ext),
                    UPLOADS_FOLDER,
                    file.content_type.clone(),
                )
                .with_tags(tags(["user-upload", style])),
            ),
        )
        .await?;
        info!(file_id = %original.id, "Original upload stored");

        let product = ProductImage {
            bytes: file.bytes.clone(),
            mime_type: file.content_type.clone(),
            file_name: file.file_name.clone(),
            product_label: request.selected_product.clone(),
        };
        let analysis = self.analyze(&product).await;

        let ad_prompt = prompts::advertisement_prompt(&analysis, style, &request.description);
        let generated_name = timestamped_file_name("generated_", stem, millis, "png");

        let (stored, model, ai_error) = match self.synthesize(&ad_prompt).await {
            Ok(outcome) => {
                let upload = UploadRequest::new(
                    generated_name.clone(),
                    GENERATED_IMAGES_FOLDER,
                    "image/png",
                )
                .with_tags(tags(["ai-generated", "advertisement", style, "vision-analyzed"]));
                match tokio::time::timeout(
                    self.step_timeout,
                    self.blobs.upload(outcome.value, upload),
                )
                .await
                {
                    Ok(Ok(stored)) => (stored, outcome.provider, None),
                    Ok(Err(e)) => {
                        warn!("Generated image upload failed, using original: {}", e);
                        (
                            original.clone(),
                            ORIGINAL_UPLOAD_MODEL.to_string(),
                            Some(format!("Upload failed: {}", e)),
                        )
                    }
                    Err(_) => (
                        original.clone(),
                        ORIGINAL_UPLOAD_MODEL.to_string(),
                        Some("Generated image upload timed out".to_string()),
                    ),
                }
            }
            Err(reason) => (original.clone(), ORIGINAL_UPLOAD_MODEL.to_string(), Some(reason)),
        };

        let video_prompt = prompts::video_prompt(&analysis, style);

        let image = NewImage {
            id: NewImage::new_id(),
            image_id: stored.id.clone(),
            image_url: stored.url.clone(),
            file_name: generated_name,
            file_size: original.size,
            product_name: request.selected_product.clone(),
            style: request.selected_style.clone(),
            description: request.description.clone(),
            video_prompt: video_prompt.clone(),
            generation_error: ai_error.clone(),
            model,
            processing_time_ms: Some(started.elapsed().as_millis() as u64),
            generated_at: Utc::now(),
        };

        let billing = settle(
            self.ledger.as_ref(),
            &identity.uid,
            ChargeRequest::Image(image),
            self.step_timeout,
        )
        .await;

        Ok(ImageGeneration {
            original: original.into(),
            generated: GeneratedAsset {
                image_url: stored.url,
                image_file_id: stored.id,
                video_prompt: video_prompt.clone(),
                has_ai_generation: ai_error.is_none(),
                ai_error,
            },
            metadata: GenerationMetadata {
                description: request.description,
                selected_product: request.selected_product,
                selected_style: request.selected_style,
                uploaded_at,
                video_prompt,
            },
            billing,
        })
    }

    /// Describe the product. Falls back to the filename heuristic.
    async fn analyze(&self, image: &ProductImage) -> String {
        let chain = first_success("vision", &self.analyzers, |analyzer| analyzer.analyze(image));
        match tokio::time::timeout(self.step_timeout, chain).await {
            Ok(Ok(outcome)) => outcome.value,
            Ok(Err(e)) => {
                warn!("Product analysis unavailable, using filename heuristic: {}", e);
                FilenameHeuristic::describe(&image.file_name, &image.product_label)
            }
            Err(_) => {
                warn!("Product analysis timed out, using filename heuristic");
                FilenameHeuristic::describe(&image.file_name, &image.product_label)
            }
        }
    }

    /// Synthesize the advertisement. `Err` carries a description of every failure.
    async fn synthesize(&self, prompt: &str) -> Result<Outcome<Vec<u8>>, String> {
        let chain = first_success("image", &self.synthesizers, |synth| synth.synthesize(prompt));
        match tokio::time::timeout(self.step_timeout, chain).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                warn!("Image synthesis failed, reusing original upload: {}", e);
                Err(e.to_string())
            }
            Err(_) => Err(format!(
                "Image synthesis timed out after {}s",
                self.step_timeout.as_secs()
            )),
        }
    }
}
