//! Generated promotional video records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::generation::{BillingSnapshot, GenerationStatus, GenerationType};
use crate::user::UserRecord;

/// Clip length requested from the video provider.
pub const VIDEO_DURATION_SECS: u32 = 5;
pub const VIDEO_RESOLUTION: &str = "1280x720";
pub const VIDEO_FORMAT: &str = "mp4";

/// Denormalized description of the product a video advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SelectedProduct {
    pub id: u32,
    pub name: String,
    pub image: String,
    pub category: String,
}

impl SelectedProduct {
    /// Descriptor for a product generated from an uploaded image.
    pub fn generated(name: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: 1,
            name: name.into(),
            image: image_url.into(),
            category: "Generated".to_string(),
        }
    }
}

/// Video generation result handed to the ledger for charging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NewVideo {
    pub id: String,
    pub video_id: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub original_image_id: String,
    pub original_image_url: String,
    pub product_name: String,
    pub style: String,
    pub description: String,
    pub video_prompt: String,
    pub selected_product: SelectedProduct,
    pub model: String,
    pub processing_time_ms: u64,
    pub generated_at: DateTime<Utc>,
}

impl NewVideo {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Attach ownership and the plan snapshot.
    pub fn into_record(self, user: &UserRecord) -> VideoRecord {
        let billing = BillingSnapshot::capture(user, GenerationType::Video);
        VideoRecord {
            id: self.id,
            user_id: user.uid.clone(),
            user_email: user.email.clone(),
            video_id: self.video_id,
            video_url: self.video_url,
            thumbnail_url: self.thumbnail_url,
            file_name: self.file_name,
            file_size: self.file_size,
            original_image_id: self.original_image_id,
            original_image_url: self.original_image_url,
            product_name: self.product_name,
            style: self.style,
            description: self.description,
            video_prompt: self.video_prompt,
            duration_secs: VIDEO_DURATION_SECS,
            resolution: VIDEO_RESOLUTION.to_string(),
            format: VIDEO_FORMAT.to_string(),
            selected_product: self.selected_product,
            status: GenerationStatus::Completed,
            generation_error: None,
            model: self.model,
            processing_time_ms: self.processing_time_ms,
            generated_at: self.generated_at,
            billing,
        }
    }
}

/// A stored promotional video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub video_id: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub file_name: String,
    pub file_size: u64,
    /// Ledger or blob id of the source image.
    pub original_image_id: String,
    pub original_image_url: String,
    pub product_name: String,
    pub style: String,
    pub description: String,
    pub video_prompt: String,
    pub duration_secs: u32,
    pub resolution: String,
    pub format: String,
    pub selected_product: SelectedProduct,
    #[serde(default)]
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
    pub model: String,
    pub processing_time_ms: u64,
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub billing: BillingSnapshot,
}
