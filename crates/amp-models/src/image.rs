//! Generated advertisement image records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::generation::{BillingSnapshot, GenerationStatus, GenerationType};
use crate::user::UserRecord;

/// Output size label stored on every image.
pub const GENERATED_IMAGE_SIZE: &str = "1024x1024";

/// Image generation result handed to the ledger for charging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NewImage {
    /// Ledger document id, assigned before the charge so replays are idempotent.
    pub id: String,
    /// Blob store id of the stored asset.
    pub image_id: String,
    pub image_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub product_name: String,
    pub style: String,
    pub description: String,
    pub video_prompt: String,
    /// Set when synthesis fell back to the original upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
    /// Model that produced the asset.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    pub generated_at: DateTime<Utc>,
}

impl NewImage {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Attach ownership and the plan snapshot.
    pub fn into_record(self, user: &UserRecord) -> ImageRecord {
        let billing = BillingSnapshot::capture(user, GenerationType::Image);
        ImageRecord {
            id: self.id,
            user_id: user.uid.clone(),
            user_email: user.email.clone(),
            image_id: self.image_id,
            image_url: self.image_url,
            file_name: self.file_name,
            file_size: self.file_size,
            product_name: self.product_name,
            style: self.style,
            size: GENERATED_IMAGE_SIZE.to_string(),
            description: self.description,
            video_prompt: self.video_prompt,
            status: GenerationStatus::Completed,
            generation_error: self.generation_error,
            model: self.model,
            generated_at: self.generated_at,
            billing,
        }
    }
}

/// A stored advertisement image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub image_id: String,
    pub image_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub product_name: String,
    pub style: String,
    pub size: String,
    pub description: String,
    pub video_prompt: String,
    #[serde(default)]
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
    pub model: String,
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub billing: BillingSnapshot,
}
