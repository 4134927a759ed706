//! Generated image and video listings.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use amp_models::{
    GenerationStatus, ImageRecord, PlanTier, QualityLevel, SelectedProduct, VideoRecord,
};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Maximum allowed limit for listing queries.
const MAX_LIMIT: u32 = 100;

/// Query parameters for listing endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Owner to list for. Only the caller's own id is accepted.
    pub user_id: Option<String>,
    /// Maximum number of records to return (clamped to 1..100).
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

impl ListQuery {
    fn clamped_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_LIMIT)
    }

    /// Resolve the owner, rejecting requests for other users' assets.
    fn owner<'a>(&'a self, user: &'a AuthUser) -> ApiResult<&'a str> {
        match self.user_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) if id != user.uid() => {
                Err(ApiError::forbidden("Cannot list another user's assets"))
            }
            _ => Ok(user.uid()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub id: String,
    pub image_id: String,
    pub image_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub product_name: String,
    pub style: String,
    pub size: String,
    pub description: String,
    pub video_prompt: String,
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
    pub model: String,
    pub credits_used: u32,
    pub plan_used: PlanTier,
    pub has_watermark: bool,
    pub quality_level: QualityLevel,
    pub generated_at: DateTime<Utc>,
}

impl From<ImageRecord> for ImageResponse {
    fn from(image: ImageRecord) -> Self {
        Self {
            id: image.id,
            image_id: image.image_id,
            image_url: image.image_url,
            file_name: image.file_name,
            file_size: image.file_size,
            product_name: image.product_name,
            style: image.style,
            size: image.size,
            description: image.description,
            video_prompt: image.video_prompt,
            status: image.status,
            generation_error: image.generation_error,
            model: image.model,
            credits_used: image.billing.credits_used,
            plan_used: image.billing.plan_used,
            has_watermark: image.billing.has_watermark,
            quality_level: image.billing.quality_level,
            generated_at: image.generated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
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
    pub duration: u32,
    pub resolution: String,
    pub format: String,
    pub selected_product: SelectedProduct,
    pub status: GenerationStatus,
    pub model: String,
    pub processing_time_ms: u64,
    pub credits_used: u32,
    pub plan_used: PlanTier,
    pub has_watermark: bool,
    pub quality_level: QualityLevel,
    pub generated_at: DateTime<Utc>,
}

impl From<VideoRecord> for VideoResponse {
    fn from(video: VideoRecord) -> Self {
        Self {
            id: video.id,
            video_id: video.video_id,
            video_url: video.video_url,
            thumbnail_url: video.thumbnail_url,
            file_name: video.file_name,
            file_size: video.file_size,
            original_image_id: video.original_image_id,
            original_image_url: video.original_image_url,
            product_name: video.product_name,
            style: video.style,
            description: video.description,
            video_prompt: video.video_prompt,
            duration: video.duration_secs,
            resolution: video.resolution,
            format: video.format,
            selected_product: video.selected_product,
            status: video.status,
            model: video.model,
            processing_time_ms: video.processing_time_ms,
            credits_used: video.billing.credits_used,
            plan_used: video.billing.plan_used,
            has_watermark: video.billing.has_watermark,
            quality_level: video.billing.quality_level,
            generated_at: video.generated_at,
        }
    }
}

/// List the caller's images, newest first.
pub async fn list_images(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ImageResponse>>> {
    let owner = query.owner(&user)?;
    let images = state.ledger.user_images(owner, query.clamped_limit()).await?;
    Ok(Json(images.into_iter().map(ImageResponse::from).collect()))
}

/// List the caller's videos, newest first.
pub async fn list_videos(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<VideoResponse>>> {
    let owner = query.owner(&user)?;
    let videos = state.ledger.user_videos(owner, query.clamped_limit()).await?;
    Ok(Json(videos.into_iter().map(VideoResponse::from).collect()))
}

/// List the caller's videos generated from one image.
pub async fn list_videos_for_image(
    State(state): State<AppState>,
    user: AuthUser,
    Path(image_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<VideoResponse>>> {
    let owner = query.owner(&user)?;
    let videos = state
        .ledger
        .videos_for_image(owner, &image_id, query.clamped_limit())
        .await?;
    Ok(Json(videos.into_iter().map(VideoResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use amp_firestore::UserIdentity;

    fn query(user_id: Option<&str>, limit: u32) -> ListQuery {
        ListQuery {
            user_id: user_id.map(String::from),
            limit,
        }
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(query(None, 0).clamped_limit(), 1);
        assert_eq!(query(None, 50).clamped_limit(), 50);
        assert_eq!(query(None, 500).clamped_limit(), 100);
    }

    #[test]
    fn test_owner_defaults_to_caller() {
        let user = AuthUser(UserIdentity::new("u1"));
        assert_eq!(query(None, 10).owner(&user).unwrap(), "u1");
        assert_eq!(query(Some("u1"), 10).owner(&user).unwrap(), "u1");
        assert!(matches!(
            query(Some("u2"), 10).owner(&user),
            Err(ApiError::Forbidden(_))
        ));
    }
}
