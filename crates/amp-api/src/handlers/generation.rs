//! Image and video generation handlers.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::{
    ImageGeneration, ImageRequest, UploadedFile, VideoGeneration, VideoRequest, FILE_TOO_LARGE,
};
use crate::state::AppState;

const IMAGE_SUCCESS_MESSAGE: &str = "File uploaded and processed successfully";
const VIDEO_SUCCESS_MESSAGE: &str = "Video generated and saved successfully!";

/// Successful generation response.
#[derive(Debug, Serialize)]
pub struct GenerationResponse<T> {
    pub success: bool,
    pub message: &'static str,
    pub data: T,
}

/// 202 when the asset was produced but the charge is still pending.
fn respond<T>(
    message: &'static str,
    data: T,
    billing_pending: bool,
) -> (StatusCode, Json<GenerationResponse<T>>) {
    let status = if billing_pending {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(GenerationResponse {
            success: true,
            message,
            data,
        }),
    )
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge(FILE_TOO_LARGE.to_string());
    }
    ApiError::bad_request(format!("Invalid multipart body: {}", err))
}

async fn field_text(field: Field<'_>) -> ApiResult<String> {
    field.text().await.map_err(multipart_error)
}

/// Parsed multipart form of an upload.
struct UploadForm {
    request: ImageRequest,
    user_id: Option<String>,
}

async fn read_upload_form(multipart: &mut Multipart) -> ApiResult<UploadForm> {
    let mut request = ImageRequest::default();
    let mut user_id = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                request.file = Some(UploadedFile {
                    bytes: bytes.to_vec(),
                    file_name,
                    content_type,
                });
            }
            "userId" => user_id = Some(field_text(field).await?),
            "description" => request.description = field_text(field).await?,
            "selectedProduct" => request.selected_product = field_text(field).await?,
            "selectedStyle" => request.selected_style = field_text(field).await?,
            // userPlan is read from the ledger
            _ => {}
        }
    }

    Ok(UploadForm { request, user_id })
}

/// Reject a form that names a different user than the token.
fn check_form_user(user: &AuthUser, user_id: Option<&str>) -> ApiResult<()> {
    match user_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) if id != user.uid() => Err(ApiError::forbidden(
            "userId does not match the authenticated user",
        )),
        _ => Ok(()),
    }
}

/// Upload a product image and generate an advertisement from it.
pub async fn upload_image(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<GenerationResponse<ImageGeneration>>)> {
    let form = read_upload_form(&mut multipart).await?;
    check_form_user(&user, form.user_id.as_deref())?;

    let generation = state.image_pipeline.run(user.identity(), form.request).await?;

    info!(
        user_id = %user.uid(),
        record_id = %generation.billing.record_id,
        has_ai_generation = generation.generated.has_ai_generation,
        "Image generation finished"
    );

    let pending = generation.billing.is_pending();
    Ok(respond(IMAGE_SUCCESS_MESSAGE, generation, pending))
}

/// Generate a promotional video from a previously generated image.
pub async fn generate_video(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<VideoRequest>,
) -> ApiResult<(StatusCode, Json<GenerationResponse<VideoGeneration>>)> {
    let generation = state.video_pipeline.run(user.identity(), request).await?;

    info!(
        user_id = %user.uid(),
        record_id = %generation.billing.record_id,
        "Video generation finished"
    );

    let pending = generation.billing.is_pending();
    Ok(respond(VIDEO_SUCCESS_MESSAGE, generation, pending))
}

#[cfg(test)]
mod tests {
    use super::*;
    use amp_firestore::UserIdentity;

    #[test]
    fn test_form_user_must_match_token() {
        let user = AuthUser(UserIdentity::new("u1"));
        assert!(check_form_user(&user, None).is_ok());
        assert!(check_form_user(&user, Some("")).is_ok());
        assert!(check_form_user(&user, Some("u1")).is_ok());
        let err = check_form_user(&user, Some("u2")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_pending_billing_is_accepted() {
        let (status, _) = respond("ok", (), true);
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, body) = respond("ok", (), false);
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
    }
}
