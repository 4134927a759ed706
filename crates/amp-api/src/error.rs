//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use amp_firestore::LedgerError;
use amp_models::LedgerRuleError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payment required: {0}")]
    PaymentRequired(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A terminal failure of an external service during generation.
    #[error("{service} error: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] amp_storage::StorageError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn upstream(service: &'static str, msg: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: msg.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Upstream { .. } | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to the caller, without the variant prefix.
    fn public_message(&self) -> String {
        match self {
            ApiError::Unauthorized(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::BadRequest(m)
            | ApiError::PaymentRequired(m)
            | ApiError::PayloadTooLarge(m)
            | ApiError::Conflict(m)
            | ApiError::Validation(m) => m.clone(),
            ApiError::RateLimited => "Rate limit exceeded. Please try again later.".to_string(),
            ApiError::Upstream { message, .. } => message.clone(),
            ApiError::Internal(_) | ApiError::Storage(_) => self.to_string(),
        }
    }

    fn is_internal(&self) -> bool {
        matches!(self, ApiError::Internal(_) | ApiError::Storage(_))
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unauthenticated => ApiError::unauthorized("Not authenticated"),
            LedgerError::UserNotFound(_) => ApiError::not_found("User not found"),
            LedgerError::Rule(rule @ LedgerRuleError::InsufficientCredits { .. }) => {
                ApiError::PaymentRequired(rule.to_string())
            }
            LedgerError::Rule(rule) => ApiError::BadRequest(rule.to_string()),
            err @ LedgerError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            LedgerError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorDetails {
    timestamp: String,
    service: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ErrorDetails>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let error = if self.is_internal()
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.public_message()
        };

        let details = match &self {
            ApiError::Upstream { service, .. } => Some(ErrorDetails {
                timestamp: Utc::now().to_rfc3339(),
                service,
            }),
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            error,
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amp_firestore::FirestoreError;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_ledger_error_mapping() {
        let cases = [
            (LedgerError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (LedgerError::UserNotFound("u1".into()), StatusCode::NOT_FOUND),
            (
                LedgerError::Rule(LedgerRuleError::InsufficientCredits {
                    required: 10,
                    available: 3,
                }),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                LedgerError::Rule(LedgerRuleError::PlanNotAvailable(amp_models::PlanTier::Premium)),
                StatusCode::BAD_REQUEST,
            ),
            (
                LedgerError::Conflict {
                    user_id: "u1".into(),
                    attempts: 5,
                },
                StatusCode::CONFLICT,
            ),
            (
                LedgerError::Store(FirestoreError::request_failed("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[tokio::test]
    async fn test_client_error_body_has_plain_message() {
        let (status, body) = body_json(ApiError::bad_request("No file uploaded")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "No file uploaded");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_payload_too_large_uses_error_shape() {
        let (status, body) = body_json(ApiError::PayloadTooLarge("too big".into())).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "too big");
    }

    #[tokio::test]
    async fn test_upstream_error_carries_service() {
        let (status, body) =
            body_json(ApiError::upstream("RunPod", "No video URL returned")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "No video URL returned");
        assert_eq!(body["details"]["service"], "RunPod");
        assert!(body["details"]["timestamp"].is_string());
    }
}
