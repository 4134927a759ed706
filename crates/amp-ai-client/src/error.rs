//! AI provider error types.

use thiserror::Error;

use crate::fallback::{describe_attempts, Attempt};

pub type AiResult<T> = Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// 503 from the provider; Hugging Face uses it while a model loads.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("{provider} returned {status}: {body}")]
    RequestFailed {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Empty result from {0}")]
    EmptyResult(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("All {capability} providers failed: {}", describe_attempts(.attempts))]
    Exhausted {
        capability: &'static str,
        attempts: Vec<Attempt>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    /// Map a non-success provider status.
    pub fn from_status(provider: &str, status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == 503 {
            Self::ServiceUnavailable(format!("{}: {}", provider, body))
        } else {
            Self::RequestFailed {
                provider: provider.to_string(),
                status,
                body,
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::ServiceUnavailable(_) | AiError::Timeout(_) | AiError::Network(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_503_is_service_unavailable() {
        let err = AiError::from_status("hf", 503, "loading");
        assert!(matches!(err, AiError::ServiceUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_statuses_are_terminal() {
        let err = AiError::from_status("deepai", 401, "bad key");
        assert_eq!(err.to_string(), "deepai returned 401: bad key");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_exhausted_lists_every_attempt() {
        let err = AiError::Exhausted {
            capability: "image",
            attempts: vec![
                Attempt::new("deepai", "boom"),
                Attempt::new("sdxl", "loading"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "All image providers failed: deepai: boom; sdxl: loading"
        );
    }
}
