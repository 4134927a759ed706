//! Bounded retry policy for provider calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::AiResult;

/// How often, and how far apart, a retryable provider error is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Two attempts two seconds apart, for models that answer 503 while loading.
    pub const fn model_loading() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(2),
        }
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> AiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AiResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        label, attempt, attempts, self.backoff, e
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
