//! Ordered first-success iteration over interchangeable providers.

use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use crate::error::{AiError, AiResult};

const PROVIDER_ATTEMPTS_TOTAL: &str = "amp_provider_attempts_total";

/// A named provider in a fallback chain.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
}

/// One failed provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub provider: String,
    pub error: String,
}

impl Attempt {
    pub fn new(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            error: error.into(),
        }
    }
}

pub(crate) fn describe_attempts(attempts: &[Attempt]) -> String {
    if attempts.is_empty() {
        return "no providers configured".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.provider, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The first successful result of a chain.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    /// Name of the provider that produced `value`.
    pub provider: String,
    /// Providers that failed before it.
    pub failures: Vec<Attempt>,
}

/// Call `candidates` in order and stop at the first success.
pub async fn first_success<'a, P, T, F, Fut>(
    capability: &'static str,
    candidates: &'a [Arc<P>],
    mut call: F,
) -> AiResult<Outcome<T>>
where
    P: Provider + ?Sized,
    F: FnMut(&'a P) -> Fut,
    Fut: Future<Output = AiResult<T>>,
{
    let mut failures = Vec::new();

    for candidate in candidates {
        let name = candidate.name().to_string();
        match call(candidate.as_ref()).await {
            Ok(value) => {
                record(capability, &name, "success");
                info!(capability, provider = %name, "Provider succeeded");
                return Ok(Outcome {
                    value,
                    provider: name,
                    failures,
                });
            }
            Err(e) => {
                record(capability, &name, "failure");
                warn!(capability, provider = %name, error = %e, "Provider failed, falling back");
                failures.push(Attempt::new(name, e.to_string()));
            }
        }
    }

    Err(AiError::Exhausted {
        capability,
        attempts: failures,
    })
}

fn record(capability: &'static str, provider: &str, outcome: &'static str) {
    counter!(
        PROVIDER_ATTEMPTS_TOTAL,
        "capability" => capability,
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        ok: bool,
    }

    impl Provider for Fixed {
        fn name(&self) -> &str {
            self.name
        }
    }

    impl Fixed {
        async fn call(&self) -> AiResult<&'static str> {
            if self.ok {
                Ok(self.name)
            } else {
                Err(AiError::EmptyResult(self.name.to_string()))
            }
        }
    }

    fn chain(outcomes: &[(&'static str, bool)]) -> Vec<Arc<Fixed>> {
        outcomes
            .iter()
            .map(|(name, ok)| Arc::new(Fixed { name, ok: *ok }))
            .collect()
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let providers = chain(&[("a", false), ("b", true), ("c", true)]);
        let mut called = Vec::new();
        let outcome = first_success("vision", &providers, |p| {
            called.push(p.name().to_string());
            p.call()
        })
        .await
        .unwrap();
        assert_eq!(outcome.value, "b");
        assert_eq!(outcome.provider, "b");
        assert_eq!(outcome.failures, vec![Attempt::new("a", "Empty result from a")]);
        assert_eq!(called, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_all_failures() {
        let providers = chain(&[("a", false), ("b", false)]);
        let err = first_success("image", &providers, |p| p.call()).await.unwrap_err();
        match err {
            AiError::Exhausted { capability, attempts } => {
                assert_eq!(capability, "image");
                assert_eq!(attempts.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let providers: Vec<Arc<Fixed>> = Vec::new();
        let err = first_success("image", &providers, |p| p.call()).await.unwrap_err();
        assert!(err.to_string().contains("no providers configured"));
    }
}
