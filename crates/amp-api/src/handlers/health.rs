//! Liveness and readiness endpoints.

use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Always answers while the process is serving.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub ledger: DependencyCheck,
    pub storage: DependencyCheck,
}

/// Outcome of one dependency check.
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DependencyCheck {
    Ok {
        #[serde(rename = "latencyMs")]
        latency_ms: u64,
    },
    Error {
        error: String,
    },
}

impl DependencyCheck {
    async fn run<E, F>(check: F) -> Self
    where
        E: std::fmt::Display,
        F: Future<Output = Result<(), E>>,
    {
        let started = Instant::now();
        match check.await {
            Ok(()) => DependencyCheck::Ok {
                latency_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => DependencyCheck::Error {
                error: e.to_string(),
            },
        }
    }

    fn passed(&self) -> bool {
        matches!(self, DependencyCheck::Ok { .. })
    }
}

/// Checks the ledger and the blob store; 503 when either is unreachable.
pub async fn ready(State(state): State<AppState>) -> Response {
    let (ledger, storage) = tokio::join!(
        DependencyCheck::run(state.ledger.check_connectivity()),
        DependencyCheck::run(state.blobs.check_connectivity()),
    );

    let healthy = ledger.passed() && storage.passed();
    let body = Json(ReadinessResponse {
        status: if healthy { "ready" } else { "degraded" },
        checks: ReadinessChecks { ledger, storage },
    });

    if healthy {
        body.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}
