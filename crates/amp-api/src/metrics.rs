//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "amp_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "amp_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "amp_http_requests_in_flight";

    // Generation metrics
    pub const GENERATIONS_TOTAL: &str = "amp_generations_total";
    pub const GENERATION_DURATION_SECONDS: &str = "amp_generation_duration_seconds";

    // Billing metrics
    pub const PENDING_CHARGES_TOTAL: &str = "amp_pending_charges_total";
    pub const RECONCILED_CHARGES_TOTAL: &str = "amp_reconciled_charges_total";
    pub const MONTHLY_RESET_USERS_TOTAL: &str = "amp_monthly_reset_users_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "amp_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record the outcome of one generation (`charged`, `pending`, `failed`, `rejected`).
pub fn record_generation(kind: &str, outcome: &'static str, duration_secs: f64) {
    let labels = [("type", kind.to_string()), ("outcome", outcome.to_string())];
    counter!(names::GENERATIONS_TOTAL, &labels).increment(1);
    histogram!(names::GENERATION_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a generation that could not be charged.
pub fn record_pending_charge(kind: &str) {
    let labels = [("type", kind.to_string())];
    counter!(names::PENDING_CHARGES_TOTAL, &labels).increment(1);
}

/// Record a pending charge replay.
pub fn record_reconciled_charge(outcome: &'static str) {
    counter!(names::RECONCILED_CHARGES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record users moved to a new billing cycle.
pub fn record_monthly_reset(users: u32) {
    counter!(names::MONTHLY_RESET_USERS_TOTAL).increment(u64::from(users));
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

static IMAGE_VIDEOS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/images/[^/]+/videos").expect("image path pattern is valid")
});

static FEATURE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/features/[^/]+").expect("feature path pattern is valid"));

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    let path = IMAGE_VIDEOS_PATH.replace_all(path, "/images/:image_id/videos");
    let path = FEATURE_PATH.replace_all(&path, "/features/:feature");
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
