//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    add_credits, check_feature_access, generate_video, get_usage_stats, get_user, health,
    list_images, list_videos, list_videos_for_image, ready, reset_monthly_usage,
    upgrade_subscription, upload_image, use_credits,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, payload_too_large_json, propagate_request_id_layer, rate_limit_middleware,
    request_logging, security_headers, set_request_id_layer, RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let generation_routes = Router::new()
        .route("/upload-image", post(upload_image))
        .route("/generate-video", post(generate_video));

    let user_routes = Router::new()
        .route("/user", get(get_user))
        .route("/user/usage", get(get_usage_stats))
        .route("/user/features/:feature", get(check_feature_access));

    let billing_routes = Router::new()
        .route("/credits/add", post(add_credits))
        .route("/credits/use", post(use_credits))
        .route("/subscription/upgrade", post(upgrade_subscription));

    let library_routes = Router::new()
        .route("/images", get(list_images))
        .route("/images/:image_id/videos", get(list_videos_for_image))
        .route("/videos", get(list_videos));

    let admin_routes =
        Router::new().route("/admin/reset-monthly-usage", post(reset_monthly_usage));

    let rate_limiter = Arc::new(RateLimiterCache::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    ));

    let api_routes = Router::new()
        .route("/health", get(health))
        .merge(generation_routes)
        .merge(user_routes)
        .merge(billing_routes)
        .merge(library_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        // Multipart uploads are bounded by the outer limit, not axum's 2 MB default
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(payload_too_large_json))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_logging))
        .layer(propagate_request_id_layer())
        .layer(set_request_id_layer())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
