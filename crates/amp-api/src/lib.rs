//! Axum HTTP API server for Amplify.
//!
//! This crate provides:
//! - Image and video generation pipelines over injected AI providers
//! - Credit, subscription and library endpoints backed by the ledger
//! - Firebase ID token verification
//! - Rate limiting and security headers
//! - Prometheus metrics
//! - Background monthly reset and billing reconciliation

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use auth::{AuthConfig, AuthUser, JwksCache, TokenVerifier};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{BillingReconciler, MonthlyResetScheduler};
pub use state::{AppState, Services};
