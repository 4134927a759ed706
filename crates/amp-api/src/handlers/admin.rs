//! Admin handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::auth::{require_admin, AuthUser};
use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub scanned: u32,
    pub reset: u32,
    pub failed: u32,
}

/// Run the monthly reset sweep now.
pub async fn reset_monthly_usage(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<ResetResponse>> {
    require_admin(&state, &user)?;

    let summary = state.ledger.reset_monthly_usage(Utc::now()).await?;
    metrics::record_monthly_reset(summary.reset);

    info!(
        admin_uid = %user.uid(),
        scanned = summary.scanned,
        reset = summary.reset,
        failed = summary.failed,
        "Manual monthly reset"
    );

    Ok(Json(ResetResponse {
        success: true,
        scanned: summary.scanned,
        reset: summary.reset,
        failed: summary.failed,
    }))
}
