//! User profile, usage and feature handlers.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use amp_models::{Feature, PlanFeatures, PlanTier, UsageStats, UserRecord};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Plan features in the wire casing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesResponse {
    pub monthly_credits_allowance: u32,
    pub has_watermark_removal: bool,
    pub has_priority_processing: bool,
    pub has_hd_generation: bool,
    pub has_batch_processing: bool,
    pub has_custom_brand_kit: bool,
    pub has_api_access: bool,
    pub has_team_collaboration: bool,
    pub max_storage_gb: u32,
}

impl From<PlanFeatures> for FeaturesResponse {
    fn from(f: PlanFeatures) -> Self {
        Self {
            monthly_credits_allowance: f.monthly_credits_allowance,
            has_watermark_removal: f.has_watermark_removal,
            has_priority_processing: f.has_priority_processing,
            has_hd_generation: f.has_hd_generation,
            has_batch_processing: f.has_batch_processing,
            has_custom_brand_kit: f.has_custom_brand_kit,
            has_api_access: f.has_api_access,
            has_team_collaboration: f.has_team_collaboration,
            max_storage_gb: f.max_storage_gb,
        }
    }
}

/// The caller's account.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub plan: PlanTier,
    pub is_active: bool,
    pub credits: u32,
    pub purchased_credits: u32,
    pub monthly_credits_used: u32,
    pub monthly_credits_allowance: u32,
    pub features: FeaturesResponse,
    pub plan_start_date: Option<DateTime<Utc>>,
    pub plan_end_date: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for UserResponse {
    fn from(user: UserRecord) -> Self {
        Self {
            uid: user.uid,
            name: user.name,
            email: user.email,
            plan: user.plan,
            is_active: user.is_active,
            credits: user.credits,
            purchased_credits: user.purchased_credits,
            monthly_credits_used: user.monthly_credits_used,
            monthly_credits_allowance: user.monthly_credits_allowance,
            features: user.features.into(),
            plan_start_date: user.plan_start_date,
            plan_end_date: user.plan_end_date,
            next_billing_date: user.next_billing_date,
            created_at: user.created_at,
        }
    }
}

/// Get the caller, creating a free account on first access.
pub async fn get_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<UserResponse>> {
    let record = state.ledger.upsert_user(user.identity()).await?;
    Ok(Json(record.into()))
}

/// Get the caller's usage counters.
pub async fn get_usage_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<UsageStats>> {
    let record = state.ledger.upsert_user(user.identity()).await?;
    Ok(Json(record.usage_stats()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureAccessResponse {
    pub feature: String,
    pub has_access: bool,
}

/// Check one feature flag. Unknown keys are never granted.
pub async fn check_feature_access(
    State(state): State<AppState>,
    user: AuthUser,
    Path(feature): Path<String>,
) -> ApiResult<Json<FeatureAccessResponse>> {
    let record = state.ledger.upsert_user(user.identity()).await?;
    let has_access = Feature::from_key(&feature)
        .map(|f| record.has_feature(f))
        .unwrap_or(false);

    Ok(Json(FeatureAccessResponse {
        feature,
        has_access,
    }))
}
