//! Credit and subscription handlers.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use amp_models::{GenerationType, PlanTier};

use super::user::UserResponse;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn validate<T: Validate>(body: &T) -> ApiResult<()> {
    body.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddCreditsRequest {
    #[validate(range(max = 10000))]
    pub credits_to_add: u32,
    #[validate(length(min = 1, max = 128))]
    pub paypal_transaction_id: Option<String>,
}

/// Add purchased credits.
pub async fn add_credits(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<AddCreditsRequest>,
) -> ApiResult<Json<UserResponse>> {
    validate(&body)?;

    state.ledger.upsert_user(user.identity()).await?;
    let record = state
        .ledger
        .add_credits(user.uid(), body.credits_to_add, body.paypal_transaction_id)
        .await?;

    info!(
        user_id = %user.uid(),
        credits_added = body.credits_to_add,
        credits = record.credits,
        "Credits purchased"
    );

    Ok(Json(record.into()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UseCreditsRequest {
    #[validate(range(min = 1, max = 10000))]
    pub amount: u32,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCreditsResponse {
    pub success: bool,
    pub remaining_credits: u32,
}

/// Debit credits directly.
pub async fn use_credits(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UseCreditsRequest>,
) -> ApiResult<Json<UseCreditsResponse>> {
    validate(&body)?;
    let kind = GenerationType::from_str(&body.kind).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Invalid type '{}'. Must be one of: image, video",
            body.kind
        ))
    })?;

    state.ledger.upsert_user(user.identity()).await?;
    let receipt = state.ledger.use_credits(user.uid(), body.amount, kind).await?;

    Ok(Json(UseCreditsResponse {
        success: true,
        remaining_credits: receipt.remaining_credits,
    }))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequest {
    pub new_plan: String,
    pub credits_to_add: Option<u32>,
    #[validate(length(min = 1, max = 128))]
    pub paypal_transaction_id: Option<String>,
}

/// Resolve the target plan and check the client's view of its bonus.
fn resolve_upgrade(body: &UpgradeRequest) -> ApiResult<PlanTier> {
    let plan = PlanTier::parse(&body.new_plan)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown plan '{}'", body.new_plan)))?;

    if !plan.is_purchasable() {
        return Err(ApiError::bad_request(format!(
            "Plan '{}' is not available for upgrade",
            plan.as_str()
        )));
    }

    let bonus = plan.features().signup_bonus();
    match body.credits_to_add {
        Some(credits) if credits != bonus => Err(ApiError::bad_request(format!(
            "creditsToAdd must be {} for the {} plan",
            bonus,
            plan.as_str()
        ))),
        _ => Ok(plan),
    }
}

/// Switch the caller's plan.
pub async fn upgrade_subscription(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UpgradeRequest>,
) -> ApiResult<Json<UserResponse>> {
    validate(&body)?;
    let plan = resolve_upgrade(&body)?;

    state.ledger.upsert_user(user.identity()).await?;
    let record = state
        .ledger
        .upgrade_subscription(user.uid(), plan, body.paypal_transaction_id)
        .await?;

    info!(user_id = %user.uid(), plan = plan.as_str(), "Subscription changed");

    Ok(Json(record.into()))
}
