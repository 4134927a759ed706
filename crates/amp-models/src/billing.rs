//! Append-only billing audit rows and the pending-charge queue entry.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::generation::GenerationType;
use crate::image::NewImage;
use crate::plan::{CreditPack, PlanTier};
use crate::user::PlanChange;
use crate::video::NewVideo;

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Cancelled,
    Expired,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    #[default]
    Completed,
    Failed,
}

/// Record of one plan change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionHistory {
    pub id: String,
    pub user_id: String,
    pub plan: PlanTier,
    pub previous_plan: PlanTier,
    pub amount: f64,
    pub currency: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paypal_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionHistory {
    /// History row for an applied plan change.
    pub fn for_change(
        user_id: impl Into<String>,
        change: &PlanChange,
        paypal_transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            plan: change.new_plan,
            previous_plan: change.previous_plan,
            amount: change.new_plan.monthly_price_usd(),
            currency: DEFAULT_CURRENCY.to_string(),
            start_date: change.start_date,
            end_date: change.end_date,
            billing_cycle: BillingCycle::Monthly,
            status: SubscriptionStatus::Active,
            paypal_transaction_id,
            created_at: now,
        }
    }
}

/// Record of one credit purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreditPurchase {
    pub id: String,
    pub user_id: String,
    pub credits_amount: u32,
    pub price_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paypal_transaction_id: Option<String>,
    pub status: PurchaseStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CreditPurchase {
    /// A completed purchase priced from the matching credit pack.
    pub fn completed(
        user_id: impl Into<String>,
        credits_amount: u32,
        paypal_transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let price_usd = CreditPack::for_credits(credits_amount)
            .map(|p| p.price_usd)
            .unwrap_or(0.0);
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            credits_amount,
            price_usd,
            paypal_transaction_id,
            status: PurchaseStatus::Completed,
            created_at: now,
            completed_at: Some(now),
        }
    }
}

/// A generation that produced an asset but could not be charged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum ChargeRequest {
    Image(NewImage),
    Video(NewVideo),
}

impl ChargeRequest {
    pub fn generation_type(&self) -> GenerationType {
        match self {
            Self::Image(_) => GenerationType::Image,
            Self::Video(_) => GenerationType::Video,
        }
    }

    /// Ledger id the charge will create.
    pub fn record_id(&self) -> &str {
        match self {
            Self::Image(i) => &i.id,
            Self::Video(v) => &v.id,
        }
    }
}

/// Queue entry replayed by the billing reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PendingCharge {
    pub id: String,
    pub user_id: String,
    pub request: ChargeRequest,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub status: PendingStatus,
    /// Earliest time the reconciler may replay this charge.
    #[serde(default)]
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Replay state of a pending charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    #[default]
    Pending,
    /// Gave up after [`MAX_REPLAY_ATTEMPTS`]; kept for manual review.
    Parked,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Parked => "parked",
        }
    }
}

/// Replays after which a charge is parked.
pub const MAX_REPLAY_ATTEMPTS: u32 = 10;

const REPLAY_BACKOFF_STEP_MINUTES: i64 = 5;
const REPLAY_BACKOFF_CAP_MINUTES: i64 = 6 * 60;

impl PendingCharge {
    pub fn new(
        user_id: impl Into<String>,
        request: ChargeRequest,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: request.record_id().to_string(),
            user_id: user_id.into(),
            request,
            attempts: 1,
            last_error: Some(reason.into()),
            status: PendingStatus::Pending,
            next_attempt_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a failed replay and push the next one back linearly, parking
    /// the charge once it has used up its attempts.
    pub fn record_failure(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_error = Some(reason.into());
        self.updated_at = now;

        let wait = (REPLAY_BACKOFF_STEP_MINUTES * i64::from(self.attempts))
            .min(REPLAY_BACKOFF_CAP_MINUTES);
        self.next_attempt_at = now + chrono::Duration::minutes(wait);

        if self.attempts >= MAX_REPLAY_ATTEMPTS {
            self.status = PendingStatus::Parked;
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PendingStatus::Pending && self.next_attempt_at <= now
    }
}
