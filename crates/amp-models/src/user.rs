//! User ledger record and the invariant-preserving balance transitions.
//!
//! Every transition validates before it mutates, so a rejected operation
//! leaves the record untouched. Callers persist the result atomically.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generation::GenerationType;
use crate::plan::{Feature, PlanFeatures, PlanTier, SIGNUP_CREDITS};

/// Length of a billing cycle.
pub const BILLING_CYCLE_DAYS: i64 = 30;

/// Errors raised by ledger rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerRuleError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u32, available: u32 },

    #[error("Plan '{0}' is not available for upgrade")]
    PlanNotAvailable(PlanTier),

    #[error("Credit balance overflow")]
    CreditOverflow,
}

/// A user's plan, balance and usage counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserRecord {
    /// Identity token subject; also the document id.
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default)]
    pub plan: PlanTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Spendable balance (allowance plus purchased credits).
    #[serde(default)]
    pub credits: u32,
    #[serde(default)]
    pub monthly_credits_used: u32,
    #[serde(default)]
    pub monthly_credits_allowance: u32,
    /// Purchased credits never expire.
    #[serde(default)]
    pub purchased_credits: u32,

    #[serde(default)]
    pub image_generated_today: u32,
    #[serde(default)]
    pub video_generated_today: u32,
    #[serde(default)]
    pub downloads_today: u32,
    /// UTC day (YYYY-MM-DD) the daily counters belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_day: Option<String>,
    #[serde(default)]
    pub image_generated_this_month: u32,
    #[serde(default)]
    pub video_generated_this_month: u32,

    pub features: PlanFeatures,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_billing_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_billing_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paypal_subscription_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Result of a plan change, used for the history row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanChange {
    pub previous_plan: PlanTier,
    pub new_plan: PlanTier,
    pub credits_added: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Read-only summary of a user's consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub plan: PlanTier,
    pub credits: u32,
    pub purchased_credits: u32,
    pub monthly_credits_used: u32,
    pub monthly_credits_allowance: u32,
    pub credits_remaining_in_allowance: u32,
    pub image_generated_today: u32,
    pub video_generated_today: u32,
    pub downloads_today: u32,
    pub image_generated_this_month: u32,
    pub video_generated_this_month: u32,
    pub next_billing_date: Option<DateTime<Utc>>,
}

fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

impl UserRecord {
    /// Create a free-plan user with the signup balance.
    pub fn new(
        uid: impl Into<String>,
        name: Option<String>,
        email: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let plan = PlanTier::Free;
        Self {
            uid: uid.into(),
            name,
            email,
            plan,
            plan_start_date: Some(now),
            plan_end_date: None,
            is_active: true,
            credits: SIGNUP_CREDITS,
            monthly_credits_used: 0,
            monthly_credits_allowance: plan.features().monthly_credits_allowance,
            purchased_credits: 0,
            image_generated_today: 0,
            video_generated_today: 0,
            downloads_today: 0,
            usage_day: Some(day_key(now)),
            image_generated_this_month: 0,
            video_generated_this_month: 0,
            features: plan.features(),
            last_billing_date: Some(now),
            next_billing_date: Some(now + Duration::days(BILLING_CYCLE_DAYS)),
            paypal_subscription_id: None,
            created_at: now,
            updated_at: now,
            last_active_at: Some(now),
        }
    }

    /// Whether the user has at least `amount` spendable credits.
    pub fn can_afford(&self, amount: u32) -> bool {
        self.credits >= amount
    }

    /// Whether the plan grants a feature.
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.allows(feature)
    }

    /// Zero the daily counters when `now` falls on a different UTC day.
    pub fn roll_daily_counters(&mut self, now: DateTime<Utc>) {
        let today = day_key(now);
        if self.usage_day.as_deref() != Some(today.as_str()) {
            self.image_generated_today = 0;
            self.video_generated_today = 0;
            self.downloads_today = 0;
            self.usage_day = Some(today);
        }
    }

    /// Debit credits for a generation. Returns the remaining balance.
    pub fn debit(
        &mut self,
        amount: u32,
        kind: GenerationType,
        now: DateTime<Utc>,
    ) -> Result<u32, LedgerRuleError> {
        let remaining = self
            .credits
            .checked_sub(amount)
            .ok_or(LedgerRuleError::InsufficientCredits {
                required: amount,
                available: self.credits,
            })?;

        self.roll_daily_counters(now);
        self.credits = remaining;
        self.monthly_credits_used = self.monthly_credits_used.saturating_add(amount);
        match kind {
            GenerationType::Image => {
                self.image_generated_this_month += 1;
                self.image_generated_today += 1;
            }
            GenerationType::Video => {
                self.video_generated_this_month += 1;
                self.video_generated_today += 1;
            }
        }
        self.updated_at = now;
        Ok(remaining)
    }

    /// Add purchased credits to both the balance and the purchased total.
    pub fn add_purchased_credits(
        &mut self,
        amount: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, LedgerRuleError> {
        let credits = self
            .credits
            .checked_add(amount)
            .ok_or(LedgerRuleError::CreditOverflow)?;
        let purchased = self
            .purchased_credits
            .checked_add(amount)
            .ok_or(LedgerRuleError::CreditOverflow)?;
        self.credits = credits;
        self.purchased_credits = purchased;
        self.updated_at = now;
        Ok(credits)
    }

    /// Switch plan, resetting monthly usage and granting the signup bonus.
    pub fn apply_upgrade(
        &mut self,
        plan: PlanTier,
        now: DateTime<Utc>,
    ) -> Result<PlanChange, LedgerRuleError> {
        if !plan.is_purchasable() {
            return Err(LedgerRuleError::PlanNotAvailable(plan));
        }
        let features = plan.features();
        let bonus = features.signup_bonus();
        let credits = self
            .credits
            .checked_add(bonus)
            .ok_or(LedgerRuleError::CreditOverflow)?;
        let end = now + Duration::days(BILLING_CYCLE_DAYS);

        let previous_plan = self.plan;
        self.plan = plan;
        self.plan_start_date = Some(now);
        self.plan_end_date = Some(end);
        self.is_active = true;
        self.credits = credits;
        self.monthly_credits_used = 0;
        self.monthly_credits_allowance = features.monthly_credits_allowance;
        self.features = features;
        self.last_billing_date = Some(now);
        self.next_billing_date = Some(end);
        self.updated_at = now;

        Ok(PlanChange {
            previous_plan,
            new_plan: plan,
            credits_added: bonus,
            start_date: now,
            end_date: end,
        })
    }

    /// Whether the last billing date is a full cycle old.
    pub fn is_due_for_monthly_reset(&self, now: DateTime<Utc>) -> bool {
        let last = self.last_billing_date.unwrap_or(self.created_at);
        last <= now - Duration::days(BILLING_CYCLE_DAYS)
    }

    /// Start a new billing cycle: zero monthly usage and refill the allowance.
    pub fn apply_monthly_reset(&mut self, now: DateTime<Utc>) {
        let allowance = self.plan.features().monthly_credits_allowance;
        self.monthly_credits_used = 0;
        self.image_generated_this_month = 0;
        self.video_generated_this_month = 0;
        self.monthly_credits_allowance = allowance;
        self.credits = self.credits.saturating_add(allowance);
        self.last_billing_date = Some(now);
        self.next_billing_date = Some(now + Duration::days(BILLING_CYCLE_DAYS));
        self.updated_at = now;
    }

    /// Summarize usage for display.
    pub fn usage_stats(&self) -> UsageStats {
        UsageStats {
            plan: self.plan,
            credits: self.credits,
            purchased_credits: self.purchased_credits,
            monthly_credits_used: self.monthly_credits_used,
            monthly_credits_allowance: self.monthly_credits_allowance,
            credits_remaining_in_allowance: self
                .monthly_credits_allowance
                .saturating_sub(self.monthly_credits_used),
            image_generated_today: self.image_generated_today,
            video_generated_today: self.video_generated_today,
            downloads_today: self.downloads_today,
            image_generated_this_month: self.image_generated_this_month,
            video_generated_this_month: self.video_generated_this_month,
            next_billing_date: self.next_billing_date,
        }
    }
}
