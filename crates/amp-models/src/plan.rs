//! Plan tiers, feature flags and credit pack pricing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Credits granted to a brand new user.
pub const SIGNUP_CREDITS: u32 = 10;

/// Price charged for a Pro subscription cycle, in USD.
pub const PRO_MONTHLY_PRICE_USD: f64 = 19.99;

/// Plan tier enumeration.
///
/// `Premium` exists in the feature tables but cannot be reached through
/// [`PlanTier::is_purchasable`] upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Premium,
}

impl PlanTier {
    /// Parse from string (case-insensitive). Unknown plans resolve to free.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pro" => PlanTier::Pro,
            "premium" => PlanTier::Premium,
            _ => PlanTier::Free,
        }
    }

    /// Strict parse used for user input.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "free" => Some(PlanTier::Free),
            "pro" => Some(PlanTier::Pro),
            "premium" => Some(PlanTier::Premium),
            _ => None,
        }
    }

    /// Get the plan name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Premium => "premium",
        }
    }

    /// Whether a user can switch to this plan through an upgrade.
    pub fn is_purchasable(&self) -> bool {
        matches!(self, PlanTier::Free | PlanTier::Pro)
    }

    /// Subscription price for one monthly cycle.
    pub fn monthly_price_usd(&self) -> f64 {
        match self {
            PlanTier::Pro => PRO_MONTHLY_PRICE_USD,
            PlanTier::Free | PlanTier::Premium => 0.0,
        }
    }

    /// Static feature table for this tier.
    pub fn features(&self) -> PlanFeatures {
        PlanFeatures::for_tier(*self)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A gated product capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    WatermarkRemoval,
    PriorityProcessing,
    HdGeneration,
    BatchProcessing,
    CustomBrandKit,
    ApiAccess,
    TeamCollaboration,
}

impl Feature {
    /// Parse a feature key. Unknown keys return `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "watermark_removal" => Some(Self::WatermarkRemoval),
            "priority_processing" => Some(Self::PriorityProcessing),
            "hd_generation" => Some(Self::HdGeneration),
            "batch_processing" => Some(Self::BatchProcessing),
            "custom_brand_kit" => Some(Self::CustomBrandKit),
            "api_access" => Some(Self::ApiAccess),
            "team_collaboration" => Some(Self::TeamCollaboration),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WatermarkRemoval => "watermark_removal",
            Self::PriorityProcessing => "priority_processing",
            Self::HdGeneration => "hd_generation",
            Self::BatchProcessing => "batch_processing",
            Self::CustomBrandKit => "custom_brand_kit",
            Self::ApiAccess => "api_access",
            Self::TeamCollaboration => "team_collaboration",
        }
    }
}

/// Allowance, storage and feature flags granted by a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanFeatures {
    /// Credits added to the balance every billing cycle.
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

impl PlanFeatures {
    /// Create the feature set for a specific plan tier.
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self {
                monthly_credits_allowance: 10,
                has_watermark_removal: false,
                has_priority_processing: false,
                has_hd_generation: false,
                has_batch_processing: false,
                has_custom_brand_kit: false,
                has_api_access: false,
                has_team_collaboration: false,
                max_storage_gb: 1,
            },
            PlanTier::Pro => Self {
                monthly_credits_allowance: 500,
                has_watermark_removal: true,
                has_priority_processing: true,
                has_hd_generation: true,
                has_batch_processing: true,
                has_custom_brand_kit: true,
                has_api_access: false,
                has_team_collaboration: false,
                max_storage_gb: 10,
            },
            PlanTier::Premium => Self {
                monthly_credits_allowance: 1500,
                has_watermark_removal: true,
                has_priority_processing: true,
                has_hd_generation: true,
                has_batch_processing: true,
                has_custom_brand_kit: true,
                has_api_access: true,
                has_team_collaboration: true,
                max_storage_gb: 100,
            },
        }
    }

    /// Credits granted on switching to the plan.
    pub fn signup_bonus(&self) -> u32 {
        self.monthly_credits_allowance
    }

    /// Whether the plan grants a feature.
    pub fn allows(&self, feature: Feature) -> bool {
        match feature {
            Feature::WatermarkRemoval => self.has_watermark_removal,
            Feature::PriorityProcessing => self.has_priority_processing,
            Feature::HdGeneration => self.has_hd_generation,
            Feature::BatchProcessing => self.has_batch_processing,
            Feature::CustomBrandKit => self.has_custom_brand_kit,
            Feature::ApiAccess => self.has_api_access,
            Feature::TeamCollaboration => self.has_team_collaboration,
        }
    }
}

/// A one-off credit pack offered for purchase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreditPack {
    pub credits: u32,
    pub price_usd: f64,
}

/// Packs currently on sale.
pub const CREDIT_PACKS: [CreditPack; 3] = [
    CreditPack { credits: 25, price_usd: 4.99 },
    CreditPack { credits: 50, price_usd: 9.99 },
    CreditPack { credits: 100, price_usd: 17.99 },
];

impl CreditPack {
    /// Find the pack matching an exact credit amount.
    pub fn for_credits(credits: u32) -> Option<Self> {
        CREDIT_PACKS.iter().copied().find(|p| p.credits == credits)
    }
}
