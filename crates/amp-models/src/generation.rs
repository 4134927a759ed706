//! Generation kinds, credit costs and the immutable generation audit row.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::PlanTier;
use crate::user::UserRecord;

/// Credits charged for one advertisement image.
pub const IMAGE_GENERATION_COST: u32 = 1;

/// Credits charged for one promotional video.
pub const VIDEO_GENERATION_COST: u32 = 10;

/// Kind of generated asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GenerationType {
    Image,
    Video,
}

impl GenerationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    /// Credits charged per generation of this kind.
    pub fn cost(&self) -> u32 {
        match self {
            Self::Image => IMAGE_GENERATION_COST,
            Self::Video => VIDEO_GENERATION_COST,
        }
    }
}

impl std::fmt::Display for GenerationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a generated asset record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Generating,
    #[default]
    Completed,
    Failed,
}

/// Output quality tier recorded on each asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    #[default]
    Standard,
    Hd,
    UltraHd,
}

/// Plan-derived billing fields captured on an asset at charge time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BillingSnapshot {
    pub credits_used: u32,
    pub plan_used: PlanTier,
    pub has_watermark: bool,
    pub quality_level: QualityLevel,
}

impl BillingSnapshot {
    /// Snapshot the user's plan for a generation of the given kind.
    pub fn capture(user: &UserRecord, kind: GenerationType) -> Self {
        let quality_level = if user.features.has_hd_generation {
            QualityLevel::Hd
        } else {
            QualityLevel::Standard
        };
        Self {
            credits_used: kind.cost(),
            plan_used: user.plan,
            has_watermark: !user.features.has_watermark_removal,
            quality_level,
        }
    }
}

/// Append-only audit record of one completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationStat {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub generation_type: GenerationType,
    pub generated_at: DateTime<Utc>,
    pub success: bool,
    /// Provider model that produced the asset.
    pub model: String,
    pub credits_used: u32,
    pub plan_used: PlanTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl GenerationStat {
    /// Create a stat row for a charged generation.
    pub fn new(
        user_id: impl Into<String>,
        generation_type: GenerationType,
        model: impl Into<String>,
        snapshot: &BillingSnapshot,
        processing_time_ms: Option<u64>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            generation_type,
            generated_at,
            success: true,
            model: model.into(),
            credits_used: snapshot.credits_used,
            plan_used: snapshot.plan_used,
            processing_time_ms,
        }
    }
}
