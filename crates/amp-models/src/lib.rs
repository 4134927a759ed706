//! Shared data models for the Amplify backend.
//!
//! This crate provides Serde-serializable types for:
//! - Users, plans and feature flags
//! - Generated images and videos
//! - Generation audit rows and billing history
//!
//! It also owns the pure ledger rules applied by the store layer.

pub mod billing;
pub mod generation;
pub mod image;
pub mod plan;
pub mod user;
pub mod utils;
pub mod video;

// Re-export common types
pub use billing::{
    BillingCycle, ChargeRequest, CreditPurchase, PendingCharge, PendingStatus, PurchaseStatus,
    SubscriptionHistory, SubscriptionStatus, MAX_REPLAY_ATTEMPTS,
};
pub use generation::{
    BillingSnapshot, GenerationStat, GenerationStatus, GenerationType, QualityLevel,
    IMAGE_GENERATION_COST, VIDEO_GENERATION_COST,
};
pub use image::{ImageRecord, NewImage};
pub use plan::{CreditPack, Feature, PlanFeatures, PlanTier, CREDIT_PACKS};
pub use user::{LedgerRuleError, PlanChange, UsageStats, UserRecord};
pub use utils::{sanitize_path_segment, split_file_name, timestamped_file_name};
pub use video::{
    NewVideo, SelectedProduct, VideoRecord, VIDEO_DURATION_SECS, VIDEO_FORMAT, VIDEO_RESOLUTION,
};
