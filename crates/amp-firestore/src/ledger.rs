//! Credit ledger store interface.
//!
//! The [`LedgerStore`] trait is the seam between the generation pipelines
//! and persistence. Every mutation is all-or-nothing: a rejected operation
//! performs no writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use amp_models::{
    GenerationType, ImageRecord, LedgerRuleError, NewImage, NewVideo, PendingCharge, PlanTier,
    UserRecord, VideoRecord,
};

use crate::error::FirestoreError;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error(transparent)]
    Rule(#[from] LedgerRuleError),

    #[error("Concurrent updates to user {user_id}, gave up after {attempts} attempts")]
    Conflict { user_id: String, attempts: u32 },

    #[error("Ledger store error: {0}")]
    Store(#[from] FirestoreError),
}

impl LedgerError {
    pub fn is_insufficient_credits(&self) -> bool {
        matches!(self, Self::Rule(LedgerRuleError::InsufficientCredits { .. }))
    }
}

/// Caller identity taken from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub uid: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UserIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: None,
            email: None,
        }
    }
}

/// Outcome of a successful debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    /// Ledger id of the inserted image or video, if any.
    pub record_id: Option<String>,
    pub remaining_credits: u32,
}

/// Summary of one monthly reset sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub scanned: u32,
    pub reset: u32,
    pub failed: u32,
}

/// Rejects empty identities before any store access.
pub fn require_identity(uid: &str) -> LedgerResult<()> {
    if uid.trim().is_empty() {
        Err(LedgerError::Unauthenticated)
    } else {
        Ok(())
    }
}

/// Persistence for users, generated assets and billing history.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch a user.
    async fn get_user(&self, uid: &str) -> LedgerResult<UserRecord>;

    /// Fetch the user for `identity`, creating a free-plan record on first access.
    async fn upsert_user(&self, identity: &UserIdentity) -> LedgerResult<UserRecord>;

    /// Debit one image charge and insert the image with its stat row.
    async fn create_image(&self, uid: &str, image: NewImage) -> LedgerResult<ChargeReceipt>;

    /// Debit one video charge and insert the video with its stat row.
    async fn create_video(&self, uid: &str, video: NewVideo) -> LedgerResult<ChargeReceipt>;

    /// Debit credits directly and record a stat row.
    async fn use_credits(
        &self,
        uid: &str,
        amount: u32,
        kind: GenerationType,
    ) -> LedgerResult<ChargeReceipt>;

    /// Add purchased credits and record the purchase.
    async fn add_credits(
        &self,
        uid: &str,
        amount: u32,
        paypal_transaction_id: Option<String>,
    ) -> LedgerResult<UserRecord>;

    /// Switch plan and record the subscription change.
    async fn upgrade_subscription(
        &self,
        uid: &str,
        plan: PlanTier,
        paypal_transaction_id: Option<String>,
    ) -> LedgerResult<UserRecord>;

    /// Start a new billing cycle for every user whose cycle has elapsed.
    async fn reset_monthly_usage(&self, now: DateTime<Utc>) -> LedgerResult<ResetSummary>;

    /// The user's images, newest first.
    async fn user_images(&self, uid: &str, limit: u32) -> LedgerResult<Vec<ImageRecord>>;

    /// The user's videos, newest first.
    async fn user_videos(&self, uid: &str, limit: u32) -> LedgerResult<Vec<VideoRecord>>;

    /// The user's videos generated from one source image.
    async fn videos_for_image(
        &self,
        uid: &str,
        image_id: &str,
        limit: u32,
    ) -> LedgerResult<Vec<VideoRecord>>;

    /// Store or update an unbilled generation.
    async fn save_pending_charge(&self, charge: &PendingCharge) -> LedgerResult<()>;

    /// Unparked charges whose next replay is due at `now`, earliest first.
    async fn pending_charges(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> LedgerResult<Vec<PendingCharge>>;

    /// Remove a settled pending charge.
    async fn resolve_pending_charge(&self, id: &str) -> LedgerResult<()>;

    /// Cheap reachability check used by readiness.
    async fn check_connectivity(&self) -> LedgerResult<()>;
}
