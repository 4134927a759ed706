//! Outcome and error types shared by the generation pipelines.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use amp_firestore::{ChargeReceipt, LedgerError, LedgerResult, LedgerStore, UserIdentity};
use amp_models::{ChargeRequest, GenerationType, LedgerRuleError, PendingCharge, UserRecord};

use crate::error::ApiError;
use crate::metrics;

/// Step of a pipeline that can fail terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    OriginalUpload,
    VideoSynthesis,
    VideoDownload,
    VideoUpload,
}

impl Stage {
    /// External service reported to the caller for a failure in this stage.
    pub fn service(&self) -> &'static str {
        match self {
            Stage::OriginalUpload | Stage::VideoUpload => "Storage",
            Stage::VideoSynthesis | Stage::VideoDownload => "RunPod",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::OriginalUpload => "original_upload",
            Stage::VideoSynthesis => "video_synthesis",
            Stage::VideoDownload => "video_download",
            Stage::VideoUpload => "video_upload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for pipeline runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Terminal pipeline failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed request, rejected before any external call.
    #[error("{0}")]
    Invalid(String),

    /// Rejected by the ledger before generation started.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{message}")]
    Upstream { stage: Stage, message: String },

    #[error("{stage} step timed out after {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },
}

impl PipelineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn upstream(stage: Stage, msg: impl Into<String>) -> Self {
        Self::Upstream {
            stage,
            message: msg.into(),
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Upstream { stage, .. } | Self::Timeout { stage, .. } => Some(*stage),
            Self::Invalid(_) | Self::Ledger(_) => None,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Invalid(msg) => ApiError::BadRequest(msg),
            PipelineError::Ledger(e) => e.into(),
            err @ (PipelineError::Upstream { .. } | PipelineError::Timeout { .. }) => {
                let service = err.stage().map_or("Unknown", |s| s.service());
                ApiError::upstream(service, err.to_string())
            }
        }
    }
}

/// Run one terminal step under the per-step deadline.
pub(crate) async fn step<T, E, Fut>(
    stage: Stage,
    deadline: Duration,
    describe: impl FnOnce(E) -> String,
    fut: Fut,
) -> PipelineResult<T>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PipelineError::upstream(stage, describe(e))),
        Err(_) => Err(PipelineError::Timeout {
            stage,
            after: deadline,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    Charged,
    Pending,
}

/// How a finished generation was billed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSummary {
    pub status: BillingStatus,
    pub credits_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_credits: Option<u32>,
    /// Ledger id of the image or video.
    pub record_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BillingSummary {
    pub fn is_pending(&self) -> bool {
        self.status == BillingStatus::Pending
    }
}

/// Read (or create) the caller and check they can pay for `kind`.
pub(crate) async fn preflight(
    ledger: &dyn LedgerStore,
    identity: &UserIdentity,
    kind: GenerationType,
) -> PipelineResult<UserRecord> {
    let user = ledger.upsert_user(identity).await?;
    let cost = kind.cost();
    if !user.can_afford(cost) {
        return Err(LedgerError::Rule(LedgerRuleError::InsufficientCredits {
            required: cost,
            available: user.credits,
        })
        .into());
    }
    Ok(user)
}

/// Apply a charge through the ledger operation matching its kind.
pub async fn apply_charge(
    ledger: &dyn LedgerStore,
    uid: &str,
    request: ChargeRequest,
) -> LedgerResult<ChargeReceipt> {
    match request {
        ChargeRequest::Image(image) => ledger.create_image(uid, image).await,
        ChargeRequest::Video(video) => ledger.create_video(uid, video).await,
    }
}

/// Charge a finished generation, queueing it when the ledger refuses.
pub(crate) async fn settle(
    ledger: &dyn LedgerStore,
    uid: &str,
    request: ChargeRequest,
    deadline: Duration,
) -> BillingSummary {
    let kind = request.generation_type();
    let record_id = request.record_id().to_string();

    let outcome = match tokio::time::timeout(deadline, apply_charge(ledger, uid, request.clone()))
        .await
    {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!(
            "ledger commit timed out after {}s",
            deadline.as_secs()
        )),
    };

    match outcome {
        Ok(receipt) => BillingSummary {
            status: BillingStatus::Charged,
            credits_used: kind.cost(),
            remaining_credits: Some(receipt.remaining_credits),
            record_id,
            reason: None,
        },
        Err(reason) => {
            warn!(
                user_id = %uid,
                record_id = %record_id,
                kind = kind.as_str(),
                reason = %reason,
                "Generation succeeded but billing failed, queueing charge"
            );
            metrics::record_pending_charge(kind.as_str());

            let pending = PendingCharge::new(uid, request, reason.clone(), Utc::now());
            if let Err(e) = ledger.save_pending_charge(&pending).await {
                error!(
                    user_id = %uid,
                    record_id = %record_id,
                    "Failed to queue pending charge: {}", e
                );
            }

            BillingSummary {
                status: BillingStatus::Pending,
                credits_used: kind.cost(),
                remaining_credits: None,
                record_id,
                reason: Some(reason),
            }
        }
    }
}
