//! Business services: the generation pipelines and background jobs.

pub mod billing_reconciler;
pub mod image_pipeline;
pub mod monthly_reset;
pub mod pipeline;
pub mod prompts;
pub mod video_pipeline;

#[cfg(test)]
mod test_support;

pub use billing_reconciler::{BillingReconciler, ReconcileSummary};
pub use image_pipeline::{
    ImageGeneration, ImagePipeline, ImageRequest, UploadedFile, FILE_TOO_LARGE,
};
pub use monthly_reset::MonthlyResetScheduler;
pub use pipeline::{
    apply_charge, BillingStatus, BillingSummary, PipelineError, PipelineResult, Stage,
};
pub use video_pipeline::{VideoGeneration, VideoPipeline, VideoRequest};
