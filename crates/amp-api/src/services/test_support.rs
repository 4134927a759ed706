//! Mocks and fakes shared by the pipeline and scheduler tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;

use amp_ai_client::{
    AiError, AiResult, ImageSynthesizer, ProductImage, Provider, VideoSynthesizer, VisionAnalyzer,
};
use amp_firestore::{ChargeReceipt, LedgerResult, LedgerStore, ResetSummary, UserIdentity};
use amp_models::{
    GenerationType, ImageRecord, NewImage, NewVideo, PendingCharge, PlanTier, UserRecord,
    VideoRecord,
};
use amp_storage::{BlobStore, StorageResult, StoredObject, UploadRequest};

mock! {
    pub Ledger {}

    #[async_trait]
    impl LedgerStore for Ledger {
        async fn get_user(&self, uid: &str) -> LedgerResult<UserRecord>;
        async fn upsert_user(&self, identity: &UserIdentity) -> LedgerResult<UserRecord>;
        async fn create_image(&self, uid: &str, image: NewImage) -> LedgerResult<ChargeReceipt>;
        async fn create_video(&self, uid: &str, video: NewVideo) -> LedgerResult<ChargeReceipt>;
        async fn use_credits(
            &self,
            uid: &str,
            amount: u32,
            kind: GenerationType,
        ) -> LedgerResult<ChargeReceipt>;
        async fn add_credits(
            &self,
            uid: &str,
            amount: u32,
            paypal_transaction_id: Option<String>,
        ) -> LedgerResult<UserRecord>;
        async fn upgrade_subscription(
            &self,
            uid: &str,
            plan: PlanTier,
            paypal_transaction_id: Option<String>,
        ) -> LedgerResult<UserRecord>;
        async fn reset_monthly_usage(&self, now: DateTime<Utc>) -> LedgerResult<ResetSummary>;
        async fn user_images(&self, uid: &str, limit: u32) -> LedgerResult<Vec<ImageRecord>>;
        async fn user_videos(&self, uid: &str, limit: u32) -> LedgerResult<Vec<VideoRecord>>;
        async fn videos_for_image(
            &self,
            uid: &str,
            image_id: &str,
            limit: u32,
        ) -> LedgerResult<Vec<VideoRecord>>;
        async fn save_pending_charge(&self, charge: &PendingCharge) -> LedgerResult<()>;
        async fn pending_charges(
            &self,
            now: DateTime<Utc>,
            limit: u32,
        ) -> LedgerResult<Vec<PendingCharge>>;
        async fn resolve_pending_charge(&self, id: &str) -> LedgerResult<()>;
        async fn check_connectivity(&self) -> LedgerResult<()>;
    }
}

mock! {
    pub Blobs {}

    #[async_trait]
    impl BlobStore for Blobs {
        async fn upload(
            &self,
            bytes: Vec<u8>,
            request: UploadRequest,
        ) -> StorageResult<StoredObject>;
        async fn check_connectivity(&self) -> StorageResult<()>;
    }
}

pub fn identity(uid: &str) -> UserIdentity {
    UserIdentity::new(uid)
}

pub fn user_with_credits(uid: &str, credits: u32) -> UserRecord {
    let mut user = UserRecord::new(uid, None, None, Utc::now());
    user.credits = credits;
    user
}

/// Upload handler that stores nothing and reports the request back.
pub fn stored_echo(bytes: Vec<u8>, request: UploadRequest) -> StorageResult<StoredObject> {
    let key = request.key()?;
    Ok(StoredObject {
        id: format!("file-{}", request.file_name),
        url: format!("https://cdn.test/{}", key),
        thumbnail_url: format!("https://cdn.test/{}", key),
        name: request.file_name,
        size: bytes.len() as u64,
    })
}

pub struct FakeAnalyzer {
    name: &'static str,
    result: Result<&'static str, &'static str>,
}

impl FakeAnalyzer {
    pub fn ok(name: &'static str, text: &'static str) -> Arc<dyn VisionAnalyzer> {
        Arc::new(Self {
            name,
            result: Ok(text),
        })
    }

    pub fn failing(name: &'static str, error: &'static str) -> Arc<dyn VisionAnalyzer> {
        Arc::new(Self {
            name,
            result: Err(error),
        })
    }
}

impl Provider for FakeAnalyzer {
    fn name(&self) -> &str {
        self.name
    }
}

#[async_trait]
impl VisionAnalyzer for FakeAnalyzer {
    async fn analyze(&self, _image: &ProductImage) -> AiResult<String> {
        self.result
            .map(String::from)
            .map_err(|e| AiError::InvalidResponse(e.to_string()))
    }
}

pub struct FakeSynthesizer {
    name: &'static str,
    result: Result<Vec<u8>, &'static str>,
}

impl FakeSynthesizer {
    pub fn ok(name: &'static str, bytes: &[u8]) -> Arc<dyn ImageSynthesizer> {
        Arc::new(Self {
            name,
            result: Ok(bytes.to_vec()),
        })
    }

    pub fn failing(name: &'static str, error: &'static str) -> Arc<dyn ImageSynthesizer> {
        Arc::new(Self {
            name,
            result: Err(error),
        })
    }
}

impl Provider for FakeSynthesizer {
    fn name(&self) -> &str {
        self.name
    }
}

#[async_trait]
impl ImageSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, _prompt: &str) -> AiResult<Vec<u8>> {
        self.result
            .clone()
            .map_err(|e| AiError::InvalidResponse(e.to_string()))
    }
}

/// Video synthesizer with canned responses that counts its calls.
pub struct FakeVideo {
    pub generate_result: Result<String, AiError>,
    pub download_result: Result<Vec<u8>, AiError>,
    pub generate_calls: AtomicUsize,
}

impl FakeVideo {
    pub fn ok(url: &str, bytes: &[u8]) -> Self {
        Self {
            generate_result: Ok(url.to_string()),
            download_result: Ok(bytes.to_vec()),
            generate_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

fn replay(result: &Result<String, AiError>) -> AiResult<String> {
    match result {
        Ok(url) => Ok(url.clone()),
        Err(e) => Err(AiError::InvalidResponse(e.to_string())),
    }
}

#[async_trait]
impl VideoSynthesizer for FakeVideo {
    fn model(&self) -> &str {
        "wan-2-1-i2v-720"
    }

    async fn generate(&self, _prompt: &str, _image_url: &str) -> AiResult<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        replay(&self.generate_result)
    }

    async fn download(&self, _url: &str) -> AiResult<Vec<u8>> {
        match &self.download_result {
            Ok(bytes) => Ok(bytes.clone()),
            Err(e) => Err(AiError::InvalidResponse(e.to_string())),
        }
    }
}
