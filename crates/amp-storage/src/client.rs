//! R2 client implementation.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::store::{BlobStore, StoredObject, UploadRequest};

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Public base URL objects are served from
    pub public_url: String,
    /// Region (usually "auto" for R2)
    pub region: String,
}

impl R2Config {
    /// Create config from environment variables.
    ///
    /// `R2_ENDPOINT_URL` may be omitted when `R2_ACCOUNT_ID` is set.
    pub fn from_env() -> StorageResult<Self> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| StorageError::config_error(format!("{} not set", key)))
        };

        let endpoint_url = match std::env::var("R2_ENDPOINT_URL").ok().filter(|v| !v.is_empty()) {
            Some(url) => url,
            None => {
                let account = required("R2_ACCOUNT_ID").map_err(|_| {
                    StorageError::config_error("R2_ENDPOINT_URL or R2_ACCOUNT_ID must be set")
                })?;
                format!("https://{}.r2.cloudflarestorage.com", account)
            }
        };

        Ok(Self {
            endpoint_url,
            access_key_id: required("R2_ACCESS_KEY_ID")?,
            secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
            bucket_name: required("R2_BUCKET_NAME")?,
            public_url: required("R2_PUBLIC_URL")?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    public_url: String,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            public_url: config.public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Config::from_env()?))
    }

    /// Public URL for an object key.
    pub fn public_url_for(&self, key: &str) -> String {
        public_url(&self.public_url, key)
    }
}

fn public_url(base: &str, key: &str) -> String {
    let path: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", base, path.join("/"))
}

/// Tags travel as object metadata, which must be ASCII.
fn encode_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| urlencoding::encode(t.trim()).into_owned())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl BlobStore for R2Client {
    #[instrument(skip(self, bytes, request), fields(folder = %request.folder, name = %request.file_name, size = bytes.len()))]
    async fn upload(&self, bytes: Vec<u8>, request: UploadRequest) -> StorageResult<StoredObject> {
        let key = request.key()?;
        let size = bytes.len() as u64;
        let id = Uuid::new_v4().to_string();
        debug!("Uploading {} bytes to {}", size, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(&request.content_type)
            .metadata("file-id", &id)
            .metadata("tags", encode_tags(&request.tags))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        let url = self.public_url_for(&key);
        info!("Uploaded {}", key);

        Ok(StoredObject {
            id,
            thumbnail_url: url.clone(),
            url,
            name: request.file_name,
            size,
        })
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }
}
