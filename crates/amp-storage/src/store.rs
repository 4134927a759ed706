//! Blob store interface used by the generation pipelines.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Folder for original user uploads.
pub const UPLOADS_FOLDER: &str = "amplify/uploads";

/// Folder for synthesized advertisement images.
pub const GENERATED_IMAGES_FOLDER: &str = "amplify/generated-images";

/// Folder for generated videos of a product segment.
pub fn generated_videos_folder(product_segment: &str) -> String {
    format!("amplify/generated/{}", product_segment)
}

/// One object to store.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub folder: String,
    pub tags: Vec<String>,
    pub content_type: String,
}

impl UploadRequest {
    pub fn new(
        file_name: impl Into<String>,
        folder: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            folder: folder.into(),
            tags: Vec::new(),
            content_type: content_type.into(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Object key: `{folder}/{file_name}`.
    pub fn key(&self) -> StorageResult<String> {
        let folder = self.folder.trim_matches('/');
        let name = self.file_name.trim();
        if name.is_empty() || name.contains('/') {
            return Err(StorageError::invalid_key(format!(
                "file name {:?} must be a single non-empty segment",
                self.file_name
            )));
        }
        if folder.is_empty() {
            Ok(name.to_string())
        } else {
            Ok(format!("{}/{}", folder, name))
        }
    }
}

/// A stored object as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    /// Store-assigned id.
    pub id: String,
    pub url: String,
    pub thumbnail_url: String,
    pub name: String,
    pub size: u64,
}

/// Object storage with public URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` and return its public location.
    async fn upload(&self, bytes: Vec<u8>, request: UploadRequest) -> StorageResult<StoredObject>;

    /// Cheap reachability check used by readiness.
    async fn check_connectivity(&self) -> StorageResult<()>;
}
