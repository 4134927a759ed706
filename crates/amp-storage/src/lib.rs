//! Cloudflare R2 blob store.
//!
//! This crate provides:
//! - The [`BlobStore`] trait used by the generation pipelines
//! - An R2 implementation that serves objects from a public base URL
//! - Folder conventions for uploads and generated assets

pub mod client;
pub mod error;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use store::{
    generated_videos_folder, BlobStore, StoredObject, UploadRequest, GENERATED_IMAGES_FOLDER,
    UPLOADS_FOLDER,
};
