//! Blob store adapter: the uniform interface over content-blob backends.
//!
//! Implementations:
//! - [`DiskBlobStore`](super::disk_blob_store::DiskBlobStore): local filesystem
//! - [`S3BlobStore`](super::s3_blob_store::S3BlobStore): S3-compatible services (MinIO)
//!
//! `put` never overwrites: an existing key yields [`BlobError::AlreadyExists`]
//! so the caller can pick another key. `delete` is idempotent.

use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::BTreeMap, io};
use thiserror::Error;

/// Side-metadata key carrying the payload digest.
pub const META_CHECKSUM: &str = "checksum-sha256";

/// Side-metadata key carrying the uploader's filename.
pub const META_ORIGINAL_FILENAME: &str = "original-filename";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object `{0}` already exists")]
    AlreadyExists(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("blob backend unreachable: {0}")]
    Unreachable(String),
    #[error("blob backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Attributes stored next to the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobAttributes {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl BlobAttributes {
    /// Attributes for an uploaded component: content type plus digest and filename.
    pub fn for_component(content_type: Option<String>, checksum: &str, file_name: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_CHECKSUM.to_string(), checksum.to_string());
        metadata.insert(META_ORIGINAL_FILENAME.to_string(), file_name.to_string());
        Self {
            content_type,
            metadata,
        }
    }
}

/// A payload read back from the store.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Bytes,
    pub attributes: BlobAttributes,
}

impl StoredBlob {
    pub fn content_type(&self) -> &str {
        self.attributes
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// Blob storage backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`. Fails with `AlreadyExists` instead of overwriting.
    async fn put(&self, key: &str, bytes: Bytes, attributes: BlobAttributes) -> BlobResult<()>;

    /// Read a payload and its attributes. Missing keys yield `NotFound`.
    async fn get(&self, key: &str) -> BlobResult<StoredBlob>;

    /// Whether `key` currently holds a payload.
    async fn exists(&self, key: &str) -> BlobResult<bool>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// Make sure the bucket/container exists, creating it if absent.
    async fn ensure_bucket(&self) -> BlobResult<()>;

    /// Cheap reachability probe used by health checks.
    async fn ping(&self) -> BlobResult<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Basic key validation shared by backends.
///
/// Rejects empty keys, absolute keys, `..` segments and control characters.
pub fn ensure_key_safe(key: &str) -> BlobResult<()> {
    const MAX_OBJECT_KEY_LEN: usize = 1024;
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}
