//! Storage abstraction trait
//!
//! This module defines the ObjectStore trait that all storage backends must
//! implement. Every entry point validates the key (see [`crate::keys`])
//! before touching the backend, and writes are atomic: a partial write must
//! never be visible under the target key.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use picshelf_core::StorageBackend;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Declared size mismatch: declared {declared} bytes, got {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Operation not supported by this backend: {0}")]
    NotSupported(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Options for put operations.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
}

impl PutOptions {
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
        }
    }
}

/// Object metadata returned by `stat`.
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Strong ETag. A cache token, not a security primitive.
    pub etag: Option<String>,
}

/// Streaming reader returned by `get`.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Object storage capability set.
///
/// All backends (local filesystem, S3-compatible) implement this trait so
/// that ingest and workers can store blobs without coupling to a provider.
///
/// **Key format:** `images/{YYYY}/{MM}/{DD}/{image_id}/{variant}.{ext}`;
/// see [`crate::keys::object_key`]. The layout is a stable external contract
/// (backups address objects by key).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `size` bytes from `reader` into `key`.
    ///
    /// Fails with [`StorageError::SizeMismatch`] when the reader yields a
    /// different number of bytes than declared, leaving nothing visible at
    /// `key`.
    async fn put(
        &self,
        key: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
        size: u64,
        opts: PutOptions,
    ) -> StorageResult<()>;

    /// Store an in-memory buffer under `key`.
    async fn put_bytes(&self, key: &str, data: Vec<u8>, opts: PutOptions) -> StorageResult<()>;

    /// Stream the object at `key`.
    async fn get(&self, key: &str) -> StorageResult<ByteStream>;

    /// Read the whole object at `key` into memory.
    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete the object at `key`. Idempotent: a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check whether an object exists at `key`.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Size, content type, last-modified, and ETag for the object at `key`.
    async fn stat(&self, key: &str) -> StorageResult<ObjectStat>;

    /// Public URL for `key`, or the empty string when the backend has no
    /// public URL space configured.
    fn url(&self, key: &str) -> String;

    /// Time-limited URL granting direct read access to `key`.
    ///
    /// Backends that cannot sign URLs fail with [`StorageError::NotSupported`].
    async fn presigned_url(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Identifier persisted alongside every key as the provider half of the
    /// `(provider, key)` storage binding.
    fn provider_tag(&self) -> StorageBackend;
}
