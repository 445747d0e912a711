use crate::keys::validate_key;
use crate::traits::{ByteStream, ObjectStat, ObjectStore, PutOptions, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult};
use picshelf_core::StorageBackend;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// S3-compatible storage implementation.
///
/// A single `put` is atomic at the provider: S3 never exposes a partially
/// uploaded object under the key.
#[derive(Clone)]
pub struct S3Store {
    store: AmazonS3,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    force_path_style: bool,
}

impl S3Store {
    /// Create a new S3Store.
    ///
    /// # Arguments
    /// * `bucket` - Bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    /// * `force_path_style` - Use path-style addressing (`{endpoint}/{bucket}/{key}`)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        // Credentials come from the environment, as with the AWS CLI.
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region.clone())
            .with_bucket_name(bucket.clone())
            .with_virtual_hosted_style_request(!force_path_style);

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Store {
            store,
            bucket,
            region,
            endpoint_url,
            force_path_style,
        })
    }

    fn map_error(key: &str, err: ObjectStoreError) -> StorageError {
        match err {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            ObjectStoreError::PermissionDenied { .. } | ObjectStoreError::Unauthenticated { .. } => {
                StorageError::AccessDenied(err.to_string())
            }
            other => StorageError::BackendError(other.to_string()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        key: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
        size: u64,
        opts: PutOptions,
    ) -> StorageResult<()> {
        validate_key(key)?;

        // Buffer the stream and upload with a single put so the write is
        // provider-atomic. Uploads are already bounded by max_file_size.
        let mut buffer = Vec::with_capacity(size.min(16 * 1024 * 1024) as usize);
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut chunk).await.map_err(|e| {
                StorageError::UploadFailed(format!("Failed to read upload stream: {}", e))
            })?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if buffer.len() as u64 > size {
                return Err(StorageError::SizeMismatch {
                    declared: size,
                    actual: buffer.len() as u64,
                });
            }
        }
        if buffer.len() as u64 != size {
            return Err(StorageError::SizeMismatch {
                declared: size,
                actual: buffer.len() as u64,
            });
        }

        self.put_bytes(key, buffer, opts).await
    }

    async fn put_bytes(&self, key: &str, data: Vec<u8>, _opts: PutOptions) -> StorageResult<()> {
        validate_key(key)?;
        let size = data.len() as u64;
        let bytes = Bytes::from(data);
        let location = Path::from(key.to_string());
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.put(&location, PutPayload::from(bytes)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 put failed"
            );
            match Self::map_error(key, e) {
                StorageError::BackendError(msg) => StorageError::UploadFailed(msg),
                other => other,
            }
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 put successful"
        );

        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let location = Path::from(key.to_string());

        let result: ObjectResult<_> = self.store.get(&location).await;
        let result = result.map_err(|e| Self::map_error(key, e))?;

        let bucket = self.bucket.clone();
        let key_owned = key.to_string();
        let stream = result.into_stream().map(move |res| {
            res.map_err(|e| {
                tracing::error!(bucket = %bucket, key = %key_owned, error = %e, "S3 stream read error");
                StorageError::DownloadFailed(e.to_string())
            })
        });

        Ok(Box::pin(stream))
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        let start = std::time::Instant::now();
        let location = Path::from(key.to_string());

        let result: ObjectResult<_> = self.store.get(&location).await;
        let result = result.map_err(|e| Self::map_error(key, e))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = bytes.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 get successful"
        );

        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let location = Path::from(key.to_string());

        let result: ObjectResult<_> = self.store.delete(&location).await;
        match result {
            Ok(()) => {}
            // Idempotent: a missing key is not an error.
            Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(bucket = %self.bucket, key = %key, error = %e, "S3 delete failed");
                return Err(match Self::map_error(key, e) {
                    StorageError::BackendError(msg) => StorageError::DeleteFailed(msg),
                    other => other,
                });
            }
        }

        tracing::info!(bucket = %self.bucket, key = %key, "S3 delete successful");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let location = Path::from(key.to_string());
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(Self::map_error(key, e)),
        }
    }

    async fn stat(&self, key: &str) -> StorageResult<ObjectStat> {
        validate_key(key)?;
        let location = Path::from(key.to_string());
        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|e| Self::map_error(key, e))?;

        Ok(ObjectStat {
            size: meta.size,
            // HEAD metadata from object_store does not carry the content
            // type; callers use the persisted variant format instead.
            content_type: None,
            last_modified: Some(meta.last_modified),
            etag: meta.e_tag,
        })
    }

    fn url(&self, key: &str) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            let base_url = endpoint.trim_end_matches('/');
            format!("{}/{}/{}", base_url, self.bucket, key)
        } else if self.force_path_style {
            format!(
                "https://s3.{}.amazonaws.com/{}/{}",
                self.region, self.bucket, key
            )
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        validate_key(key)?;
        let location = Path::from(key.to_string());
        let url_result: ObjectResult<_> = self.store.signed_url(Method::GET, &location, ttl).await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        Ok(url)
    }

    fn provider_tag(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
