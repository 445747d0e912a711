use crate::keys::validate_key;
use crate::traits::{ByteStream, ObjectStat, ObjectStore, PutOptions, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use picshelf_core::StorageBackend;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// Local filesystem storage implementation.
///
/// Writes go to a sibling temp file and are renamed into place, so a partial
/// write is never visible under the target key. The ETag is the MD5 of the
/// object contents (a cache token, not a security primitive).
#[derive(Clone)]
pub struct LocalStore {
    base_path: PathBuf,
    public_url: Option<String>,
}

impl LocalStore {
    /// # Arguments
    /// * `base_path` - Root directory for blob storage (e.g., "/var/lib/picshelf/blobs")
    /// * `public_url` - Base URL for serving objects, if this deployment exposes one
    pub async fn new(
        base_path: impl Into<PathBuf>,
        public_url: Option<String>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStore {
            base_path,
            public_url,
        })
    }

    /// Converts a validated storage key to a filesystem path.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Sibling temp path for an in-progress write. Kept in the same directory
    /// as the target so the final rename stays on one filesystem.
    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".tmp-{}", Uuid::new_v4()));
        path.with_file_name(name)
    }

    async fn commit_temp(&self, temp: &Path, path: &Path, key: &str) -> StorageResult<()> {
        fs::rename(temp, path).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "Local store rename failed");
            StorageError::UploadFailed(format!(
                "Failed to move temp file into place for {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn guess_content_type(key: &str) -> Option<String> {
        let ext = key.rsplit('.').next()?;
        let mime = match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            _ => return None,
        };
        Some(mime.to_string())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(
        &self,
        key: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
        size: u64,
        _opts: PutOptions,
    ) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        self.ensure_parent_dir(&path).await?;

        let temp = Self::temp_path(&path);
        let start = std::time::Instant::now();

        let mut file = fs::File::create(&temp).await.map_err(|e| {
            tracing::error!(path = %temp.display(), key = %key, error = %e, "Local store put create failed");
            StorageError::UploadFailed(format!("Failed to create temp file: {}", e))
        })?;

        let mut written: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| {
                StorageError::UploadFailed(format!("Failed to read upload stream: {}", e))
            })?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > size {
                // Abort before buffering past the declared size.
                drop(file);
                let _ = fs::remove_file(&temp).await;
                return Err(StorageError::SizeMismatch {
                    declared: size,
                    actual: written,
                });
            }
            file.write_all(&buf[..n]).await.map_err(|e| {
                tracing::error!(path = %temp.display(), key = %key, error = %e, "Local store put write failed");
                StorageError::UploadFailed(format!("Failed to write temp file: {}", e))
            })?;
        }

        if written != size {
            drop(file);
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::SizeMismatch {
                declared: size,
                actual: written,
            });
        }

        file.sync_all().await.map_err(|e| {
            tracing::error!(path = %temp.display(), key = %key, error = %e, "Local store put sync failed");
            StorageError::UploadFailed(format!("Failed to sync temp file: {}", e))
        })?;
        drop(file);

        self.commit_temp(&temp, &path, key).await?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local store put successful"
        );

        Ok(())
    }

    async fn put_bytes(&self, key: &str, data: Vec<u8>, opts: PutOptions) -> StorageResult<()> {
        let size = data.len() as u64;
        let reader = Box::pin(std::io::Cursor::new(data));
        self.put(key, reader, size, opts).await
    }

    async fn get(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let file = fs::File::open(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "Local store get open failed");
            StorageError::DownloadFailed(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let stream = tokio_util::io::ReaderStream::new(file).map(|result| {
            result.map_err(|e| StorageError::DownloadFailed(format!("Failed to read chunk: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "Local store read failed");
            StorageError::DownloadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            key = %key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local store get successful"
        );

        Ok(data)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "Local store delete failed");
            StorageError::DeleteFailed(format!("Failed to delete {}: {}", path.display(), e))
        })?;

        tracing::info!(key = %key, "Local store delete successful");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn stat(&self, key: &str) -> StorageResult<ObjectStat> {
        let path = self.key_to_path(key)?;

        let meta = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::BackendError(e.to_string())
            }
        })?;
        if !meta.is_file() {
            return Err(StorageError::BackendError(format!(
                "Storage key is a directory, not a file: {}",
                key
            )));
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        let etag = format!("{:x}", md5::compute(&data));

        let last_modified = meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(ObjectStat {
            size: meta.len(),
            content_type: Self::guess_content_type(key),
            last_modified,
            etag: Some(etag),
        })
    }

    fn url(&self, key: &str) -> String {
        match &self.public_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => String::new(),
        }
    }

    async fn presigned_url(&self, _key: &str, _ttl: Duration) -> StorageResult<String> {
        Err(StorageError::NotSupported(
            "presigned URLs require an S3-compatible backend".to_string(),
        ))
    }

    fn provider_tag(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::tempdir;

    async fn store(dir: &tempfile::TempDir) -> LocalStore {
        LocalStore::new(
            dir.path(),
            Some("http://localhost:3000/media".to_string()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;

        let data = b"test data".to_vec();
        store
            .put_bytes(
                "images/2026/08/01/a/upload.jpg",
                data.clone(),
                PutOptions::with_content_type("image/jpeg"),
            )
            .await
            .unwrap();

        let read = store.get_bytes("images/2026/08/01/a/upload.jpg").await.unwrap();
        assert_eq!(data, read);
    }

    #[tokio::test]
    async fn test_put_is_idempotent_by_key() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;

        let data = b"same bytes".to_vec();
        store
            .put_bytes("k/v.png", data.clone(), PutOptions::default())
            .await
            .unwrap();
        store
            .put_bytes("k/v.png", data.clone(), PutOptions::default())
            .await
            .unwrap();

        assert_eq!(store.get_bytes("k/v.png").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_size_mismatch_leaves_no_object() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;

        let reader = Box::pin(std::io::Cursor::new(b"123456789".to_vec()));
        let result = store
            .put("k/short.bin", reader, 100, PutOptions::default())
            .await;
        assert!(matches!(
            result,
            Err(StorageError::SizeMismatch {
                declared: 100,
                actual: 9
            })
        ));
        assert!(!store.exists("k/short.bin").await.unwrap());

        // Oversized streams fail too.
        let reader = Box::pin(std::io::Cursor::new(vec![0u8; 64]));
        let result = store
            .put("k/long.bin", reader, 10, PutOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::SizeMismatch { .. })));
        assert!(!store.exists("k/long.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected_before_backend() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;

        assert!(matches!(
            store.get_bytes("../../../etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.delete("../etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.exists("/etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.put_bytes("", b"x".to_vec(), PutOptions::default()).await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;

        assert!(store.delete("nonexistent/file.jpg").await.is_ok());

        store
            .put_bytes("d/x.jpg", b"x".to_vec(), PutOptions::default())
            .await
            .unwrap();
        store.delete("d/x.jpg").await.unwrap();
        assert!(store.delete("d/x.jpg").await.is_ok());
        assert!(!store.exists("d/x.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn test_stat_reports_size_and_etag() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;

        let data = b"etag me".to_vec();
        store
            .put_bytes("s/x.jpg", data.clone(), PutOptions::default())
            .await
            .unwrap();

        let stat = store.stat("s/x.jpg").await.unwrap();
        assert_eq!(stat.size, data.len() as u64);
        assert_eq!(stat.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(
            stat.etag.as_deref(),
            Some(format!("{:x}", md5::compute(&data)).as_str())
        );

        assert!(matches!(
            store.stat("s/missing.jpg").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_streams_full_content() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;

        let data = b"stream download test".to_vec();
        store
            .put_bytes("g/x.bin", data.clone(), PutOptions::default())
            .await
            .unwrap();

        let mut stream = store.get("g/x.bin").await.unwrap();
        let mut downloaded = Vec::new();
        while let Some(chunk) = stream.next().await {
            downloaded.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(data, downloaded);
    }

    #[tokio::test]
    async fn test_url_and_presigned() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        assert_eq!(
            store.url("a/b.jpg"),
            "http://localhost:3000/media/a/b.jpg"
        );

        let no_url = LocalStore::new(dir.path(), None).await.unwrap();
        assert_eq!(no_url.url("a/b.jpg"), "");

        assert!(matches!(
            store
                .presigned_url("a/b.jpg", Duration::from_secs(60))
                .await,
            Err(StorageError::NotSupported(_))
        ));
    }
}
