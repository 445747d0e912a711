//! Upload ingest service.
//!
//! The synchronous half of the pipeline: validate → store the pristine
//! upload → create the aggregate row (with its ImageCreated outbox event) →
//! enqueue the process and scan jobs → reply 202. A queue enqueue failure
//! deliberately does not fail the request: the blob and the row already
//! exist, and the reconciliation sweep re-enqueues missing work.

use std::sync::Arc;
use uuid::Uuid;

use picshelf_core::models::{
    Image, ImageProcessPayload, ImageScanPayload, NewImageParams, Visibility,
};
use picshelf_core::AppError;
use picshelf_processing::ImageCodec;
use picshelf_storage::{object_key, PutOptions};

use crate::error::HttpAppError;
use crate::state::AppState;

/// Fields extracted from the multipart form.
#[derive(Debug)]
pub struct IngestRequest {
    pub data: Vec<u8>,
    pub original_filename: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub tags: Vec<String>,
}

pub struct IngestService {
    state: Arc<AppState>,
}

impl IngestService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            state: state.clone(),
        }
    }

    /// Run the ingest pipeline. On success the returned image is in
    /// `processing`/`scan=pending` and its jobs are (best-effort) enqueued.
    #[tracing::instrument(skip(self, request), fields(owner_id = %owner_id, file_size = request.data.len()))]
    pub async fn ingest(
        &self,
        owner_id: Uuid,
        request: IngestRequest,
    ) -> Result<Image, HttpAppError> {
        // Gates 1-3 + filename sanitation.
        let validated = self
            .state
            .validator
            .validate_bytes(&request.data, &request.original_filename)?;

        // Decode probe for the dimension and pixel-budget gates. CPU-bound,
        // so off the async pool.
        let probe_data = request.data.clone();
        let (width, height) = tokio::task::spawn_blocking(move || {
            ImageCodec::probe_dimensions(&probe_data)
        })
        .await
        .map_err(|e| HttpAppError::new(AppError::Internal(format!("probe join error: {}", e))))??;

        self.state.validator.check_dimensions(width, height)?;

        let image_id = self.state.image_repository.next_id();
        let now = chrono::Utc::now();
        let upload_key = object_key(now, image_id, "upload", validated.format.extension());

        // Store the pristine bytes before any row exists: a failure here
        // aborts the request with nothing persisted.
        let declared_size = request.data.len() as u64;
        self.state
            .object_store
            .put(
                &upload_key,
                Box::pin(std::io::Cursor::new(request.data)),
                declared_size,
                PutOptions::with_content_type(validated.format.mime_type()),
            )
            .await?;

        let params = NewImageParams {
            owner_id,
            title: request.title,
            description: request.description,
            original_filename: validated.safe_filename,
            mime_type: validated.format,
            file_size: declared_size as i64,
            width: width as i32,
            height: height as i32,
            storage_provider: self.state.object_store.provider_tag().to_string(),
            storage_key: upload_key.clone(),
            visibility: request.visibility,
        };

        let mut image = Image::new(image_id, params).map_err(HttpAppError::from)?;

        if let Err(e) = self
            .state
            .image_repository
            .create(&mut image, &request.tags)
            .await
        {
            // No row was committed; remove the stored blob so a rejected
            // request leaves no orphan.
            let store = self.state.object_store.clone();
            let key = upload_key.clone();
            tokio::spawn(async move {
                if let Err(cleanup_err) = store.delete(&key).await {
                    tracing::warn!(
                        error = %cleanup_err,
                        storage_key = %key,
                        "Failed to clean up blob after row create failure"
                    );
                }
            });
            return Err(HttpAppError::from(e));
        }

        self.enqueue_pipeline_jobs(image.id).await;

        tracing::info!(
            image_id = %image.id,
            owner_id = %owner_id,
            storage_key = %upload_key,
            width,
            height,
            "Upload accepted"
        );

        Ok(image)
    }

    /// Best-effort enqueue of the asynchronous pipeline. Failures are logged
    /// and left to the reconciliation sweep.
    async fn enqueue_pipeline_jobs(&self, image_id: Uuid) {
        if let Err(e) = self
            .state
            .task_queue
            .submit(&ImageProcessPayload::new(image_id))
            .await
        {
            tracing::error!(
                error = %e,
                image_id = %image_id,
                "Failed to enqueue process job; reconciliation sweep will retry"
            );
        }

        if self.state.config.validator.enable_malware_scan {
            if let Err(e) = self
                .state
                .task_queue
                .submit(&ImageScanPayload::new(image_id))
                .await
            {
                tracing::error!(
                    error = %e,
                    image_id = %image_id,
                    "Failed to enqueue scan job; reconciliation sweep will retry"
                );
            }
        }
    }
}
