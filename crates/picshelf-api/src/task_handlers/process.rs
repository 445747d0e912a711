//! `image.process` handler: original bytes → variant set → active.

use anyhow::anyhow;
use serde_json::json;
use std::sync::Arc;

use picshelf_core::models::{
    ImageProcessPayload, ImageStatus, ImageVariant, ScanStatus, Task, VariantType,
};
use picshelf_core::TaskError;
use picshelf_processing::ProcessError;
use picshelf_storage::{object_key, PutOptions, StorageError};

use crate::state::AppState;
use crate::task_handlers::enqueue_cleanup;

pub struct ProcessTaskHandler;

impl ProcessTaskHandler {
    #[tracing::instrument(skip(state, task), fields(task_id = %task.id))]
    pub async fn handle(
        state: &Arc<AppState>,
        task: &Task,
    ) -> Result<serde_json::Value, TaskError> {
        let payload: ImageProcessPayload = task
            .try_payload_as()
            .map_err(|e| TaskError::unrecoverable(anyhow!("invalid process payload: {}", e)))?;

        let image = state
            .image_repository
            .find_by_id_any(payload.image_id)
            .await
            .map_err(TaskError::recoverable)?;
        let Some(mut image) = image else {
            tracing::info!(image_id = %payload.image_id, "Image row gone, skipping process job");
            return Ok(json!({ "skipped": "image row missing" }));
        };

        match image.status {
            ImageStatus::Failed | ImageStatus::Deleted => {
                return Ok(json!({ "skipped": format!("image is {}", image.status) }));
            }
            ImageStatus::Active => {
                // Re-delivery after a completed run.
                let variants = state
                    .image_repository
                    .find_variants(image.id)
                    .await
                    .map_err(TaskError::recoverable)?;
                if variants.len() < VariantType::ALL.len() {
                    tracing::warn!(
                        image_id = %image.id,
                        variant_count = variants.len(),
                        "Active image with incomplete variant set"
                    );
                }
                return Ok(json!({ "skipped": "already active" }));
            }
            ImageStatus::Processing => {}
        }

        let data = state
            .object_store
            .get_bytes(&image.storage_key)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(key) => {
                    TaskError::unrecoverable(anyhow!("pristine upload missing: {}", key))
                }
                other => TaskError::recoverable(other),
            })?;

        let processor = state.processor.clone();
        let source_format = image.mime_type;
        let result = tokio::task::spawn_blocking(move || processor.process(&data, source_format))
            .await
            .map_err(|e| TaskError::recoverable(anyhow!("process join error: {}", e)))?;

        let result = match result {
            Ok(result) => result,
            Err(err) => return Self::fail_terminally(state, &mut image, err).await,
        };

        // Write each variant under its deterministic key. A crashed previous
        // attempt may have left some keys behind; those are skipped, the
        // rest written, and all rows committed together below.
        let mut variant_rows = Vec::with_capacity(result.variants.len());
        for variant in &result.variants {
            let key = object_key(
                image.created_at,
                image.id,
                &variant.variant_type.to_string(),
                variant.format.extension(),
            );

            let already_stored = state
                .object_store
                .exists(&key)
                .await
                .map_err(TaskError::recoverable)?;
            if !already_stored {
                state
                    .object_store
                    .put_bytes(
                        &key,
                        variant.data.to_vec(),
                        PutOptions::with_content_type(variant.format.mime_type()),
                    )
                    .await
                    .map_err(TaskError::recoverable)?;
            }

            variant_rows.push(ImageVariant::new(
                image.id,
                variant.variant_type,
                key,
                variant.width,
                variant.height,
                variant.data.len() as u64,
                variant.format,
            ));
        }

        let activated = if image.scan_status != ScanStatus::Infected {
            image
                .mark_active(&variant_rows)
                .map_err(|e| TaskError::unrecoverable(anyhow!(e)))?;
            true
        } else {
            false
        };

        // One transaction: variant rows + status + events. A concurrent scan
        // verdict surfaces as a version conflict; retrying reloads fresh
        // state and the skip checks above settle it.
        state
            .image_repository
            .update_with_variants(&mut image, &variant_rows)
            .await
            .map_err(TaskError::recoverable)?;

        tracing::info!(
            image_id = %image.id,
            variant_count = variant_rows.len(),
            activated,
            "Process job completed"
        );

        Ok(json!({
            "image_id": image.id,
            "variants": variant_rows.len(),
            "activated": activated,
        }))
    }

    /// Terminal processing failure: fail the aggregate, schedule cleanup,
    /// dead-letter the job.
    async fn fail_terminally(
        state: &Arc<AppState>,
        image: &mut picshelf_core::models::Image,
        err: ProcessError,
    ) -> Result<serde_json::Value, TaskError> {
        let reason = err.to_string();
        tracing::error!(image_id = %image.id, error = %reason, "Processing failed terminally");

        image
            .mark_failed(&reason)
            .map_err(|e| TaskError::unrecoverable(anyhow!(e)))?;
        state
            .image_repository
            .update(image)
            .await
            .map_err(TaskError::recoverable)?;

        enqueue_cleanup(state, image).await;

        Err(TaskError::unrecoverable(anyhow!(
            "image processing failed: {}",
            reason
        )))
    }
}
