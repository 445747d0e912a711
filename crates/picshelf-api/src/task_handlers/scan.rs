//! `image.scan` handler: pristine bytes → scanner verdict → aggregate.

use anyhow::anyhow;
use serde_json::json;
use std::sync::Arc;

use picshelf_core::models::{ImageScanPayload, ImageStatus, ScanStatus, Task};
use picshelf_core::TaskError;
use picshelf_services::ScanVerdict;
use picshelf_storage::StorageError;

use crate::state::AppState;
use crate::task_handlers::enqueue_cleanup;

pub struct ScanTaskHandler;

impl ScanTaskHandler {
    #[tracing::instrument(skip(state, task), fields(task_id = %task.id))]
    pub async fn handle(
        state: &Arc<AppState>,
        task: &Task,
    ) -> Result<serde_json::Value, TaskError> {
        let payload: ImageScanPayload = task
            .try_payload_as()
            .map_err(|e| TaskError::unrecoverable(anyhow!("invalid scan payload: {}", e)))?;

        let image = state
            .image_repository
            .find_by_id_any(payload.image_id)
            .await
            .map_err(TaskError::recoverable)?;
        let Some(mut image) = image else {
            return Ok(json!({ "skipped": "image row missing" }));
        };
        if image.status == ImageStatus::Deleted {
            return Ok(json!({ "skipped": "image is deleted" }));
        }
        if image.scan_status == ScanStatus::Clean || image.scan_status == ScanStatus::Infected {
            // Re-delivery after a completed verdict.
            return Ok(json!({ "skipped": format!("scan already {}", image.scan_status) }));
        }

        let Some(scanner) = state.scanner.as_ref() else {
            return Ok(json!({ "skipped": "scanner disabled" }));
        };

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

        match scanner.scan_bytes(&data).await {
            ScanVerdict::Clean => {
                image
                    .set_scan_result(ScanStatus::Clean)
                    .map_err(|e| TaskError::unrecoverable(anyhow!(e)))?;
                state
                    .image_repository
                    .update(&mut image)
                    .await
                    .map_err(TaskError::recoverable)?;

                Ok(json!({ "image_id": image.id, "verdict": "clean" }))
            }
            ScanVerdict::Infected(signature) => {
                tracing::warn!(
                    image_id = %image.id,
                    signature = %signature,
                    "Upload is infected; failing image and scheduling cleanup"
                );

                // Drives the aggregate to failed even if processing already
                // activated it.
                image
                    .set_scan_result(ScanStatus::Infected)
                    .map_err(|e| TaskError::unrecoverable(anyhow!(e)))?;
                state
                    .image_repository
                    .update(&mut image)
                    .await
                    .map_err(TaskError::recoverable)?;

                enqueue_cleanup(state, &image).await;

                Ok(json!({
                    "image_id": image.id,
                    "verdict": "infected",
                    "signature": signature,
                }))
            }
            ScanVerdict::Error(msg) => {
                // Scanner unreachable or misbehaving: not a verdict about
                // the content. Retry.
                Err(TaskError::recoverable(anyhow!("scanner error: {}", msg)))
            }
        }
    }
}
