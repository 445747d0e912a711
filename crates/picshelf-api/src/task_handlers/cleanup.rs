//! `image.cleanup` handler: remove frozen storage keys, then optionally
//! hard-delete the row.

use anyhow::anyhow;
use serde_json::json;
use std::sync::Arc;

use picshelf_core::models::{ImageCleanupPayload, Task};
use picshelf_core::TaskError;

use crate::state::AppState;

pub struct CleanupTaskHandler;

impl CleanupTaskHandler {
    #[tracing::instrument(skip(state, task), fields(task_id = %task.id))]
    pub async fn handle(
        state: &Arc<AppState>,
        task: &Task,
    ) -> Result<serde_json::Value, TaskError> {
        let payload: ImageCleanupPayload = task
            .try_payload_as()
            .map_err(|e| TaskError::unrecoverable(anyhow!("invalid cleanup payload: {}", e)))?;

        let provider = state.object_store.provider_tag().to_string();
        if payload.provider != provider {
            return Err(TaskError::unrecoverable(anyhow!(
                "cleanup payload targets provider '{}' but this store is '{}'",
                payload.provider,
                provider
            )));
        }

        // Deletes are idempotent, so a re-delivered job (or a retry after a
        // partial pass) converges.
        for key in &payload.keys {
            state
                .object_store
                .delete(key)
                .await
                .map_err(TaskError::recoverable)?;
        }

        let grace_secs = state.config.reconcile.hard_delete_grace_secs;
        let mut hard_deleted = false;
        if state
            .image_repository
            .terminal_grace_elapsed(payload.image_id, grace_secs)
            .await
            .map_err(TaskError::recoverable)?
        {
            state
                .image_repository
                .delete(payload.image_id)
                .await
                .map_err(TaskError::recoverable)?;
            hard_deleted = true;
        }

        tracing::info!(
            image_id = %payload.image_id,
            deleted_keys = payload.keys.len(),
            hard_deleted,
            "Cleanup job completed"
        );

        Ok(json!({
            "image_id": payload.image_id,
            "deleted_keys": payload.keys.len(),
            "hard_deleted": hard_deleted,
        }))
    }
}
