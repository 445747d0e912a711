//! Queue job handlers.
//!
//! Each handler is idempotent: jobs are delivered at least once, so every
//! step keys off `(image_id, variant_type)` or a storage key and tolerates
//! re-execution. Handlers signal retry-vs-dead-letter via `TaskError`.

mod cleanup;
mod process;
mod scan;

pub use cleanup::CleanupTaskHandler;
pub use process::ProcessTaskHandler;
pub use scan::ScanTaskHandler;

use std::sync::Arc;

use picshelf_core::models::{Image, ImageCleanupPayload};

use crate::state::AppState;

/// Every storage key belonging to an image: the pristine upload plus all
/// variant rows. Frozen into the cleanup payload so cleanup never depends on
/// the row surviving.
pub(crate) async fn frozen_storage_keys(
    state: &Arc<AppState>,
    image: &Image,
) -> anyhow::Result<Vec<String>> {
    let mut keys = vec![image.storage_key.clone()];
    for variant in state.image_repository.find_variants(image.id).await? {
        keys.push(variant.storage_key);
    }
    Ok(keys)
}

/// Best-effort cleanup enqueue. Failures are logged; delete requests can be
/// replayed and storage deletes are idempotent.
pub(crate) async fn enqueue_cleanup(state: &Arc<AppState>, image: &Image) {
    let keys = match frozen_storage_keys(state, image).await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::error!(error = %e, image_id = %image.id, "Failed to collect keys for cleanup");
            return;
        }
    };

    let payload = ImageCleanupPayload::new(image.id, image.storage_provider.clone(), keys);
    if let Err(e) = state.task_queue.submit(&payload).await {
        tracing::error!(error = %e, image_id = %image.id, "Failed to enqueue cleanup job");
    }
}
