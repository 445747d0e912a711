//! Reconciliation sweep.
//!
//! Ingest deliberately replies 202 even when enqueueing the process/scan
//! jobs fails (the blob and row already exist). This sweep is the safety
//! net: it finds images stuck in `processing` past a threshold and
//! re-enqueues the missing work, so no accepted upload is silently orphaned.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use picshelf_core::models::{
    ImageProcessPayload, ImageScanPayload, ScanStatus, Task, TaskType,
};
use picshelf_core::ReconcileConfig;
use picshelf_db::{ImageRepository, TaskRepository};

#[derive(Clone)]
pub struct ReconcileService {
    image_repository: ImageRepository,
    task_repository: TaskRepository,
    config: ReconcileConfig,
    scan_enabled: bool,
}

impl ReconcileService {
    pub fn new(
        image_repository: ImageRepository,
        task_repository: TaskRepository,
        config: ReconcileConfig,
        scan_enabled: bool,
    ) -> Self {
        Self {
            image_repository,
            task_repository,
            config,
            scan_enabled,
        }
    }

    /// Start the periodic sweep. Returns a JoinHandle for shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(self.config.interval_secs));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tick.tick().await;
                if let Err(e) = self.sweep_once().await {
                    tracing::error!(error = %e, "Reconciliation sweep failed");
                }
            }
        })
    }

    /// One sweep: re-enqueue process (and scan, if still pending) jobs for
    /// stuck `processing` images that have no live task.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<usize, anyhow::Error> {
        let stuck = self
            .image_repository
            .find_stuck_processing(self.config.stuck_after_secs)
            .await?;

        if stuck.is_empty() {
            return Ok(0);
        }

        let mut requeued = 0;
        for image in &stuck {
            if !self
                .task_repository
                .has_live_task_for_image(TaskType::ImageProcess, image.id)
                .await?
            {
                let payload = Task::payload_from(&ImageProcessPayload::new(image.id));
                self.task_repository
                    .create_task(TaskType::ImageProcess, payload)
                    .await?;
                requeued += 1;
                tracing::warn!(image_id = %image.id, "Re-enqueued stuck process job");
            }

            if self.scan_enabled
                && image.scan_status == ScanStatus::Pending
                && !self
                    .task_repository
                    .has_live_task_for_image(TaskType::ImageScan, image.id)
                    .await?
            {
                let payload = Task::payload_from(&ImageScanPayload::new(image.id));
                self.task_repository
                    .create_task(TaskType::ImageScan, payload)
                    .await?;
                requeued += 1;
                tracing::warn!(image_id = %image.id, "Re-enqueued stuck scan job");
            }
        }

        tracing::info!(
            stuck_images = stuck.len(),
            requeued_jobs = requeued,
            "Reconciliation sweep completed"
        );
        Ok(requeued)
    }
}
