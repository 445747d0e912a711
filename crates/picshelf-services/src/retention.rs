//! Retention cleanup for finished queue rows.
//!
//! Completed and dead-lettered tasks accumulate forever otherwise; this
//! service deletes them after the configured retention window.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use picshelf_db::TaskRepository;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct RetentionService {
    task_repository: TaskRepository,
    retention_days: i32,
}

impl RetentionService {
    pub fn new(task_repository: TaskRepository, retention_days: i32) -> Self {
        Self {
            task_repository,
            retention_days,
        }
    }

    /// Start the hourly retention sweep. A retention of 0 disables it.
    pub fn start(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.retention_days <= 0 {
            tracing::info!("Task retention cleanup disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut tick = interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tick.tick().await;
                match self
                    .task_repository
                    .delete_old_finished_tasks(self.retention_days)
                    .await
                {
                    Ok(count) if count > 0 => {
                        tracing::info!(count, "Retention cleanup removed finished tasks")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Retention cleanup failed"),
                }
            }
        }))
    }
}
