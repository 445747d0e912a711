//! Job queue: worker pool, LISTEN/NOTIFY or polling, retry, and submission.
//!
//! Delivery is at-least-once. A claim moves the row to `running`; if the
//! handler neither acks nor nacks before the visibility window (timeout +
//! grace) passes, the stale reaper returns it to `pending` and it is
//! re-delivered. Handlers must therefore be idempotent.

use anyhow::{Context, Result};
use rand::Rng;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use picshelf_core::models::{QueueName, Task, TaskPayload};
use picshelf_core::{QueueConfig, TaskError};
use picshelf_db::{TaskRepository, TASK_NOTIFY_CHANNEL};
use serde_json::json;

use crate::context::TaskHandlerContext;

/// Maximum delay in seconds before retrying a failed task. Caps exponential
/// backoff so that high retry counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Deterministic part of the backoff for a given retry count (exponential
/// with cap).
#[inline]
pub(crate) fn compute_retry_backoff_base(retry_count: i32) -> u64 {
    (2_u64.pow(retry_count.clamp(0, 32) as u32)).min(MAX_RETRY_BACKOFF_SECS)
}

/// Backoff with jitter: base plus up to half the base again, capped.
/// Jitter spreads retries out so a burst of failures does not re-converge.
pub(crate) fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    let base = compute_retry_backoff_base(retry_count);
    let jitter = rand::rng().random_range(0..=base / 2);
    (base + jitter).min(MAX_RETRY_BACKOFF_SECS)
}

pub struct TaskQueue {
    repository: TaskRepository,
    config: QueueConfig,
    shutdown_tx: mpsc::Sender<()>,
    /// Permits held by in-flight handlers; drained during graceful shutdown.
    worker_slots: Arc<Semaphore>,
}

impl TaskQueue {
    /// Create a new TaskQueue and start its worker pool.
    ///
    /// If `pool` is `Some`, the worker uses PostgreSQL LISTEN/NOTIFY to wake
    /// immediately when tasks are created, in addition to polling at
    /// `poll_interval_ms`. If `pool` is `None`, only polling is used.
    pub fn new(
        repository: TaskRepository,
        config: QueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker_slots = Arc::new(Semaphore::new(config.max_workers));

        let repo_clone = repository.clone();
        let config_clone = config.clone();
        let slots_clone = worker_slots.clone();

        tokio::spawn(async move {
            Self::worker_pool(
                repo_clone,
                config_clone,
                context,
                shutdown_rx,
                pool,
                slots_clone,
            )
            .await;
        });

        Self {
            repository,
            config,
            shutdown_tx,
            worker_slots,
        }
    }

    /// Creates a TaskQueue that does not spawn a worker. Tasks submitted
    /// here are written to the DB and picked up by a real worker elsewhere.
    pub fn new_no_worker(repository: TaskRepository, config: QueueConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        let worker_slots = Arc::new(Semaphore::new(config.max_workers));
        Self {
            repository,
            config,
            shutdown_tx,
            worker_slots,
        }
    }

    /// Submit a typed job to the queue. Routing, retries, and the visibility
    /// timeout come from the task type's catalogue defaults.
    #[tracing::instrument(skip(self, payload))]
    pub async fn submit<P: TaskPayload>(&self, payload: &P) -> Result<Uuid> {
        let task_type = P::task_type();
        let task = self
            .repository
            .create_task(task_type, Task::payload_from(payload))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, task_type = %task_type, "Failed to create task");
                anyhow::anyhow!("Failed to create task: {}", e)
            })?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task_type,
            queue = %task.queue,
            "Task submitted to queue"
        );

        Ok(task.id)
    }

    async fn worker_pool(
        repository: TaskRepository,
        config: QueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
        worker_slots: Arc<Semaphore>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            strict_priority = config.strict_priority,
            "Task queue worker pool started"
        );

        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        // Channel to wake the main loop when LISTEN receives a NOTIFY.
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(TASK_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                tokio::time::sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        // Stale task reaper: re-delivers tasks whose visibility window passed.
        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_task_reap_interval_secs > 0 {
            let repo_for_reaper = repository.clone();
            let reap_interval = Duration::from_secs(config.stale_task_reap_interval_secs);
            let grace_period = config.stale_task_grace_period_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = repo_for_reaper.reap_stale_running_tasks(grace_period).await {
                                tracing::error!(error = %e, "Stale task reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&repository, &config, &worker_slots, &context).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&repository, &config, &worker_slots, &context).await;
                }
            }
        }

        tracing::info!("Task queue worker pool stopped");
    }

    /// Choose which named queue to claim from. Strict mode drains queues in
    /// priority order; otherwise selection is weighted-random across queues
    /// that currently have ready work.
    async fn pick_queue(repository: &TaskRepository, config: &QueueConfig) -> Option<QueueName> {
        let mut ready = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            match repository.queue_has_ready_work(queue).await {
                Ok(true) => ready.push(queue),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, queue = %queue, "Queue readiness check failed");
                }
            }
        }

        if ready.is_empty() {
            return None;
        }
        if config.strict_priority || ready.len() == 1 {
            // QueueName::ALL is ordered critical > default > low.
            return ready.first().copied();
        }

        let weight = |q: QueueName| -> u32 {
            let w = match q {
                QueueName::Critical => config.weight_critical,
                QueueName::Default => config.weight_default,
                QueueName::Low => config.weight_low,
            };
            w.max(1)
        };
        let total: u32 = ready.iter().map(|q| weight(*q)).sum();
        let mut roll = rand::rng().random_range(0..total);
        for queue in &ready {
            let w = weight(*queue);
            if roll < w {
                return Some(*queue);
            }
            roll -= w;
        }
        ready.last().copied()
    }

    async fn claim_and_dispatch_one(
        repository: &TaskRepository,
        config: &QueueConfig,
        worker_slots: &Arc<Semaphore>,
        context: &Weak<dyn TaskHandlerContext>,
    ) {
        let permit = match worker_slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        let queue = Self::pick_queue(repository, config).await;
        let claimed = match queue {
            None => Ok(None),
            Some(queue) => match repository.claim_next_task(Some(queue)).await {
                // The readiness check raced another worker; take anything due.
                Ok(None) => repository.claim_next_task(None).await,
                other => other,
            },
        };

        match claimed {
            Ok(Some(task)) => {
                let repo = repository.clone();
                let ctx = context.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = Self::process_task(task, repo, ctx).await {
                        tracing::error!(error = %e, "Task processing failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No tasks available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim task from queue");
            }
        }
    }

    #[tracing::instrument(skip(repository, context), fields(task.id = %task.id, task.type = %task.task_type))]
    async fn process_task(
        task: Task,
        repository: TaskRepository,
        context: Weak<dyn TaskHandlerContext>,
    ) -> Result<()> {
        let ctx = context.upgrade().ok_or_else(|| {
            anyhow::anyhow!("TaskHandlerContext was dropped, cannot process task")
        })?;

        let timeout_duration = Duration::from_secs(task.timeout_seconds.max(1) as u64);
        let result = tokio::time::timeout(timeout_duration, ctx.dispatch_task(&task)).await;

        match result {
            Ok(Ok(task_result)) => {
                repository
                    .mark_completed(task.id, task_result)
                    .await
                    .context("Failed to mark task as completed")?;
                tracing::info!(task_id = %task.id, task_type = %task.task_type, "Task completed");
                Ok(())
            }
            Ok(Err(e)) => {
                let is_unrecoverable = e
                    .downcast_ref::<TaskError>()
                    .map(|te| !te.is_recoverable())
                    .unwrap_or(false);

                tracing::error!(
                    task_id = %task.id,
                    error = %e,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    unrecoverable = is_unrecoverable,
                    "Task execution failed"
                );

                if is_unrecoverable {
                    let error_result = json!({
                        "error": e.to_string(),
                        "retry_count": task.retry_count,
                        "unrecoverable": true,
                    });
                    repository
                        .mark_failed(task.id, error_result)
                        .await
                        .context("Failed to mark task as failed")?;
                    return Err(e);
                }

                if task.can_retry() {
                    let backoff_seconds = compute_retry_backoff_seconds(task.retry_count);
                    repository
                        .schedule_retry(task.id, backoff_seconds)
                        .await
                        .context("Failed to schedule task retry")?;
                    Ok(())
                } else {
                    let error_result = json!({
                        "error": e.to_string(),
                        "retry_count": task.retry_count,
                        "reason": "Task failed after maximum retries",
                    });
                    repository
                        .mark_failed(task.id, error_result)
                        .await
                        .context("Failed to mark task as failed")?;
                    Err(e)
                }
            }
            Err(_) => {
                tracing::error!(
                    task_id = %task.id,
                    timeout_seconds = task.timeout_seconds,
                    "Task execution timed out"
                );
                if task.can_retry() {
                    let backoff_seconds = compute_retry_backoff_seconds(task.retry_count);
                    repository.schedule_retry(task.id, backoff_seconds).await?;
                    Ok(())
                } else {
                    let error_result = json!({
                        "error": "Task execution timed out",
                        "timeout_seconds": task.timeout_seconds,
                    });
                    repository.mark_failed(task.id, error_result).await?;
                    Err(anyhow::anyhow!("Task execution timed out"))
                }
            }
        }
    }

    /// Graceful shutdown: stop claiming, then wait up to
    /// `shutdown_timeout_secs` for in-flight handlers to finish. Handlers
    /// still running after the deadline keep their tasks in `running`; the
    /// stale reaper re-delivers them after the visibility window.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;

        let deadline = Duration::from_secs(self.config.shutdown_timeout_secs);
        let all_slots = self.config.max_workers as u32;
        match tokio::time::timeout(deadline, self.worker_slots.acquire_many(all_slots)).await {
            Ok(Ok(_permits)) => {
                tracing::info!("All in-flight tasks drained");
            }
            Ok(Err(_)) => {
                tracing::warn!("Worker semaphore closed during shutdown");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.shutdown_timeout_secs,
                    "Shutdown timeout elapsed with tasks still in flight"
                );
            }
        }
    }

    pub fn repository(&self) -> &TaskRepository {
        &self.repository
    }
}

impl Clone for TaskQueue {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            config: self.config.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            worker_slots: self.worker_slots.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_base_exponential_then_capped() {
        assert_eq!(compute_retry_backoff_base(0), 1);
        assert_eq!(compute_retry_backoff_base(1), 2);
        assert_eq!(compute_retry_backoff_base(2), 4);
        assert_eq!(compute_retry_backoff_base(8), 256);
        assert_eq!(compute_retry_backoff_base(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_base(10), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_base(-1), 1);
    }

    #[test]
    fn retry_backoff_jitter_stays_bounded() {
        for retry_count in 0..12 {
            let base = compute_retry_backoff_base(retry_count);
            for _ in 0..50 {
                let delay = compute_retry_backoff_seconds(retry_count);
                assert!(delay >= base || delay == MAX_RETRY_BACKOFF_SECS);
                assert!(delay <= MAX_RETRY_BACKOFF_SECS.max(base + base / 2));
            }
        }
    }

    #[test]
    fn unrecoverable_task_error_detected() {
        let err: anyhow::Error =
            picshelf_core::TaskError::unrecoverable(anyhow::anyhow!("bad container")).into();
        let is_unrecoverable = err
            .downcast_ref::<picshelf_core::TaskError>()
            .map(|te| !te.is_recoverable())
            .unwrap_or(false);
        assert!(is_unrecoverable);
    }

    #[test]
    fn recoverable_task_error_detected() {
        let err: anyhow::Error =
            picshelf_core::TaskError::recoverable(anyhow::anyhow!("network")).into();
        let is_unrecoverable = err
            .downcast_ref::<picshelf_core::TaskError>()
            .map(|te| !te.is_recoverable())
            .unwrap_or(false);
        assert!(!is_unrecoverable);
    }

    #[test]
    fn non_task_error_treated_as_recoverable() {
        let err: anyhow::Error = anyhow::anyhow!("generic error");
        let is_unrecoverable = err
            .downcast_ref::<picshelf_core::TaskError>()
            .map(|te| !te.is_recoverable())
            .unwrap_or(false);
        assert!(!is_unrecoverable);
    }
}
