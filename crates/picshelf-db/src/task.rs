//! Durable job queue storage.
//!
//! Tasks live in Postgres; claims use `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never double-claim, and a `pg_notify` inside the creating
//! transaction wakes workers ahead of their poll interval. Failed rows are
//! the dead-letter set and stay in the table for operator inspection.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use picshelf_core::models::{QueueName, Task, TaskStatus, TaskType};

/// Channel name for PostgreSQL LISTEN/NOTIFY when a new task is created.
pub const TASK_NOTIFY_CHANNEL: &str = "picshelf_new_task";

const TASK_COLUMNS: &str = r#"
    id, task_type, queue, status, payload, result, scheduled_at,
    started_at, completed_at, retry_count, max_retries, timeout_seconds,
    created_at, updated_at
"#;

#[derive(Clone)]
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new task with the type's catalogue defaults and notify
    /// workers. The notify is non-fatal: polling discovers the task anyway.
    #[tracing::instrument(skip(self, payload))]
    pub async fn create_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> Result<Task> {
        let queue = task_type.queue();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for task creation")?;

        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            INSERT INTO tasks (task_type, queue, status, payload, scheduled_at,
                               max_retries, timeout_seconds)
            VALUES ($1, $2, 'pending', $3, NOW(), $4, $5)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_type.to_string())
        .bind(queue.to_string())
        .bind(payload)
        .bind(task_type.default_max_retries())
        .bind(task_type.timeout_seconds())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, task_type = %task_type, "Failed to insert task");
            anyhow::anyhow!("Failed to insert task into database: {}", e)
        })?;

        if let Err(e) = sqlx::query(&format!("SELECT pg_notify('{TASK_NOTIFY_CHANNEL}', '')"))
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                task_id = %task.id,
                "Failed to send pg_notify for new task, workers will discover it via polling"
            );
        }

        tx.commit()
            .await
            .context("Failed to commit task creation")?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task_type,
            queue = %queue,
            "Task created"
        );

        Ok(task)
    }

    /// Atomically claim the next due task, optionally restricted to one
    /// queue. The claimed task moves to `running` with `started_at` set; if
    /// no ack arrives before `timeout_seconds + grace`, the stale reaper
    /// returns it to `pending` (at-least-once delivery).
    #[tracing::instrument(skip(self))]
    pub async fn claim_next_task(&self, queue: Option<QueueName>) -> Result<Option<Task>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let mut sql = format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE status IN ('pending', 'scheduled')
                AND scheduled_at <= NOW()
            "#
        );
        if queue.is_some() {
            sql.push_str(" AND queue = $1");
        }
        sql.push_str(
            r#"
            ORDER BY scheduled_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        );

        let mut query = sqlx::query_as::<Postgres, Task>(&sql);
        if let Some(queue) = queue {
            query = query.bind(queue.to_string());
        }

        let task: Option<Task> = query
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to fetch next task")?;

        if let Some(task) = task {
            let claimed: Task = sqlx::query_as::<Postgres, Task>(&format!(
                r#"
                UPDATE tasks
                SET status = 'running',
                    started_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {TASK_COLUMNS}
                "#
            ))
            .bind(task.id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to mark task running")?;

            tx.commit().await.context("Failed to commit claim")?;

            tracing::debug!(
                task_id = %claimed.id,
                task_type = %claimed.task_type,
                queue = %claimed.queue,
                "Task claimed"
            );

            Ok(Some(claimed))
        } else {
            tx.rollback().await.ok();
            Ok(None)
        }
    }

    /// Mark task as completed with a result (ack).
    #[tracing::instrument(skip(self, result))]
    pub async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id)
        .bind(result)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark task as completed")?;

        tracing::info!(task_id = %task_id, task_type = %task.task_type, "Task completed");
        Ok(task)
    }

    /// Dead-letter the task (terminal nack). The row stays for operators.
    #[tracing::instrument(skip(self, error))]
    pub async fn mark_failed(&self, task_id: Uuid, error: serde_json::Value) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'failed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark task as failed")?;

        tracing::error!(
            task_id = %task_id,
            task_type = %task.task_type,
            retry_count = task.retry_count,
            "Task dead-lettered"
        );
        Ok(task)
    }

    /// Schedule a retry (retry nack): bump the retry count and make the task
    /// claimable again after the backoff delay.
    #[tracing::instrument(skip(self))]
    pub async fn schedule_retry(&self, task_id: Uuid, backoff_seconds: u64) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'scheduled',
                retry_count = retry_count + 1,
                scheduled_at = NOW() + ($2 * interval '1 second'),
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id)
        .bind(backoff_seconds as i64)
        .fetch_one(&self.pool)
        .await
        .context("Failed to schedule task retry")?;

        tracing::info!(
            task_id = %task_id,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            backoff_seconds,
            "Task retry scheduled"
        );
        Ok(task)
    }

    /// Update task status (system method).
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, task_id: Uuid, status: TaskStatus) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .context("Failed to update task status")?;

        Ok(task)
    }

    /// Return running tasks whose visibility window (timeout + grace) has
    /// passed to `pending` for re-delivery. Returns the number reaped.
    #[tracing::instrument(skip(self))]
    pub async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending',
                started_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
                AND started_at IS NOT NULL
                AND started_at + ((timeout_seconds + $1) * interval '1 second') < NOW()
            "#,
        )
        .bind(grace_period_secs)
        .execute(&self.pool)
        .await
        .context("Failed to reap stale running tasks")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count, "Re-delivered stale running tasks");
        }
        Ok(count)
    }

    /// Pending or due-scheduled work per queue, for weighted claim selection.
    pub async fn queue_has_ready_work(&self, queue: QueueName) -> Result<bool> {
        let ready: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM tasks
                WHERE queue = $1
                    AND status IN ('pending', 'scheduled')
                    AND scheduled_at <= NOW()
            )
            "#,
        )
        .bind(queue.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to check queue readiness")?;

        Ok(ready)
    }

    /// Whether a live (unfinished) task of this type exists for the payload
    /// image. Lets the reconciliation sweep avoid double-enqueueing.
    pub async fn has_live_task_for_image(
        &self,
        task_type: TaskType,
        image_id: Uuid,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM tasks
                WHERE task_type = $1
                    AND status IN ('pending', 'scheduled', 'running')
                    AND payload->>'image_id' = $2
            )
            "#,
        )
        .bind(task_type.to_string())
        .bind(image_id.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to check for live task")?;

        Ok(exists)
    }

    /// Delete finished tasks (completed or dead-lettered) older than the
    /// given number of days. Returns the number of rows deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_old_finished_tasks(&self, older_than_days: i32) -> Result<u64> {
        use sqlx::Row;

        let result = sqlx::query(
            r#"
            WITH deleted AS (
                DELETE FROM tasks
                WHERE status IN ('completed', 'failed')
                    AND COALESCE(completed_at, updated_at) < NOW() - ($1 * interval '1 day')
                RETURNING id
            )
            SELECT COUNT(*)::bigint FROM deleted
            "#,
        )
        .bind(older_than_days)
        .fetch_one(&self.pool)
        .await
        .context("Failed to delete old finished tasks")?;

        let count: i64 = result.get(0);
        let count = count.max(0) as u64;

        if count > 0 {
            tracing::info!(count, older_than_days, "Deleted old finished tasks");
        }

        Ok(count)
    }
}
