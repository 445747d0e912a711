//! Event outbox access.
//!
//! Domain events are inserted by the image repository inside the aggregate
//! save transaction. A publisher outside the core drains them through this
//! repository; the core only guarantees one publishable record per event.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub image_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct EventOutboxRepository {
    pool: PgPool,
}

impl EventOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Oldest unpublished events, in emission order.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT id, image_id, event_type, payload, created_at, published_at
            FROM image_events
            WHERE published_at IS NULL
            ORDER BY seq ASC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch unpublished events")?;

        Ok(events)
    }

    #[tracing::instrument(skip(self, ids))]
    pub async fn mark_published(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE image_events
            SET published_at = NOW()
            WHERE id = ANY($1) AND published_at IS NULL
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .context("Failed to mark events published")?;

        Ok(result.rows_affected())
    }
}
