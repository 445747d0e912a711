//! Image aggregate repository.
//!
//! `create`/`update` persist the aggregate together with its pending domain
//! events (transactional outbox). `update` uses the version column for
//! optimistic concurrency: of two concurrent writers exactly one commits and
//! the other observes a conflict and retries against fresh state.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use picshelf_core::models::{
    Image, ImageEvent, ImageStatus, ImageVariant, VariantType, Visibility,
};
use picshelf_core::AppError;

const IMAGE_COLUMNS: &str = r#"
    id, owner_id, title, description, original_filename, mime_type,
    file_size, width, height, storage_provider, storage_key,
    status, visibility, scan_status, view_count, version,
    created_at, updated_at, deleted_at
"#;

const VARIANT_COLUMNS: &str = r#"
    id, image_id, variant_type, storage_key, width, height,
    file_size, format, created_at
"#;

/// Page request with clamped bounds.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    page: i64,
    per_page: i64,
}

impl Pagination {
    pub const MAX_PER_PAGE: i64 = 100;

    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageSort {
    #[default]
    Newest,
    Oldest,
    MostViewed,
}

impl ImageSort {
    fn order_clause(&self) -> &'static str {
        match self {
            ImageSort::Newest => "created_at DESC",
            ImageSort::Oldest => "created_at ASC",
            ImageSort::MostViewed => "view_count DESC, created_at DESC",
        }
    }
}

impl FromStr for ImageSort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(ImageSort::Newest),
            "oldest" => Ok(ImageSort::Oldest),
            "most_viewed" => Ok(ImageSort::MostViewed),
            _ => Err(anyhow::anyhow!("Invalid sort: {}", s)),
        }
    }
}

/// Filter set for listing/searching images. Soft-deleted rows are always
/// excluded here; only the cleanup path reads them, explicitly.
#[derive(Debug, Clone, Default)]
pub struct ImageSearchParams {
    pub owner: Option<Uuid>,
    pub tag: Option<String>,
    pub visibility: Option<Visibility>,
    pub status: Option<ImageStatus>,
    pub sort: ImageSort,
    pub page: Pagination,
}

#[derive(Clone)]
pub struct ImageRepository {
    pool: PgPool,
}

impl ImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Allocate an identifier for a new aggregate.
    pub fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Persist a new aggregate, its tags, and its pending events in one
    /// transaction. A duplicate `(storage_provider, storage_key)` surfaces
    /// as a conflict.
    #[tracing::instrument(skip(self, image, tags), fields(image_id = %image.id))]
    pub async fn create(&self, image: &mut Image, tags: &[String]) -> Result<()> {
        let events = image.take_events();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for image create")?;

        sqlx::query(
            r#"
            INSERT INTO images (
                id, owner_id, title, description, original_filename, mime_type,
                file_size, width, height, storage_provider, storage_key,
                status, visibility, scan_status, view_count, version,
                created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(image.id)
        .bind(image.owner_id)
        .bind(&image.title)
        .bind(&image.description)
        .bind(&image.original_filename)
        .bind(image.mime_type)
        .bind(image.file_size)
        .bind(image.width)
        .bind(image.height)
        .bind(&image.storage_provider)
        .bind(&image.storage_key)
        .bind(image.status)
        .bind(image.visibility)
        .bind(image.scan_status)
        .bind(image.view_count)
        .bind(image.version)
        .bind(image.created_at)
        .bind(image.updated_at)
        .bind(image.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, "image"))?;

        for tag in tags {
            sqlx::query(
                r#"
                INSERT INTO image_tags (image_id, tag)
                VALUES ($1, $2)
                ON CONFLICT (image_id, tag) DO NOTHING
                "#,
            )
            .bind(image.id)
            .bind(tag)
            .execute(&mut *tx)
            .await
            .context("Failed to insert image tag")?;
        }

        insert_events(&mut tx, &events).await?;

        tx.commit()
            .await
            .context("Failed to commit image create")?;

        tracing::info!(image_id = %image.id, owner_id = %image.owner_id, "Image created");
        Ok(())
    }

    /// Persist aggregate changes with an optimistic version check and attach
    /// pending events. On a version conflict, nothing is written and the
    /// error downcasts to [`AppError::Conflict`]; reload and retry.
    #[tracing::instrument(skip(self, image), fields(image_id = %image.id))]
    pub async fn update(&self, image: &mut Image) -> Result<()> {
        let events = image.take_events();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for image update")?;

        let updated = self.update_in_tx(&mut tx, image, &events).await?;
        if !updated {
            tx.rollback().await.ok();
            return Err(AppError::Conflict(format!(
                "Concurrent update of image {}",
                image.id
            ))
            .into());
        }

        tx.commit()
            .await
            .context("Failed to commit image update")?;
        image.version += 1;
        Ok(())
    }

    /// Persist aggregate changes and upsert the given variant rows in one
    /// transaction. Used by the process worker so that the variant set and
    /// the `active` transition commit atomically.
    #[tracing::instrument(skip(self, image, variants), fields(image_id = %image.id))]
    pub async fn update_with_variants(
        &self,
        image: &mut Image,
        variants: &[ImageVariant],
    ) -> Result<()> {
        let events = image.take_events();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for image update")?;

        for variant in variants {
            sqlx::query(
                r#"
                INSERT INTO image_variants (
                    id, image_id, variant_type, storage_key, width, height,
                    file_size, format, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (image_id, variant_type) DO UPDATE SET
                    storage_key = EXCLUDED.storage_key,
                    width = EXCLUDED.width,
                    height = EXCLUDED.height,
                    file_size = EXCLUDED.file_size,
                    format = EXCLUDED.format
                "#,
            )
            .bind(variant.id)
            .bind(variant.image_id)
            .bind(variant.variant_type)
            .bind(&variant.storage_key)
            .bind(variant.width)
            .bind(variant.height)
            .bind(variant.file_size)
            .bind(variant.format)
            .bind(variant.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, "image variant"))?;
        }

        let updated = self.update_in_tx(&mut tx, image, &events).await?;
        if !updated {
            tx.rollback().await.ok();
            return Err(AppError::Conflict(format!(
                "Concurrent update of image {}",
                image.id
            ))
            .into());
        }

        tx.commit()
            .await
            .context("Failed to commit image update with variants")?;
        image.version += 1;

        tracing::info!(
            image_id = %image.id,
            variant_count = variants.len(),
            status = %image.status,
            "Image updated with variants"
        );
        Ok(())
    }

    async fn update_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        image: &Image,
        events: &[ImageEvent],
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE images
            SET title = $3,
                description = $4,
                status = $5,
                visibility = $6,
                scan_status = $7,
                updated_at = $8,
                deleted_at = $9,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(image.id)
        .bind(image.version)
        .bind(&image.title)
        .bind(&image.description)
        .bind(image.status)
        .bind(image.visibility)
        .bind(image.scan_status)
        .bind(image.updated_at)
        .bind(image.deleted_at)
        .execute(&mut **tx)
        .await
        .context("Failed to update image")?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_events(tx, events).await?;
        Ok(true)
    }

    /// Fetch a live (not soft-deleted) image.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Image>> {
        let image = sqlx::query_as::<Postgres, Image>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch image")?;

        Ok(image)
    }

    /// Fetch an image including soft-deleted rows. Worker/cleanup use only.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_id_any(&self, id: Uuid) -> Result<Option<Image>> {
        let image = sqlx::query_as::<Postgres, Image>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch image")?;

        Ok(image)
    }

    pub async fn exists_by_id(&self, id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM images WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check image existence")?;

        Ok(exists)
    }

    pub async fn find_by_owner(&self, owner_id: Uuid, page: Pagination) -> Result<Vec<Image>> {
        self.search(ImageSearchParams {
            owner: Some(owner_id),
            page,
            ..Default::default()
        })
        .await
    }

    /// Active, public images for anonymous listings.
    pub async fn find_public(&self, page: Pagination) -> Result<Vec<Image>> {
        self.search(ImageSearchParams {
            visibility: Some(Visibility::Public),
            status: Some(ImageStatus::Active),
            page,
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_tag(&self, tag: &str, page: Pagination) -> Result<Vec<Image>> {
        self.search(ImageSearchParams {
            tag: Some(tag.to_string()),
            page,
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_status(&self, status: ImageStatus, page: Pagination) -> Result<Vec<Image>> {
        self.search(ImageSearchParams {
            status: Some(status),
            page,
            ..Default::default()
        })
        .await
    }

    /// List images matching the filter set. Soft-deleted rows never appear.
    #[tracing::instrument(skip(self))]
    pub async fn search(&self, params: ImageSearchParams) -> Result<Vec<Image>> {
        let mut sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE deleted_at IS NULL"
        );

        let mut bind_count = 0;
        if params.owner.is_some() {
            bind_count += 1;
            sql.push_str(&format!(" AND owner_id = ${}", bind_count));
        }
        if params.visibility.is_some() {
            bind_count += 1;
            sql.push_str(&format!(" AND visibility = ${}", bind_count));
        }
        if params.status.is_some() {
            bind_count += 1;
            sql.push_str(&format!(" AND status = ${}", bind_count));
        }
        if params.tag.is_some() {
            bind_count += 1;
            sql.push_str(&format!(
                " AND id IN (SELECT image_id FROM image_tags WHERE tag = ${})",
                bind_count
            ));
        }

        sql.push_str(&format!(
            " ORDER BY {} LIMIT ${} OFFSET ${}",
            params.sort.order_clause(),
            bind_count + 1,
            bind_count + 2
        ));

        let mut query = sqlx::query_as::<Postgres, Image>(&sql);
        if let Some(owner) = params.owner {
            query = query.bind(owner);
        }
        if let Some(visibility) = params.visibility {
            query = query.bind(visibility);
        }
        if let Some(status) = params.status {
            query = query.bind(status);
        }
        if let Some(ref tag) = params.tag {
            query = query.bind(tag.clone());
        }

        let images = query
            .bind(params.page.limit())
            .bind(params.page.offset())
            .fetch_all(&self.pool)
            .await
            .context("Failed to search images")?;

        Ok(images)
    }

    /// Atomic view-count bump; a no-op for anything but live active images.
    #[tracing::instrument(skip(self))]
    pub async fn increment_view_count(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE images
            SET view_count = view_count + 1
            WHERE id = $1 AND status = 'active' AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to increment view count")?;

        Ok(())
    }

    /// Hard delete. Variant and tag rows cascade; outbox events are kept
    /// (they may not have been published yet).
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete image")?;

        tracing::info!(image_id = %id, "Image row hard-deleted");
        Ok(())
    }

    pub async fn find_variants(&self, image_id: Uuid) -> Result<Vec<ImageVariant>> {
        let variants = sqlx::query_as::<Postgres, ImageVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM image_variants WHERE image_id = $1"
        ))
        .bind(image_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch image variants")?;

        Ok(variants)
    }

    pub async fn find_variant(
        &self,
        image_id: Uuid,
        variant_type: VariantType,
    ) -> Result<Option<ImageVariant>> {
        let variant = sqlx::query_as::<Postgres, ImageVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM image_variants WHERE image_id = $1 AND variant_type = $2"
        ))
        .bind(image_id)
        .bind(variant_type)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch image variant")?;

        Ok(variant)
    }

    pub async fn find_tags(&self, image_id: Uuid) -> Result<Vec<String>> {
        let tags: Vec<String> =
            sqlx::query_scalar("SELECT tag FROM image_tags WHERE image_id = $1 ORDER BY tag")
                .bind(image_id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch image tags")?;

        Ok(tags)
    }

    /// Images stuck in `processing` longer than the threshold. Input for the
    /// reconciliation sweep that re-enqueues their jobs.
    #[tracing::instrument(skip(self))]
    pub async fn find_stuck_processing(&self, stuck_after_secs: i64) -> Result<Vec<Image>> {
        let images = sqlx::query_as::<Postgres, Image>(&format!(
            r#"
            SELECT {IMAGE_COLUMNS} FROM images
            WHERE status = 'processing'
                AND deleted_at IS NULL
                AND created_at < NOW() - ($1 * interval '1 second')
            ORDER BY created_at ASC
            LIMIT 100
            "#
        ))
        .bind(stuck_after_secs)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch stuck processing images")?;

        Ok(images)
    }

    /// Whether the row's grace period since its last transition has elapsed.
    /// Gate for hard deletion of deleted/failed rows once their storage keys
    /// are gone.
    pub async fn terminal_grace_elapsed(&self, id: Uuid, grace_secs: i64) -> Result<bool> {
        let elapsed: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT updated_at < NOW() - ($2 * interval '1 second')
            FROM images
            WHERE id = $1 AND status IN ('deleted', 'failed')
            "#,
        )
        .bind(id)
        .bind(grace_secs)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check terminal grace period")?;

        Ok(elapsed.unwrap_or(false))
    }
}

async fn insert_events(
    tx: &mut Transaction<'_, Postgres>,
    events: &[ImageEvent],
) -> Result<()> {
    for event in events {
        let payload = serde_json::to_value(event)
            .context("Failed to serialize domain event")?;
        sqlx::query(
            r#"
            INSERT INTO image_events (id, image_id, event_type, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.image_id())
        .bind(event.event_type())
        .bind(payload)
        .execute(&mut **tx)
        .await
        .context("Failed to insert domain event into outbox")?;
    }
    Ok(())
}

/// Map a unique-constraint violation into a conflict the caller can detect.
fn map_insert_error(e: sqlx::Error, entity: &str) -> anyhow::Error {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            return AppError::Conflict(format!(
                "Duplicate {} (constraint {})",
                entity,
                db_err.constraint().unwrap_or("unknown")
            ))
            .into();
        }
    }
    anyhow::Error::new(e).context(format!("Failed to insert {}", entity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_bounds() {
        let page = Pagination::new(0, 500);
        assert_eq!(page.offset(), 0);
        assert_eq!(page.limit(), Pagination::MAX_PER_PAGE);

        let page = Pagination::new(3, 25);
        assert_eq!(page.offset(), 50);
        assert_eq!(page.limit(), 25);
    }

    #[test]
    fn sort_parses() {
        assert_eq!("newest".parse::<ImageSort>().unwrap(), ImageSort::Newest);
        assert_eq!(
            "most_viewed".parse::<ImageSort>().unwrap(),
            ImageSort::MostViewed
        );
        assert!("sideways".parse::<ImageSort>().is_err());
    }
}
