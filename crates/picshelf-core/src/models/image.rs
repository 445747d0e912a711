//! Image aggregate root.
//!
//! The aggregate is the single write path for image state: every mutation
//! goes through a method that checks its precondition, applies the change as
//! one step, and records a domain event for the outbox. Variants are owned by
//! the image and never mutated directly by callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::event::ImageEvent;
use super::variant::{ImageFormat, ImageVariant, VariantType};

/// Hard caps enforced by the aggregate regardless of validator configuration.
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_FILENAME_LEN: usize = 255;
pub const MAX_DIMENSION: i32 = 8192;
pub const MAX_PIXELS: i64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "image_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Processing,
    Active,
    Failed,
    Deleted,
}

impl Display for ImageStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ImageStatus::Processing => write!(f, "processing"),
            ImageStatus::Active => write!(f, "active"),
            ImageStatus::Failed => write!(f, "failed"),
            ImageStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for ImageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ImageStatus::Processing),
            "active" => Ok(ImageStatus::Active),
            "failed" => Ok(ImageStatus::Failed),
            "deleted" => Ok(ImageStatus::Deleted),
            _ => Err(anyhow::anyhow!("Invalid image status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "image_visibility", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Unlisted,
}

impl Display for Visibility {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
            Visibility::Unlisted => write!(f, "unlisted"),
        }
    }
}

impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "unlisted" => Ok(Visibility::Unlisted),
            _ => Err(anyhow::anyhow!("Invalid visibility: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "scan_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Clean,
    Infected,
    Error,
}

impl Display for ScanStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ScanStatus::Pending => write!(f, "pending"),
            ScanStatus::Clean => write!(f, "clean"),
            ScanStatus::Infected => write!(f, "infected"),
            ScanStatus::Error => write!(f, "error"),
        }
    }
}

/// Errors from aggregate construction and state transitions.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid image metadata: {0}")]
    InvalidMetadata(String),

    #[error("Cannot {action} an image in status '{status}'")]
    InvalidTransition {
        action: &'static str,
        status: ImageStatus,
    },

    #[error("Cannot activate an image with an infected scan verdict")]
    Infected,

    #[error("Cannot activate: missing '{0}' variant")]
    MissingVariant(VariantType),

    #[error("Cannot activate: {0}")]
    VariantMismatch(String),
}

/// Input for constructing a new image aggregate.
#[derive(Debug, Clone)]
pub struct NewImageParams {
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub original_filename: String,
    pub mime_type: ImageFormat,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    pub storage_provider: String,
    pub storage_key: String,
    pub visibility: Visibility,
}

/// Image aggregate root.
///
/// `(storage_provider, storage_key)` identifies the pristine uploaded blob
/// and is globally unique. `version` backs optimistic concurrency in the
/// repository: two concurrent writers to the same id result in exactly one
/// commit; the loser retries against fresh state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Image {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub original_filename: String,
    pub mime_type: ImageFormat,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    pub storage_provider: String,
    pub storage_key: String,
    pub status: ImageStatus,
    pub visibility: Visibility,
    pub scan_status: ScanStatus,
    pub view_count: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(skip)]
    events: Vec<ImageEvent>,
}

impl Image {
    /// Construct a new aggregate in `processing`/`scan=pending` and record
    /// the ImageCreated event. The id is allocated by the caller so the
    /// storage key (which embeds the id) can be derived before construction.
    pub fn new(id: Uuid, params: NewImageParams) -> Result<Self, DomainError> {
        Self::validate_metadata(&params)?;

        let now = Utc::now();
        let mut image = Image {
            id,
            owner_id: params.owner_id,
            title: params.title,
            description: params.description,
            original_filename: params.original_filename,
            mime_type: params.mime_type,
            file_size: params.file_size,
            width: params.width,
            height: params.height,
            storage_provider: params.storage_provider,
            storage_key: params.storage_key,
            status: ImageStatus::Processing,
            visibility: params.visibility,
            scan_status: ScanStatus::Pending,
            view_count: 0,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            events: Vec::new(),
        };

        image.events.push(ImageEvent::ImageCreated {
            image_id: id,
            owner_id: image.owner_id,
            occurred_at: now,
        });

        Ok(image)
    }

    fn validate_metadata(params: &NewImageParams) -> Result<(), DomainError> {
        if params.file_size <= 0 {
            return Err(DomainError::InvalidMetadata(
                "file size must be positive".to_string(),
            ));
        }
        if params.width <= 0 || params.height <= 0 {
            return Err(DomainError::InvalidMetadata(
                "dimensions must be positive".to_string(),
            ));
        }
        if params.width > MAX_DIMENSION || params.height > MAX_DIMENSION {
            return Err(DomainError::InvalidMetadata(format!(
                "dimensions {}x{} exceed the {} pixel edge limit",
                params.width, params.height, MAX_DIMENSION
            )));
        }
        if (params.width as i64) * (params.height as i64) > MAX_PIXELS {
            return Err(DomainError::InvalidMetadata(format!(
                "pixel count exceeds the {} budget",
                MAX_PIXELS
            )));
        }
        if let Some(ref title) = params.title {
            if title.len() > MAX_TITLE_LEN {
                return Err(DomainError::InvalidMetadata(format!(
                    "title exceeds {} bytes",
                    MAX_TITLE_LEN
                )));
            }
        }
        if params.original_filename.is_empty() || params.original_filename.len() > MAX_FILENAME_LEN
        {
            return Err(DomainError::InvalidMetadata(
                "original filename must be 1..=255 bytes".to_string(),
            ));
        }
        if params.storage_key.is_empty() {
            return Err(DomainError::InvalidMetadata(
                "storage key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Transition processing → active once the full variant set exists.
    ///
    /// The `original` variant must match the declared dimensions and MIME.
    /// Deliberately not gated on `scan=clean`: an infected verdict arriving
    /// after activation transitions active → failed via [`set_scan_result`].
    ///
    /// [`set_scan_result`]: Image::set_scan_result
    pub fn mark_active(&mut self, variants: &[ImageVariant]) -> Result<(), DomainError> {
        if self.status != ImageStatus::Processing {
            return Err(DomainError::InvalidTransition {
                action: "activate",
                status: self.status,
            });
        }
        if self.scan_status == ScanStatus::Infected {
            return Err(DomainError::Infected);
        }

        for expected in VariantType::ALL {
            let found = variants
                .iter()
                .find(|v| v.image_id == self.id && v.variant_type == expected)
                .ok_or(DomainError::MissingVariant(expected))?;

            if expected == VariantType::Original {
                if found.width != self.width || found.height != self.height {
                    return Err(DomainError::VariantMismatch(format!(
                        "original variant is {}x{}, image declares {}x{}",
                        found.width, found.height, self.width, self.height
                    )));
                }
                if found.format != self.mime_type {
                    return Err(DomainError::VariantMismatch(format!(
                        "original variant format '{}' does not match declared '{}'",
                        found.format, self.mime_type
                    )));
                }
            }
        }

        self.status = ImageStatus::Active;
        self.touch();
        self.events.push(ImageEvent::ImageActivated {
            image_id: self.id,
            occurred_at: self.updated_at,
        });
        Ok(())
    }

    /// Transition processing → failed with a terminal reason.
    pub fn mark_failed(&mut self, reason: &str) -> Result<(), DomainError> {
        if self.status != ImageStatus::Processing {
            return Err(DomainError::InvalidTransition {
                action: "fail",
                status: self.status,
            });
        }
        self.status = ImageStatus::Failed;
        self.touch();
        self.events.push(ImageEvent::ImageFailed {
            image_id: self.id,
            reason: reason.to_string(),
            occurred_at: self.updated_at,
        });
        Ok(())
    }

    /// Record a scan verdict. An infected verdict also forces the aggregate
    /// to failed, regardless of whether processing already activated it.
    pub fn set_scan_result(&mut self, verdict: ScanStatus) -> Result<(), DomainError> {
        if self.status == ImageStatus::Deleted {
            return Err(DomainError::InvalidTransition {
                action: "record a scan verdict for",
                status: self.status,
            });
        }
        self.scan_status = verdict;
        if verdict == ScanStatus::Infected && self.status != ImageStatus::Failed {
            self.status = ImageStatus::Failed;
        }
        self.touch();
        self.events.push(ImageEvent::ImageScanned {
            image_id: self.id,
            verdict,
            occurred_at: self.updated_at,
        });
        Ok(())
    }

    pub fn update_visibility(&mut self, visibility: Visibility) -> Result<(), DomainError> {
        if !matches!(self.status, ImageStatus::Active | ImageStatus::Processing) {
            return Err(DomainError::InvalidTransition {
                action: "change visibility of",
                status: self.status,
            });
        }
        self.visibility = visibility;
        self.touch();
        self.events.push(ImageEvent::ImageVisibilityChanged {
            image_id: self.id,
            visibility,
            occurred_at: self.updated_at,
        });
        Ok(())
    }

    /// Soft delete: mark the row deleted and let the cleanup job remove the
    /// stored blobs (and eventually hard-delete the row).
    pub fn soft_delete(&mut self) -> Result<(), DomainError> {
        if self.status == ImageStatus::Deleted {
            return Err(DomainError::InvalidTransition {
                action: "delete",
                status: self.status,
            });
        }
        self.status = ImageStatus::Deleted;
        self.deleted_at = Some(Utc::now());
        self.touch();
        self.events.push(ImageEvent::ImageDeleted {
            image_id: self.id,
            occurred_at: self.updated_at,
        });
        Ok(())
    }

    /// Bump the view counter. Only meaningful for active images; the
    /// repository performs the increment atomically in SQL, so this method
    /// exists for in-memory consistency and records no event.
    pub fn increment_view_count(&mut self) -> Result<(), DomainError> {
        if self.status != ImageStatus::Active {
            return Err(DomainError::InvalidTransition {
                action: "count a view of",
                status: self.status,
            });
        }
        self.view_count += 1;
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ImageStatus::Deleted
    }

    /// Drain the events recorded since construction or the last save.
    pub fn take_events(&mut self) -> Vec<ImageEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pending_events(&self) -> &[ImageEvent] {
        &self.events
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NewImageParams {
        NewImageParams {
            owner_id: Uuid::new_v4(),
            title: Some("sunset".to_string()),
            description: None,
            original_filename: "sunset.jpg".to_string(),
            mime_type: ImageFormat::Jpeg,
            file_size: 512_000,
            width: 1920,
            height: 1080,
            storage_provider: "local".to_string(),
            storage_key: "images/2026/08/01/abc/upload.jpg".to_string(),
            visibility: Visibility::Public,
        }
    }

    fn full_variant_set(image: &Image) -> Vec<ImageVariant> {
        VariantType::ALL
            .iter()
            .map(|vt| {
                let (w, h) = match vt.target_max_width() {
                    Some(target) => {
                        super::super::variant::scaled_dimensions(
                            image.width as u32,
                            image.height as u32,
                            target,
                        )
                    }
                    None => (image.width as u32, image.height as u32),
                };
                let format = if *vt == VariantType::Original {
                    image.mime_type
                } else {
                    ImageFormat::Jpeg
                };
                ImageVariant::new(
                    image.id,
                    *vt,
                    format!("images/2026/08/01/{}/{}.jpg", image.id, vt),
                    w,
                    h,
                    10_000,
                    format,
                )
            })
            .collect()
    }

    #[test]
    fn new_image_starts_processing_with_created_event() {
        let image = Image::new(Uuid::new_v4(), params()).unwrap();
        assert_eq!(image.status, ImageStatus::Processing);
        assert_eq!(image.scan_status, ScanStatus::Pending);
        assert_eq!(image.view_count, 0);
        assert!(image.deleted_at.is_none());
        assert_eq!(image.pending_events().len(), 1);
        assert_eq!(image.pending_events()[0].event_type(), "image.created");
    }

    #[test]
    fn metadata_validation_rejects_bad_input() {
        let mut p = params();
        p.file_size = 0;
        assert!(Image::new(Uuid::new_v4(), p).is_err());

        let mut p = params();
        p.width = 0;
        assert!(Image::new(Uuid::new_v4(), p).is_err());

        let mut p = params();
        p.width = 8193;
        p.height = 1;
        assert!(Image::new(Uuid::new_v4(), p).is_err());

        let mut p = params();
        p.title = Some("x".repeat(256));
        assert!(Image::new(Uuid::new_v4(), p).is_err());

        let mut p = params();
        p.original_filename = String::new();
        assert!(Image::new(Uuid::new_v4(), p).is_err());
    }

    #[test]
    fn metadata_validation_accepts_max_dimensions() {
        // 8192x8192 = 67,108,864 pixels: at the edge cap and within budget.
        let mut p = params();
        p.width = 8192;
        p.height = 8192;
        assert!(Image::new(Uuid::new_v4(), p).is_ok());
    }

    #[test]
    fn mark_active_requires_full_variant_set() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        image.take_events();

        let mut variants = full_variant_set(&image);
        variants.retain(|v| v.variant_type != VariantType::Medium);

        let err = image.mark_active(&variants).unwrap_err();
        assert!(matches!(err, DomainError::MissingVariant(VariantType::Medium)));
        assert_eq!(image.status, ImageStatus::Processing);

        let variants = full_variant_set(&image);
        image.mark_active(&variants).unwrap();
        assert_eq!(image.status, ImageStatus::Active);
        assert_eq!(image.pending_events()[0].event_type(), "image.activated");
    }

    #[test]
    fn mark_active_rejects_original_dimension_mismatch() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        let mut variants = full_variant_set(&image);
        for v in &mut variants {
            if v.variant_type == VariantType::Original {
                v.width = 100;
            }
        }
        assert!(matches!(
            image.mark_active(&variants),
            Err(DomainError::VariantMismatch(_))
        ));
    }

    #[test]
    fn mark_active_blocked_by_infected_scan() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        image.set_scan_result(ScanStatus::Infected).unwrap();
        assert_eq!(image.status, ImageStatus::Failed);

        // Already failed, so activation is an invalid transition.
        let variants = full_variant_set(&image);
        assert!(image.mark_active(&variants).is_err());
    }

    #[test]
    fn infected_after_active_forces_failed() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        let variants = full_variant_set(&image);
        image.mark_active(&variants).unwrap();

        image.set_scan_result(ScanStatus::Infected).unwrap();
        assert_eq!(image.status, ImageStatus::Failed);
        assert_eq!(image.scan_status, ScanStatus::Infected);
    }

    #[test]
    fn clean_scan_does_not_change_status() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        image.set_scan_result(ScanStatus::Clean).unwrap();
        assert_eq!(image.status, ImageStatus::Processing);
        assert_eq!(image.scan_status, ScanStatus::Clean);
    }

    #[test]
    fn soft_delete_sets_marker_and_is_not_repeatable() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        image.soft_delete().unwrap();
        assert_eq!(image.status, ImageStatus::Deleted);
        assert!(image.deleted_at.is_some());
        assert!(image.soft_delete().is_err());
        assert!(image.set_scan_result(ScanStatus::Clean).is_err());
    }

    #[test]
    fn mark_failed_only_from_processing() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        image.mark_failed("decoder refused container").unwrap();
        assert_eq!(image.status, ImageStatus::Failed);
        assert!(image.mark_failed("again").is_err());
    }

    #[test]
    fn visibility_change_only_while_processing_or_active() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        image.update_visibility(Visibility::Private).unwrap();
        assert_eq!(image.visibility, Visibility::Private);
        assert_eq!(
            image.pending_events().last().unwrap().event_type(),
            "image.visibility_changed"
        );

        image.mark_failed("decode error").unwrap();
        assert!(image.update_visibility(Visibility::Public).is_err());
    }

    #[test]
    fn view_count_only_on_active() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        assert!(image.increment_view_count().is_err());

        let variants = full_variant_set(&image);
        image.mark_active(&variants).unwrap();
        image.increment_view_count().unwrap();
        assert_eq!(image.view_count, 1);
    }

    #[test]
    fn take_events_drains() {
        let mut image = Image::new(Uuid::new_v4(), params()).unwrap();
        image.set_scan_result(ScanStatus::Clean).unwrap();
        let events = image.take_events();
        assert_eq!(events.len(), 2);
        assert!(image.pending_events().is_empty());
    }
}
