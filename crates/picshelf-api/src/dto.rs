//! Response DTOs for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use picshelf_core::models::{
    Image, ImageFormat, ImageStatus, ImageVariant, ScanStatus, VariantType, Visibility,
};

/// Body of the 202 returned by the upload endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadAccepted {
    pub id: Uuid,
    pub status: ImageStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VariantResponse {
    pub variant_type: VariantType,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub format: ImageFormat,
}

impl From<&ImageVariant> for VariantResponse {
    fn from(v: &ImageVariant) -> Self {
        Self {
            variant_type: v.variant_type,
            width: v.width,
            height: v.height,
            file_size: v.file_size,
            format: v.format,
        }
    }
}

/// Image metadata DTO. Storage keys and provider internals are not exposed;
/// variants are addressed through the variant endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ImageResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    pub status: ImageStatus,
    pub visibility: Visibility,
    pub scan_status: ScanStatus,
    pub view_count: i64,
    pub tags: Vec<String>,
    pub variants: Vec<VariantResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageResponse {
    pub fn from_image(image: &Image, tags: Vec<String>, variants: &[ImageVariant]) -> Self {
        Self {
            id: image.id,
            owner_id: image.owner_id,
            title: image.title.clone(),
            description: image.description.clone(),
            original_filename: image.original_filename.clone(),
            mime_type: image.mime_type.mime_type().to_string(),
            file_size: image.file_size,
            width: image.width,
            height: image.height,
            status: image.status,
            visibility: image.visibility,
            scan_status: image.scan_status,
            view_count: image.view_count,
            tags,
            variants: variants.iter().map(VariantResponse::from).collect(),
            created_at: image.created_at,
            updated_at: image.updated_at,
        }
    }
}

/// Paginated listing envelope.
#[derive(Debug, Serialize, ToSchema)]
pub struct ImageListResponse {
    pub items: Vec<ImageResponse>,
    pub page: i64,
    pub per_page: i64,
}
