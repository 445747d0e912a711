//! Image variant types: the derived encodings produced by the processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Variant kind. The first four carry a target max edge length in pixels;
/// `original` preserves the source dimensions (re-encoded, metadata stripped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "variant_type", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum VariantType {
    Thumbnail,
    Small,
    Medium,
    Large,
    Original,
}

impl VariantType {
    /// All variant types the processor produces, in ascending size order.
    pub const ALL: [VariantType; 5] = [
        VariantType::Thumbnail,
        VariantType::Small,
        VariantType::Medium,
        VariantType::Large,
        VariantType::Original,
    ];

    /// Target max edge length in pixels; `None` for `original`.
    pub fn target_max_width(&self) -> Option<u32> {
        match self {
            VariantType::Thumbnail => Some(160),
            VariantType::Small => Some(320),
            VariantType::Medium => Some(800),
            VariantType::Large => Some(1600),
            VariantType::Original => None,
        }
    }
}

impl Display for VariantType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VariantType::Thumbnail => write!(f, "thumbnail"),
            VariantType::Small => write!(f, "small"),
            VariantType::Medium => write!(f, "medium"),
            VariantType::Large => write!(f, "large"),
            VariantType::Original => write!(f, "original"),
        }
    }
}

impl FromStr for VariantType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbnail" => Ok(VariantType::Thumbnail),
            "small" => Ok(VariantType::Small),
            "medium" => Ok(VariantType::Medium),
            "large" => Ok(VariantType::Large),
            "original" => Ok(VariantType::Original),
            _ => Err(anyhow::anyhow!("Invalid variant type: {}", s)),
        }
    }
}

/// Encoded image container format. Used both for the declared MIME type of an
/// upload and for the format of an encoded variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "image_format", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
        }
    }

    /// Parse a normalized MIME type (no parameters) into a format.
    pub fn from_mime(mime: &str) -> Option<ImageFormat> {
        match mime {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/gif" => Some(ImageFormat::Gif),
            "image/webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }
}

impl Display for ImageFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ImageFormat::Jpeg => write!(f, "jpeg"),
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Gif => write!(f, "gif"),
            ImageFormat::Webp => write!(f, "webp"),
        }
    }
}

impl FromStr for ImageFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "gif" => Ok(ImageFormat::Gif),
            "webp" => Ok(ImageFormat::Webp),
            _ => Err(anyhow::anyhow!("Invalid image format: {}", s)),
        }
    }
}

/// Compute the output dimensions for an aspect-preserving downscale so that
/// the longer edge equals `target` pixels. Never upscales: sources already
/// within the target are returned unchanged. The short edge is floor-rounded
/// and clamped to at least 1.
pub fn scaled_dimensions(src_w: u32, src_h: u32, target: u32) -> (u32, u32) {
    if src_w.max(src_h) <= target {
        return (src_w, src_h);
    }
    if src_w >= src_h {
        let h = (src_h as u64 * target as u64 / src_w as u64) as u32;
        (target, h.max(1))
    } else {
        let w = (src_w as u64 * target as u64 / src_h as u64) as u32;
        (w.max(1), target)
    }
}

/// A derived encoding of an image. Owned exclusively by its parent image and
/// cascade-deleted with it; at most one variant of each type per image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct ImageVariant {
    pub id: Uuid,
    pub image_id: Uuid,
    pub variant_type: VariantType,
    pub storage_key: String,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub format: ImageFormat,
    pub created_at: DateTime<Utc>,
}

impl ImageVariant {
    pub fn new(
        image_id: Uuid,
        variant_type: VariantType,
        storage_key: String,
        width: u32,
        height: u32,
        file_size: u64,
        format: ImageFormat,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_id,
            variant_type,
            storage_key,
            width: width as i32,
            height: height as i32,
            file_size: file_size as i64,
            format,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_target_widths() {
        assert_eq!(VariantType::Thumbnail.target_max_width(), Some(160));
        assert_eq!(VariantType::Small.target_max_width(), Some(320));
        assert_eq!(VariantType::Medium.target_max_width(), Some(800));
        assert_eq!(VariantType::Large.target_max_width(), Some(1600));
        assert_eq!(VariantType::Original.target_max_width(), None);
    }

    #[test]
    fn variant_type_round_trip() {
        for vt in VariantType::ALL {
            assert_eq!(vt.to_string().parse::<VariantType>().unwrap(), vt);
        }
        assert!("tiny".parse::<VariantType>().is_err());
    }

    #[test]
    fn format_mime_mapping() {
        assert_eq!(ImageFormat::from_mime("image/jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_mime("image/jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_mime("image/webp"), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::from_mime("image/svg+xml"), None);
        assert_eq!(ImageFormat::Png.mime_type(), "image/png");
        assert_eq!(ImageFormat::Jpeg.extension(), "jpg");
    }

    #[test]
    fn scaled_dimensions_landscape_floor() {
        // 1920x1080 thumbnail: height = floor(160 * 1080 / 1920) = 90
        assert_eq!(scaled_dimensions(1920, 1080, 160), (160, 90));
    }

    #[test]
    fn scaled_dimensions_portrait() {
        // Longer edge is the height; it gets pinned to the target.
        assert_eq!(scaled_dimensions(1080, 1920, 160), (90, 160));
    }

    #[test]
    fn scaled_dimensions_never_upscales() {
        assert_eq!(scaled_dimensions(100, 80, 160), (100, 80));
        assert_eq!(scaled_dimensions(160, 160, 160), (160, 160));
    }

    #[test]
    fn scaled_dimensions_extreme_aspect_clamps_to_one() {
        // 8192x1 scaled to 160: the short edge floors to 0 and must clamp.
        assert_eq!(scaled_dimensions(8192, 1, 160), (160, 1));
    }
}
