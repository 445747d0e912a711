//! Variant production: one decode, N aspect-preserving re-encodes.

use bytes::Bytes;
use image::imageops::FilterType;
use picshelf_core::models::{scaled_dimensions, ImageFormat, VariantType};
use picshelf_core::ProcessorConfig;

use super::codec::{ImageCodec, ProcessError};

/// One encoded variant ready for storage.
#[derive(Debug, Clone)]
pub struct VariantImage {
    pub variant_type: VariantType,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

/// Output of a full processing run.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub source_width: u32,
    pub source_height: u32,
    pub variants: Vec<VariantImage>,
}

impl ProcessResult {
    pub fn variant(&self, variant_type: VariantType) -> Option<&VariantImage> {
        self.variants.iter().find(|v| v.variant_type == variant_type)
    }
}

/// Produces the full variant set from original bytes.
///
/// Resized variants are encoded in the configured delivery format; the
/// `original` variant is re-encoded in the source format at full size, which
/// normalizes the container and sheds metadata and any trailing bytes, while
/// keeping the declared MIME accurate. The pristine upload stays under its
/// own storage key and is never served.
#[derive(Clone)]
pub struct VariantProcessor {
    config: ProcessorConfig,
}

impl VariantProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    /// Decode once, then resize and encode every variant. CPU-bound; callers
    /// run this under `spawn_blocking`.
    pub fn process(
        &self,
        data: &[u8],
        source_format: ImageFormat,
    ) -> Result<ProcessResult, ProcessError> {
        let start = std::time::Instant::now();
        let img = ImageCodec::decode(data)?;
        let (source_width, source_height) = ImageCodec::dimensions(&img);

        if source_width < self.config.min_dimension || source_height < self.config.min_dimension {
            return Err(ProcessError::ImageTooSmall {
                width: source_width,
                height: source_height,
                min: self.config.min_dimension,
            });
        }

        let mut variants = Vec::with_capacity(VariantType::ALL.len());
        for variant_type in VariantType::ALL {
            let (width, height) = match variant_type.target_max_width() {
                Some(target) => scaled_dimensions(source_width, source_height, target),
                None => (source_width, source_height),
            };

            let resized = if (width, height) == (source_width, source_height) {
                img.clone()
            } else {
                img.resize_exact(width, height, FilterType::Lanczos3)
            };

            let format = if variant_type == VariantType::Original {
                source_format
            } else {
                self.config.output_format
            };

            let encoded = ImageCodec::encode(&resized, format, self.config.quality)?;
            let encoded = ImageCodec::strip_metadata(encoded);

            variants.push(VariantImage {
                variant_type,
                data: Bytes::from(encoded),
                width,
                height,
                format,
            });
        }

        tracing::debug!(
            source_width,
            source_height,
            variant_count = variants.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Variant processing complete"
        );

        Ok(ProcessResult {
            source_width,
            source_height,
            variants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([20, 120, 220, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn gif_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 200, 40, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Gif)
            .unwrap();
        buffer
    }

    fn processor() -> VariantProcessor {
        VariantProcessor::new(ProcessorConfig::default())
    }

    #[test]
    fn produces_all_five_variants() {
        let data = png_bytes(1920, 1080);
        let result = processor().process(&data, ImageFormat::Png).unwrap();

        assert_eq!(result.source_width, 1920);
        assert_eq!(result.source_height, 1080);
        assert_eq!(result.variants.len(), 5);
        for vt in VariantType::ALL {
            assert!(result.variant(vt).is_some(), "missing {}", vt);
        }
    }

    #[test]
    fn thumbnail_dimensions_floor_rounded() {
        let data = png_bytes(1920, 1080);
        let result = processor().process(&data, ImageFormat::Png).unwrap();

        let thumb = result.variant(VariantType::Thumbnail).unwrap();
        assert_eq!((thumb.width, thumb.height), (160, 90));

        let small = result.variant(VariantType::Small).unwrap();
        assert_eq!((small.width, small.height), (320, 180));

        let large = result.variant(VariantType::Large).unwrap();
        assert_eq!((large.width, large.height), (1600, 900));
    }

    #[test]
    fn original_variant_keeps_source_format_and_size() {
        let data = png_bytes(640, 480);
        let result = processor().process(&data, ImageFormat::Png).unwrap();

        let original = result.variant(VariantType::Original).unwrap();
        assert_eq!(original.format, ImageFormat::Png);
        assert_eq!((original.width, original.height), (640, 480));

        let resized = result.variant(VariantType::Medium).unwrap();
        assert_eq!(resized.format, ImageFormat::Jpeg);
    }

    #[test]
    fn encoded_dimensions_match_reported() {
        let data = png_bytes(800, 600);
        let result = processor().process(&data, ImageFormat::Png).unwrap();

        for variant in &result.variants {
            let decoded = ImageCodec::decode(&variant.data).unwrap();
            assert_eq!(
                ImageCodec::dimensions(&decoded),
                (variant.width, variant.height),
                "variant {}",
                variant.variant_type
            );
        }
    }

    #[test]
    fn small_source_never_upscaled() {
        let data = png_bytes(100, 80);
        let result = processor().process(&data, ImageFormat::Png).unwrap();

        for variant in &result.variants {
            assert_eq!((variant.width, variant.height), (100, 80));
        }
    }

    #[test]
    fn garbage_input_is_unsupported_format() {
        let err = processor()
            .process(b"not an image at all", ImageFormat::Jpeg)
            .unwrap_err();
        assert!(matches!(err, ProcessError::UnsupportedFormat(_)));
    }

    #[test]
    fn min_dimension_floor_enforced() {
        let mut config = ProcessorConfig::default();
        config.min_dimension = 64;
        let processor = VariantProcessor::new(config);

        let err = processor
            .process(&png_bytes(32, 100), ImageFormat::Png)
            .unwrap_err();
        assert!(matches!(err, ProcessError::ImageTooSmall { .. }));
    }

    #[test]
    fn polyglot_trailer_not_carried_into_variants() {
        let marker = b"<script>alert(1)</script>";
        let mut polyglot = gif_bytes(64, 64);
        polyglot.extend_from_slice(marker);

        let result = processor().process(&polyglot, ImageFormat::Gif).unwrap();
        for variant in &result.variants {
            let haystack = variant.data.as_ref();
            let found = haystack
                .windows(marker.len())
                .any(|window| window == marker);
            assert!(!found, "variant {} carries the trailer", variant.variant_type);
        }
    }

    #[test]
    fn processing_is_idempotent() {
        let data = png_bytes(320, 240);
        let a = processor().process(&data, ImageFormat::Png).unwrap();
        let b = processor().process(&data, ImageFormat::Png).unwrap();

        assert_eq!(a.variants.len(), b.variants.len());
        for (va, vb) in a.variants.iter().zip(b.variants.iter()) {
            assert_eq!(va.data, vb.data);
            assert_eq!((va.width, va.height), (vb.width, vb.height));
        }
    }
}
