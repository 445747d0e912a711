//! Image codec: decode, metadata strip, and re-encode.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageReader};
use img_parts::{jpeg::Jpeg, png::Png, ImageEXIF};
use picshelf_core::models::ImageFormat;
use std::io::Cursor;

/// Errors from the processing stage.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The decoder refuses the container outright.
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Decoder or encoder failure on a container we do support.
    #[error("Image processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Image too small: {width}x{height} (minimum edge: {min})")]
    ImageTooSmall { width: u32, height: u32, min: u32 },
}

pub struct ImageCodec;

impl ImageCodec {
    /// Decode image bytes, guessing the container from content.
    pub fn decode(data: &[u8]) -> Result<DynamicImage, ProcessError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ProcessError::ProcessingFailed(e.to_string()))?;

        if reader.format().is_none() {
            return Err(ProcessError::UnsupportedFormat(
                "unrecognized container".to_string(),
            ));
        }

        reader.decode().map_err(|e| match e {
            image::ImageError::Unsupported(u) => ProcessError::UnsupportedFormat(u.to_string()),
            other => ProcessError::ProcessingFailed(other.to_string()),
        })
    }

    /// Read pixel dimensions from the container header without a full decode.
    pub fn probe_dimensions(data: &[u8]) -> Result<(u32, u32), ProcessError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ProcessError::ProcessingFailed(e.to_string()))?;

        if reader.format().is_none() {
            return Err(ProcessError::UnsupportedFormat(
                "unrecognized container".to_string(),
            ));
        }

        reader.into_dimensions().map_err(|e| match e {
            image::ImageError::Unsupported(u) => ProcessError::UnsupportedFormat(u.to_string()),
            other => ProcessError::ProcessingFailed(other.to_string()),
        })
    }

    /// Remove EXIF metadata from encoded JPEG/PNG bytes. Other containers
    /// pass through unchanged.
    pub fn strip_metadata(data: Vec<u8>) -> Vec<u8> {
        if let Ok(mut jpeg) = Jpeg::from_bytes(data.clone().into()) {
            jpeg.set_exif(None);
            return jpeg.encoder().bytes().to_vec();
        }

        if let Ok(mut png) = Png::from_bytes(data.clone().into()) {
            png.set_exif(None);
            return png.encoder().bytes().to_vec();
        }

        data
    }

    /// Encode a decoded image into the given container. `quality` applies to
    /// JPEG only and is expected pre-clamped to [60, 95].
    pub fn encode(
        img: &DynamicImage,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Vec<u8>, ProcessError> {
        let mut buffer = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = img.to_rgb8();
                let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
                rgb.write_with_encoder(encoder)
                    .map_err(|e| ProcessError::ProcessingFailed(e.to_string()))?;
            }
            ImageFormat::Png => {
                img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
                    .map_err(|e| ProcessError::ProcessingFailed(e.to_string()))?;
            }
            ImageFormat::Gif => {
                img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Gif)
                    .map_err(|e| ProcessError::ProcessingFailed(e.to_string()))?;
            }
            ImageFormat::Webp => {
                img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::WebP)
                    .map_err(|e| ProcessError::ProcessingFailed(e.to_string()))?;
            }
        }
        Ok(buffer)
    }

    /// Decoded dimensions of an image. Helper for places that already hold
    /// the decoded form.
    pub fn dimensions(img: &DynamicImage) -> (u32, u32) {
        img.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn decode_valid_png() {
        let data = png_bytes(20, 10);
        let img = ImageCodec::decode(&data).unwrap();
        assert_eq!(img.dimensions(), (20, 10));
    }

    #[test]
    fn decode_garbage_is_unsupported() {
        let err = ImageCodec::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ProcessError::UnsupportedFormat(_)));
    }

    #[test]
    fn probe_dimensions_without_decode() {
        let data = png_bytes(123, 45);
        assert_eq!(ImageCodec::probe_dimensions(&data).unwrap(), (123, 45));
        assert!(ImageCodec::probe_dimensions(b"nope").is_err());
    }

    #[test]
    fn encode_jpeg_drops_alpha() {
        let data = png_bytes(10, 10);
        let img = ImageCodec::decode(&data).unwrap();
        let jpeg = ImageCodec::encode(&img, ImageFormat::Jpeg, 85).unwrap();
        assert_eq!(&jpeg[..3], &[0xFF, 0xD8, 0xFF]);

        let decoded = ImageCodec::decode(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (10, 10));
    }

    #[test]
    fn encode_round_trips_each_format() {
        let data = png_bytes(8, 8);
        let img = ImageCodec::decode(&data).unwrap();
        for format in [
            ImageFormat::Jpeg,
            ImageFormat::Png,
            ImageFormat::Gif,
            ImageFormat::Webp,
        ] {
            let encoded = ImageCodec::encode(&img, format, 85).unwrap();
            let back = ImageCodec::decode(&encoded).unwrap();
            assert_eq!(back.dimensions(), (8, 8), "format {:?}", format);
        }
    }

    #[test]
    fn strip_metadata_passthrough_for_clean_images() {
        let data = png_bytes(4, 4);
        let stripped = ImageCodec::strip_metadata(data.clone());
        assert!(ImageCodec::decode(&stripped).is_ok());

        let garbage = b"not an image".to_vec();
        assert_eq!(ImageCodec::strip_metadata(garbage.clone()), garbage);
    }
}
