//! Upload validation gate pipeline.
//!
//! Gates are evaluated in a fixed order and the first failure
//! short-circuits: size, MIME sniff, magic bytes, then (after the processor
//! has decoded the image) dimensions and pixel budget. Filename sanitation
//! is non-blocking and only derives the stored `original_filename`. The
//! malware gate runs out of band through the scan job.

use picshelf_core::models::ImageFormat;
use picshelf_core::ValidatorConfig;

/// Validation errors for uploaded files
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Empty file")]
    EmptyFile,

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("Invalid MIME type: {0}")]
    InvalidMimeType(String),

    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },

    #[error("Image too large: {width}x{height} exceeds {max_width}x{max_height}")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("Image has too many pixels: {pixels} exceeds budget of {max}")]
    TooManyPixels { pixels: u64, max: u64 },
}

/// Result of the synchronous content gates.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUpload {
    /// Format determined from the content prefix, never from the filename
    /// or a client-supplied header.
    pub format: ImageFormat,
    pub file_size: usize,
    pub safe_filename: String,
}

/// Determine the image format from the content prefix.
///
/// Returns `None` when the prefix matches none of the supported containers.
pub fn sniff_mime(data: &[u8]) -> Option<ImageFormat> {
    if data.len() >= 3 && data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF {
        return Some(ImageFormat::Jpeg);
    }
    if data.len() >= 8 && data[..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some(ImageFormat::Png);
    }
    if data.len() >= 4 && &data[..4] == b"GIF8" {
        return Some(ImageFormat::Gif);
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some(ImageFormat::Webp);
    }
    None
}

/// Strict format-specific magic check. Must agree with the sniffed format.
fn has_valid_magic(data: &[u8], format: ImageFormat) -> bool {
    match format {
        ImageFormat::Jpeg => data.len() >= 3 && data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF,
        ImageFormat::Png => {
            data.len() >= 8 && data[..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]
        }
        ImageFormat::Gif => data.len() >= 4 && &data[..4] == b"GIF8",
        ImageFormat::Webp => data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP",
    }
}

/// Sanitize a client-supplied filename: strip any path component, whitelist
/// alphanumerics plus `.`, `-`, `_`, and cap the length.
pub fn sanitize_filename(filename: &str) -> String {
    const MAX_FILENAME_LENGTH: usize = 255;

    let filename_only = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let sanitized: String = filename_only
        .chars()
        .take(MAX_FILENAME_LENGTH)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches(['_', '.']).is_empty() {
        return "file".to_string();
    }

    sanitized
}

/// Upload validator: the configured gate pipeline.
#[derive(Clone)]
pub struct UploadValidator {
    config: ValidatorConfig,
}

impl UploadValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Run the synchronous content gates (size, sniff, magic) and derive the
    /// stored filename. Deterministic for a fixed input and configuration.
    pub fn validate_bytes(
        &self,
        data: &[u8],
        original_filename: &str,
    ) -> Result<ValidatedUpload, ValidationError> {
        if data.is_empty() {
            return Err(ValidationError::EmptyFile);
        }
        if data.len() > self.config.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size: data.len(),
                max: self.config.max_file_size,
            });
        }

        let format = sniff_mime(data).ok_or_else(|| {
            ValidationError::InvalidMimeType("unrecognized content prefix".to_string())
        })?;

        let mime = format.mime_type();
        if !self
            .config
            .allowed_mime_types
            .iter()
            .any(|allowed| normalize_mime(allowed) == mime)
        {
            return Err(ValidationError::InvalidMimeType(mime.to_string()));
        }

        if !has_valid_magic(data, format) {
            return Err(ValidationError::InvalidMimeType(format!(
                "content does not match {} magic bytes",
                mime
            )));
        }

        Ok(ValidatedUpload {
            format,
            file_size: data.len(),
            safe_filename: sanitize_filename(original_filename),
        })
    }

    /// Dimension and pixel-budget gates. Called once decoded dimensions are
    /// known (ingest probe or processor, both pre re-encode).
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), ValidationError> {
        if width == 0 || height == 0 {
            return Err(ValidationError::InvalidDimensions {
                width: width as i64,
                height: height as i64,
            });
        }
        if width > self.config.max_width || height > self.config.max_height {
            return Err(ValidationError::ImageTooLarge {
                width,
                height,
                max_width: self.config.max_width,
                max_height: self.config.max_height,
            });
        }
        let pixels = width as u64 * height as u64;
        if pixels > self.config.max_pixels {
            return Err(ValidationError::TooManyPixels {
                pixels,
                max: self.config.max_pixels,
            });
        }
        Ok(())
    }
}

/// Strip MIME parameters and lowercase (`image/JPEG; charset=x` → `image/jpeg`).
fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or(mime).trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal real headers for each supported container.
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00];
    const GIF_HEADER: &[u8] = b"GIF89a\x01\x00\x01\x00";
    const WEBP_HEADER: &[u8] = b"RIFF\x24\x00\x00\x00WEBPVP8 ";

    fn validator() -> UploadValidator {
        UploadValidator::new(ValidatorConfig::default())
    }

    #[test]
    fn sniff_recognizes_supported_formats() {
        assert_eq!(sniff_mime(JPEG_HEADER), Some(ImageFormat::Jpeg));
        assert_eq!(sniff_mime(PNG_HEADER), Some(ImageFormat::Png));
        assert_eq!(sniff_mime(GIF_HEADER), Some(ImageFormat::Gif));
        assert_eq!(sniff_mime(WEBP_HEADER), Some(ImageFormat::Webp));
        assert_eq!(sniff_mime(b"MZ\x90\x00"), None);
        assert_eq!(sniff_mime(b""), None);
    }

    #[test]
    fn sniff_ignores_filename_entirely() {
        // The filename claims PNG, the bytes are a JPEG: the sniffed format wins.
        let result = validator().validate_bytes(JPEG_HEADER, "innocent.png").unwrap();
        assert_eq!(result.format, ImageFormat::Jpeg);
    }

    #[test]
    fn size_gate_boundaries() {
        let mut config = ValidatorConfig::default();
        config.max_file_size = 64;
        let v = UploadValidator::new(config);

        // Exactly at the limit: accepted.
        let mut at_limit = JPEG_HEADER.to_vec();
        at_limit.resize(64, 0);
        assert!(v.validate_bytes(&at_limit, "a.jpg").is_ok());

        // One byte over: rejected.
        let mut over = JPEG_HEADER.to_vec();
        over.resize(65, 0);
        assert!(matches!(
            v.validate_bytes(&over, "a.jpg"),
            Err(ValidationError::FileTooLarge { size: 65, max: 64 })
        ));
    }

    #[test]
    fn empty_file_rejected() {
        assert!(matches!(
            validator().validate_bytes(&[], "a.jpg"),
            Err(ValidationError::EmptyFile)
        ));
    }

    #[test]
    fn disallowed_mime_rejected() {
        let mut config = ValidatorConfig::default();
        config.allowed_mime_types = vec!["image/png".to_string()];
        let v = UploadValidator::new(config);

        assert!(v.validate_bytes(PNG_HEADER, "a.png").is_ok());
        assert!(matches!(
            v.validate_bytes(JPEG_HEADER, "a.jpg"),
            Err(ValidationError::InvalidMimeType(_))
        ));
    }

    #[test]
    fn allowed_mime_list_is_normalized() {
        let mut config = ValidatorConfig::default();
        config.allowed_mime_types = vec!["IMAGE/JPEG; q=1".to_string()];
        let v = UploadValidator::new(config);
        assert!(v.validate_bytes(JPEG_HEADER, "a.jpg").is_ok());
    }

    #[test]
    fn polyglot_with_gif_header_passes_content_gates() {
        // A valid GIF prefix with trailing script bytes passes sniff+magic;
        // the processor's re-encode is what sheds the trailer.
        let mut polyglot = GIF_HEADER.to_vec();
        polyglot.extend_from_slice(b"<script>alert(1)</script>");
        let result = validator().validate_bytes(&polyglot, "pic.gif").unwrap();
        assert_eq!(result.format, ImageFormat::Gif);
    }

    #[test]
    fn dimension_gates() {
        let v = validator();
        assert!(v.check_dimensions(1920, 1080).is_ok());
        assert!(v.check_dimensions(8192, 8192).is_ok());

        assert!(matches!(
            v.check_dimensions(0, 100),
            Err(ValidationError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            v.check_dimensions(8193, 1),
            Err(ValidationError::ImageTooLarge { .. })
        ));
        assert!(matches!(
            v.check_dimensions(1, 8193),
            Err(ValidationError::ImageTooLarge { .. })
        ));
    }

    #[test]
    fn pixel_budget_boundaries() {
        // Widen the edge caps so the budget gate is the binding constraint.
        let mut config = ValidatorConfig::default();
        config.max_width = 16384;
        config.max_height = 16384;
        let v = UploadValidator::new(config);

        assert!(v.check_dimensions(10_000, 10_000).is_ok());
        assert!(matches!(
            v.check_dimensions(10_000, 10_001),
            Err(ValidationError::TooManyPixels { .. })
        ));
    }

    #[test]
    fn validator_is_deterministic() {
        let v = validator();
        let a = v.validate_bytes(PNG_HEADER, "same name.png").unwrap();
        let b = v.validate_bytes(PNG_HEADER, "same name.png").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sanitize_filename_whitelist() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("my photo (1).jpg"), "my_photo__1_.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\x\\cat.png"), "cat.png");
        assert_eq!(sanitize_filename("üñï.png"), "___.png");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("...."), "file");
        assert_eq!(sanitize_filename(&"x".repeat(500)).len(), 255);
    }
}
