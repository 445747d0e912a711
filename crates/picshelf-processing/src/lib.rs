//! Picshelf Processing Library
//!
//! Upload validation (the ordered gate pipeline) and image processing
//! (decode, metadata strip, resize, re-encode into delivery variants).

pub mod image;
pub mod validator;

pub use image::{ImageCodec, ProcessError, ProcessResult, VariantImage, VariantProcessor};
pub use validator::{sanitize_filename, sniff_mime, UploadValidator, ValidatedUpload, ValidationError};
