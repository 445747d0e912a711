//! Image decoding, metadata stripping, and variant production.

pub mod codec;
pub mod variants;

pub use codec::{ImageCodec, ProcessError};
pub use variants::{ProcessResult, VariantImage, VariantProcessor};
