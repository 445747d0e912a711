//! Domain models shared across picshelf components.

pub mod event;
pub mod image;
pub mod task;
pub mod variant;

pub use event::ImageEvent;
pub use image::{DomainError, Image, ImageStatus, NewImageParams, ScanStatus, Visibility};
pub use task::{
    ImageCleanupPayload, ImageProcessPayload, ImageScanPayload, QueueName, Task, TaskPayload,
    TaskStatus, TaskType,
};
pub use variant::{scaled_dimensions, ImageFormat, ImageVariant, VariantType};
