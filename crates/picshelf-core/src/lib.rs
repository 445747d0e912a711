//! Picshelf Core Library
//!
//! This crate provides the domain models, error types, and configuration that
//! are shared across all picshelf components: the image aggregate and its
//! variants, domain events, queue task types, and the application error model.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod task_error;

// Re-export commonly used types
pub use config::{
    Config, DatabaseConfig, ProcessorConfig, QueueConfig, ReconcileConfig, ScannerConfig,
    ServerConfig, StorageConfig, ValidatorConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;
pub use task_error::{TaskError, TaskResultExt};
