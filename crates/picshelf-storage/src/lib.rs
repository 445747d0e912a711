//! Picshelf Storage Library
//!
//! Content-addressed object storage for image blobs. The [`ObjectStore`]
//! trait is the capability set the rest of the system consumes; local
//! filesystem and S3-compatible backends implement it. A `(provider, key)`
//! pair always refers to the same bytes once written; overwriting a key with
//! different content is undefined.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_object_store;
pub use keys::{object_key, validate_key};
#[cfg(feature = "storage-local")]
pub use local::LocalStore;
pub use picshelf_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Store;
pub use traits::{ObjectStat, ObjectStore, PutOptions, StorageError, StorageResult};
