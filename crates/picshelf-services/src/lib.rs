//! Picshelf Services Library
//!
//! Side services around the upload pipeline: the ClamAV scanner client, the
//! reconciliation sweep that re-enqueues stuck work, the outbox event
//! publisher, and retention cleanup for finished queue rows.

#[cfg(feature = "clamav")]
pub mod clamav;
pub mod publisher;
pub mod reconcile;
pub mod retention;

#[cfg(feature = "clamav")]
pub use clamav::{ClamAvScanner, ScanVerdict};
pub use publisher::OutboxPublisher;
pub use reconcile::ReconcileService;
pub use retention::RetentionService;
