//! Picshelf Worker Library
//!
//! Worker pool for the durable job queue: claim, dispatch, retry with
//! backoff, stale-task re-delivery, and graceful shutdown.

pub mod context;
pub mod queue;

pub use context::{empty_context_weak, TaskHandlerContext};
pub use queue::TaskQueue;
