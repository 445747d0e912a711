//! Database repositories for the data access layer.
//!
//! Repositories own all SQL. The image repository persists the aggregate and
//! its domain events in one transaction (transactional outbox) and uses a
//! version column for optimistic concurrency; the task repository backs the
//! durable job queue with `FOR UPDATE SKIP LOCKED` claims.

pub mod image;
pub mod outbox;
pub mod task;

pub use image::{ImageRepository, ImageSearchParams, ImageSort, Pagination};
pub use outbox::{EventOutboxRepository, OutboxEvent};
pub use task::{TaskRepository, TASK_NOTIFY_CHANNEL};
