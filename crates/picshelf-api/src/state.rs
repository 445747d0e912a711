//! Application state.
//!
//! All shared resources (repository, object store, queue, validator,
//! processor, scanner) live here and are handed to handlers via
//! `State<Arc<AppState>>`. The state also implements
//! [`TaskHandlerContext`], dispatching claimed queue jobs to the handlers
//! in `task_handlers`.
//!
//! [`TaskHandlerContext`]: picshelf_worker::TaskHandlerContext

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

use picshelf_core::models::{Task, TaskType};
use picshelf_core::{Config, TaskError};
use picshelf_db::ImageRepository;
use picshelf_processing::{UploadValidator, VariantProcessor};
use picshelf_services::ClamAvScanner;
use picshelf_storage::ObjectStore;
use picshelf_worker::TaskQueue;

use crate::task_handlers::{CleanupTaskHandler, ProcessTaskHandler, ScanTaskHandler};

pub struct AppState {
    pub config: Config,
    pub image_repository: ImageRepository,
    pub object_store: Arc<dyn ObjectStore>,
    pub validator: UploadValidator,
    pub processor: VariantProcessor,
    pub scanner: Option<ClamAvScanner>,
    pub task_queue: TaskQueue,
    /// Backpressure on concurrent in-flight uploads.
    pub upload_slots: Arc<Semaphore>,
}

#[async_trait]
impl picshelf_worker::TaskHandlerContext for AppState {
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value> {
        let result = match task.task_type {
            TaskType::ImageProcess => ProcessTaskHandler::handle(&self, task).await,
            TaskType::ImageScan => ScanTaskHandler::handle(&self, task).await,
            TaskType::ImageCleanup => CleanupTaskHandler::handle(&self, task).await,
        };

        result.map_err(|e: TaskError| e.into())
    }
}

fn _assert_app_state_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<AppState>();
    assert_sync::<AppState>();
}
