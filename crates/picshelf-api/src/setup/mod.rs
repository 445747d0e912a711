//! Application wiring: pool, migrations, storage, state, background
//! services, and the router.

pub mod database;
pub mod routes;
pub mod server;

use anyhow::{Context, Result};
use axum::Router;
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;

use picshelf_core::Config;
use picshelf_db::{EventOutboxRepository, ImageRepository, TaskRepository};
use picshelf_processing::{UploadValidator, VariantProcessor};
use picshelf_services::{
    ClamAvScanner, OutboxPublisher, ReconcileService, RetentionService,
};
use picshelf_storage::create_object_store;
use picshelf_worker::{TaskHandlerContext, TaskQueue};

use crate::state::AppState;

pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, Router)> {
    let pool = database::create_pool(&config.database).await?;
    database::run_migrations(&pool).await?;

    let object_store = create_object_store(&config.storage)
        .await
        .context("Failed to initialize object store")?;

    let image_repository = ImageRepository::new(pool.clone());
    let task_repository = TaskRepository::new(pool.clone());
    let outbox_repository = EventOutboxRepository::new(pool.clone());
    let validator = UploadValidator::new(config.validator.clone());
    let processor = VariantProcessor::new(config.processor.clone());
    let scanner = config
        .scanner
        .enabled
        .then(|| ClamAvScanner::new(&config.scanner));
    let upload_slots = Arc::new(Semaphore::new(config.server.max_concurrent_uploads));

    // The worker pool dispatches into the state that owns it, so the queue
    // gets a weak reference resolved through Arc::new_cyclic.
    let state = Arc::new_cyclic(|weak: &Weak<AppState>| {
        let context: Weak<dyn TaskHandlerContext> = weak.clone();
        let task_queue = TaskQueue::new(
            task_repository.clone(),
            config.queue.clone(),
            context,
            Some(pool.clone()),
        );

        AppState {
            config: config.clone(),
            image_repository: image_repository.clone(),
            object_store: object_store.clone(),
            validator,
            processor,
            scanner,
            task_queue,
            upload_slots,
        }
    });

    // Background loops: stuck-work reconciliation, outbox publishing, and
    // task retention.
    let reconcile = Arc::new(ReconcileService::new(
        image_repository,
        task_repository.clone(),
        config.reconcile.clone(),
        config.validator.enable_malware_scan,
    ));
    let _reconcile_handle = reconcile.start();

    let publisher = Arc::new(OutboxPublisher::new(outbox_repository));
    let _publisher_handle = publisher.start();

    let retention = Arc::new(RetentionService::new(
        task_repository,
        config.queue.task_retention_days,
    ));
    let _retention_handle = retention.start();

    let router = routes::build_router(state.clone());

    tracing::info!(
        storage_backend = %config.storage.backend,
        scan_enabled = config.validator.enable_malware_scan,
        queue_workers = config.queue.max_workers,
        "Application initialized"
    );

    Ok((state, router))
}
