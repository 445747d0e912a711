//! Outbox event publisher.
//!
//! Drains the `image_events` outbox and emits each event to the configured
//! sink. The in-tree sink is the structured log; external delivery (webhooks,
//! a broker) plugs in behind the same drain loop. The aggregate save
//! guarantees exactly one outbox row per event; marking rows published after
//! emission makes delivery at-least-once.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use picshelf_db::EventOutboxRepository;

const DRAIN_INTERVAL: Duration = Duration::from_secs(5);
const DRAIN_BATCH: i64 = 100;

#[derive(Clone)]
pub struct OutboxPublisher {
    outbox_repository: EventOutboxRepository,
}

impl OutboxPublisher {
    pub fn new(outbox_repository: EventOutboxRepository) -> Self {
        Self { outbox_repository }
    }

    /// Start the drain loop. Returns a JoinHandle for shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(DRAIN_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tick.tick().await;
                if let Err(e) = self.drain_once().await {
                    tracing::error!(error = %e, "Outbox drain failed");
                }
            }
        })
    }

    /// Publish one batch of unpublished events.
    pub async fn drain_once(&self) -> Result<usize, anyhow::Error> {
        let events = self.outbox_repository.fetch_unpublished(DRAIN_BATCH).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut published = Vec::with_capacity(events.len());
        for event in &events {
            tracing::info!(
                event_id = %event.id,
                image_id = %event.image_id,
                event_type = %event.event_type,
                payload = %event.payload,
                "Domain event published"
            );
            published.push(event.id);
        }

        self.outbox_repository.mark_published(&published).await?;
        Ok(published.len())
    }
}
