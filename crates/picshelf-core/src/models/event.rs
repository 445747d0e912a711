//! Domain events recorded by the image aggregate.
//!
//! Events are persisted into the `image_events` outbox in the same
//! transaction as the aggregate save; a publisher outside the core drains
//! them. Exactly one publishable record exists per recorded event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::image::{ScanStatus, Visibility};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageEvent {
    ImageCreated {
        image_id: Uuid,
        owner_id: Uuid,
        occurred_at: DateTime<Utc>,
    },
    ImageActivated {
        image_id: Uuid,
        occurred_at: DateTime<Utc>,
    },
    ImageFailed {
        image_id: Uuid,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    ImageScanned {
        image_id: Uuid,
        verdict: ScanStatus,
        occurred_at: DateTime<Utc>,
    },
    ImageVisibilityChanged {
        image_id: Uuid,
        visibility: Visibility,
        occurred_at: DateTime<Utc>,
    },
    ImageDeleted {
        image_id: Uuid,
        occurred_at: DateTime<Utc>,
    },
}

impl ImageEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ImageEvent::ImageCreated { .. } => "image.created",
            ImageEvent::ImageActivated { .. } => "image.activated",
            ImageEvent::ImageFailed { .. } => "image.failed",
            ImageEvent::ImageScanned { .. } => "image.scanned",
            ImageEvent::ImageVisibilityChanged { .. } => "image.visibility_changed",
            ImageEvent::ImageDeleted { .. } => "image.deleted",
        }
    }

    pub fn image_id(&self) -> Uuid {
        match self {
            ImageEvent::ImageCreated { image_id, .. }
            | ImageEvent::ImageActivated { image_id, .. }
            | ImageEvent::ImageFailed { image_id, .. }
            | ImageEvent::ImageScanned { image_id, .. }
            | ImageEvent::ImageVisibilityChanged { image_id, .. }
            | ImageEvent::ImageDeleted { image_id, .. } => *image_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let id = Uuid::new_v4();
        let event = ImageEvent::ImageScanned {
            image_id: id,
            verdict: ScanStatus::Clean,
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "image_scanned");
        assert_eq!(json["verdict"], "clean");
        assert_eq!(event.event_type(), "image.scanned");
        assert_eq!(event.image_id(), id);
    }
}
