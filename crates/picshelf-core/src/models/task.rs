use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Background job types for the upload pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ImageProcess,
    ImageScan,
    ImageCleanup,
}

impl TaskType {
    /// Named queue the type is routed to by default.
    pub fn queue(&self) -> QueueName {
        match self {
            TaskType::ImageProcess | TaskType::ImageScan => QueueName::Default,
            TaskType::ImageCleanup => QueueName::Low,
        }
    }

    pub fn default_max_retries(&self) -> i32 {
        match self {
            TaskType::ImageProcess => 3,
            TaskType::ImageScan => 2,
            TaskType::ImageCleanup => 5,
        }
    }

    /// Visibility/execution timeout in seconds. A job running longer than
    /// this is considered lost and is re-delivered by the stale-task reaper.
    pub fn timeout_seconds(&self) -> i32 {
        match self {
            TaskType::ImageProcess => 300,
            TaskType::ImageScan => 120,
            TaskType::ImageCleanup => 60,
        }
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskType::ImageProcess => write!(f, "image.process"),
            TaskType::ImageScan => write!(f, "image.scan"),
            TaskType::ImageCleanup => write!(f, "image.cleanup"),
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image.process" => Ok(TaskType::ImageProcess),
            "image.scan" => Ok(TaskType::ImageScan),
            "image.cleanup" => Ok(TaskType::ImageCleanup),
            _ => Err(anyhow::anyhow!("Invalid task type: {}", s)),
        }
    }
}

/// Named priority queues. Selection across queues is weighted (or strict,
/// when configured) in the worker pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Critical,
    Default,
    Low,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Critical, QueueName::Default, QueueName::Low];

    /// Default claim weights; higher means claimed more often.
    pub fn default_weight(&self) -> u32 {
        match self {
            QueueName::Critical => 6,
            QueueName::Default => 3,
            QueueName::Low => 1,
        }
    }
}

impl Display for QueueName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            QueueName::Critical => write!(f, "critical"),
            QueueName::Default => write!(f, "default"),
            QueueName::Low => write!(f, "low"),
        }
    }
}

impl FromStr for QueueName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(QueueName::Critical),
            "default" => Ok(QueueName::Default),
            "low" => Ok(QueueName::Low),
            _ => Err(anyhow::anyhow!("Invalid queue name: {}", s)),
        }
    }
}

/// Job lifecycle. `failed` rows are the dead-letter set: they are retained in
/// the tasks table for operator inspection, never silently dropped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "task_status", rename_all = "lowercase")
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Scheduled => write!(f, "scheduled"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "scheduled" => Ok(TaskStatus::Scheduled),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub queue: QueueName,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Task {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Task {
            id: row.get("id"),
            task_type: row.get::<String, _>("task_type").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task_type: {}", e).into())
            })?,
            queue: row
                .get::<String, _>("queue")
                .parse()
                .map_err(|e| sqlx::Error::Decode(format!("Failed to parse queue: {}", e).into()))?,
            status: row.get("status"),
            payload: row.get("payload"),
            result: row.get("result"),
            scheduled_at: row.get("scheduled_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            timeout_seconds: row.get("timeout_seconds"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Task {
    pub fn is_ready_to_run(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Scheduled)
            && self.scheduled_at <= Utc::now()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    /// Unknown payload fields are ignored for forward compatibility.
    pub fn try_payload_as<P: TaskPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Create a payload JSON value from a typed struct.
    pub fn payload_from<P: TaskPayload>(payload: &P) -> serde_json::Value {
        serde_json::to_value(payload).unwrap_or_default()
    }
}

fn default_payload_version() -> u32 {
    1
}

/// Trait for type-safe task payloads
pub trait TaskPayload: Serialize + for<'de> Deserialize<'de> {
    fn task_type() -> TaskType;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProcessPayload {
    #[serde(default = "default_payload_version")]
    pub version: u32,
    pub image_id: Uuid,
}

impl ImageProcessPayload {
    pub fn new(image_id: Uuid) -> Self {
        Self {
            version: 1,
            image_id,
        }
    }
}

impl TaskPayload for ImageProcessPayload {
    fn task_type() -> TaskType {
        TaskType::ImageProcess
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageScanPayload {
    #[serde(default = "default_payload_version")]
    pub version: u32,
    pub image_id: Uuid,
}

impl ImageScanPayload {
    pub fn new(image_id: Uuid) -> Self {
        Self {
            version: 1,
            image_id,
        }
    }
}

impl TaskPayload for ImageScanPayload {
    fn task_type() -> TaskType {
        TaskType::ImageScan
    }
}

/// Cleanup carries a frozen key list so it does not depend on the image row
/// (or its variants) still existing when it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCleanupPayload {
    #[serde(default = "default_payload_version")]
    pub version: u32,
    pub image_id: Uuid,
    pub provider: String,
    pub keys: Vec<String>,
}

impl ImageCleanupPayload {
    pub fn new(image_id: Uuid, provider: String, keys: Vec<String>) -> Self {
        Self {
            version: 1,
            image_id,
            provider,
            keys,
        }
    }
}

impl TaskPayload for ImageCleanupPayload {
    fn task_type() -> TaskType {
        TaskType::ImageCleanup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(retry_count: i32, max_retries: i32, status: TaskStatus) -> Task {
        Task {
            id: Uuid::new_v4(),
            task_type: TaskType::ImageProcess,
            queue: QueueName::Default,
            status,
            payload: serde_json::json!({}),
            result: None,
            scheduled_at: Utc::now() - chrono::Duration::seconds(1),
            started_at: None,
            completed_at: None,
            retry_count,
            max_retries,
            timeout_seconds: 300,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn task_type_display_round_trip() {
        assert_eq!(TaskType::ImageProcess.to_string(), "image.process");
        assert_eq!(
            "image.cleanup".parse::<TaskType>().unwrap(),
            TaskType::ImageCleanup
        );
        assert!("image.transcode".parse::<TaskType>().is_err());
    }

    #[test]
    fn task_type_defaults_match_catalogue() {
        assert_eq!(TaskType::ImageProcess.queue(), QueueName::Default);
        assert_eq!(TaskType::ImageProcess.default_max_retries(), 3);
        assert_eq!(TaskType::ImageProcess.timeout_seconds(), 300);

        assert_eq!(TaskType::ImageScan.default_max_retries(), 2);
        assert_eq!(TaskType::ImageScan.timeout_seconds(), 120);

        assert_eq!(TaskType::ImageCleanup.queue(), QueueName::Low);
        assert_eq!(TaskType::ImageCleanup.default_max_retries(), 5);
        assert_eq!(TaskType::ImageCleanup.timeout_seconds(), 60);
    }

    #[test]
    fn queue_weights_ordered() {
        assert!(QueueName::Critical.default_weight() > QueueName::Default.default_weight());
        assert!(QueueName::Default.default_weight() > QueueName::Low.default_weight());
    }

    #[test]
    fn can_retry_respects_limit() {
        assert!(task_with(2, 3, TaskStatus::Running).can_retry());
        assert!(!task_with(3, 3, TaskStatus::Running).can_retry());
        assert!(!task_with(5, 3, TaskStatus::Running).can_retry());
    }

    #[test]
    fn ready_to_run_requires_pending_or_scheduled_and_due() {
        assert!(task_with(0, 3, TaskStatus::Pending).is_ready_to_run());
        assert!(task_with(0, 3, TaskStatus::Scheduled).is_ready_to_run());
        assert!(!task_with(0, 3, TaskStatus::Running).is_ready_to_run());

        let mut future = task_with(0, 3, TaskStatus::Pending);
        future.scheduled_at = Utc::now() + chrono::Duration::hours(1);
        assert!(!future.is_ready_to_run());
    }

    #[test]
    fn payloads_ignore_unknown_fields() {
        let json = serde_json::json!({
            "version": 2,
            "image_id": Uuid::new_v4(),
            "some_future_field": true,
        });
        let payload: ImageProcessPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.version, 2);
    }

    #[test]
    fn payload_version_defaults_to_one() {
        let json = serde_json::json!({ "image_id": Uuid::new_v4() });
        let payload: ImageScanPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.version, 1);
    }

    #[test]
    fn cleanup_payload_round_trip() {
        let payload = ImageCleanupPayload::new(
            Uuid::new_v4(),
            "local".to_string(),
            vec!["a".to_string(), "b".to_string()],
        );
        let value = Task::payload_from(&payload);
        let back: ImageCleanupPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.keys, payload.keys);
        assert_eq!(back.provider, "local");
    }
}
