//! Configuration module
//!
//! Environment-based configuration for the API server and workers. All
//! sections are loaded once at startup via [`Config::from_env`], validated,
//! and handed to components by dependency injection.

use std::env;
use std::str::FromStr;

use crate::models::ImageFormat;
use crate::storage_types::StorageBackend;

const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024; // 10 MiB
const DEFAULT_MAX_DIMENSION: u32 = 8192;
const DEFAULT_MAX_PIXELS: u64 = 100_000_000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_else(|_| default.iter().map(|s| s.to_string()).collect())
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    /// Cap on concurrent in-flight uploads per process (backpressure).
    pub max_concurrent_uploads: usize,
    /// Wall-clock deadline for a single ingest request, in seconds.
    pub ingest_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_base_path: Option<String>,
    pub local_public_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_force_path_style: bool,
    pub presigned_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    pub max_file_size: usize,
    pub max_width: u32,
    pub max_height: u32,
    pub max_pixels: u64,
    pub allowed_mime_types: Vec<String>,
    pub enable_malware_scan: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            max_pixels: DEFAULT_MAX_PIXELS,
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
            ],
            enable_malware_scan: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Delivery format for resized variants. The `original` variant is
    /// re-encoded in the source format to preserve the declared MIME.
    pub output_format: ImageFormat,
    /// Encoder quality, clamped to [60, 95].
    pub quality: u8,
    /// Smallest acceptable source edge in pixels.
    pub min_dimension: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            output_format: ImageFormat::Jpeg,
            quality: 85,
            min_dimension: 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Claim weights per named queue (critical, default, low).
    pub weight_critical: u32,
    pub weight_default: u32,
    pub weight_low: u32,
    /// When true, always drain higher-priority queues first.
    pub strict_priority: bool,
    pub shutdown_timeout_secs: u64,
    /// Interval in seconds between runs of the stale task reaper.
    pub stale_task_reap_interval_secs: u64,
    /// Grace period in seconds added to the task timeout before a running
    /// task is considered lost and re-delivered.
    pub stale_task_grace_period_secs: i64,
    /// Retention in days for finished tasks. 0 disables retention cleanup.
    pub task_retention_days: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            weight_critical: 6,
            weight_default: 3,
            weight_low: 1,
            strict_priority: false,
            shutdown_timeout_secs: 30,
            stale_task_reap_interval_secs: 60,
            stale_task_grace_period_secs: 60,
            task_retention_days: 14,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScannerConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    /// Interval in seconds between reconciliation sweeps.
    pub interval_secs: u64,
    /// An image still in `processing` older than this is re-enqueued.
    pub stuck_after_secs: i64,
    /// Grace period in seconds before cleanup hard-deletes a deleted/failed row.
    pub hard_delete_grace_secs: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            stuck_after_secs: 900,
            hard_delete_grace_secs: 3600,
        }
    }
}

/// Application configuration snapshot, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub validator: ValidatorConfig,
    pub processor: ProcessorConfig,
    pub queue: QueueConfig,
    pub scanner: ScannerConfig,
    pub reconcile: ReconcileConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let server = ServerConfig {
            port: env_parse("SERVER_PORT", 3000),
            environment: env_string("ENVIRONMENT", "development"),
            cors_origins: env_list("CORS_ORIGINS", &["*"]),
            max_concurrent_uploads: env_parse("MAX_CONCURRENT_UPLOADS", 32),
            ingest_timeout_secs: env_parse("INGEST_TIMEOUT_SECS", 60),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?,
            max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", DEFAULT_DB_TIMEOUT_SECS),
        };

        let storage = StorageConfig {
            backend: env_string("STORAGE_BACKEND", "local").parse()?,
            local_base_path: env_opt("LOCAL_STORAGE_PATH"),
            local_public_url: env_opt("LOCAL_STORAGE_BASE_URL"),
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION").or_else(|| env_opt("AWS_REGION")),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            s3_force_path_style: env_bool("S3_FORCE_PATH_STYLE", false),
            presigned_ttl_secs: env_parse("PRESIGNED_URL_TTL_SECS", 900),
        };

        let validator = ValidatorConfig {
            max_file_size: env_parse("MAX_FILE_SIZE_BYTES", DEFAULT_MAX_FILE_SIZE),
            max_width: env_parse("MAX_IMAGE_WIDTH", DEFAULT_MAX_DIMENSION),
            max_height: env_parse("MAX_IMAGE_HEIGHT", DEFAULT_MAX_DIMENSION),
            max_pixels: env_parse("MAX_IMAGE_PIXELS", DEFAULT_MAX_PIXELS),
            allowed_mime_types: env_list(
                "ALLOWED_MIME_TYPES",
                &["image/jpeg", "image/png", "image/gif", "image/webp"],
            ),
            enable_malware_scan: env_bool("MALWARE_SCAN_ENABLED", true),
        };

        let processor = ProcessorConfig {
            output_format: env_string("VARIANT_OUTPUT_FORMAT", "jpeg").parse()?,
            quality: env_parse::<u8>("VARIANT_QUALITY", 85).clamp(60, 95),
            min_dimension: env_parse("MIN_IMAGE_DIMENSION", 1),
        };

        let queue = QueueConfig {
            max_workers: env_parse("QUEUE_MAX_WORKERS", 4),
            poll_interval_ms: env_parse("QUEUE_POLL_INTERVAL_MS", 1000),
            weight_critical: env_parse("QUEUE_WEIGHT_CRITICAL", 6),
            weight_default: env_parse("QUEUE_WEIGHT_DEFAULT", 3),
            weight_low: env_parse("QUEUE_WEIGHT_LOW", 1),
            strict_priority: env_bool("QUEUE_STRICT_PRIORITY", false),
            shutdown_timeout_secs: env_parse("QUEUE_SHUTDOWN_TIMEOUT_SECS", 30),
            stale_task_reap_interval_secs: env_parse("QUEUE_STALE_REAP_INTERVAL_SECS", 60),
            stale_task_grace_period_secs: env_parse("QUEUE_STALE_GRACE_PERIOD_SECS", 60),
            task_retention_days: env_parse("TASK_RETENTION_DAYS", 14),
        };

        let scanner = ScannerConfig {
            host: env_string("CLAMAV_HOST", "localhost"),
            port: env_parse("CLAMAV_PORT", 3310),
            timeout_secs: env_parse("CLAMAV_TIMEOUT_SECS", 30),
            enabled: env_bool("CLAMAV_ENABLED", true),
        };

        let reconcile = ReconcileConfig {
            interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 300),
            stuck_after_secs: env_parse("RECONCILE_STUCK_AFTER_SECS", 900),
            hard_delete_grace_secs: env_parse("CLEANUP_HARD_DELETE_GRACE_SECS", 3600),
        };

        let config = Config {
            server,
            database,
            storage,
            validator,
            processor,
            queue,
            scanner,
            reconcile,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.storage.backend {
            StorageBackend::Local => {
                if self.storage.local_base_path.is_none() {
                    anyhow::bail!("LOCAL_STORAGE_PATH is required for the local storage backend");
                }
            }
            StorageBackend::S3 => {
                if self.storage.s3_bucket.is_none() {
                    anyhow::bail!("S3_BUCKET is required for the s3 storage backend");
                }
                if self.storage.s3_region.is_none() {
                    anyhow::bail!(
                        "S3_REGION or AWS_REGION is required for the s3 storage backend"
                    );
                }
            }
        }
        if self.validator.max_file_size == 0 {
            anyhow::bail!("MAX_FILE_SIZE_BYTES must be positive");
        }
        if self.validator.allowed_mime_types.is_empty() {
            anyhow::bail!("ALLOWED_MIME_TYPES must not be empty");
        }
        if self.queue.max_workers == 0 {
            anyhow::bail!("QUEUE_MAX_WORKERS must be positive");
        }
        if self.validator.enable_malware_scan && !self.scanner.enabled {
            anyhow::bail!(
                "MALWARE_SCAN_ENABLED requires CLAMAV_ENABLED (or disable malware scanning)"
            );
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.server.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    /// Weight for a named queue from this configuration.
    pub fn queue_weight(&self, queue: crate::models::QueueName) -> u32 {
        match queue {
            crate::models::QueueName::Critical => self.queue.weight_critical,
            crate::models::QueueName::Default => self.queue.weight_default,
            crate::models::QueueName::Low => self.queue.weight_low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                port: 3000,
                environment: "test".to_string(),
                cors_origins: vec!["*".to_string()],
                max_concurrent_uploads: 32,
                ingest_timeout_secs: 60,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/picshelf_test".to_string(),
                max_connections: 5,
                timeout_seconds: 5,
            },
            storage: StorageConfig {
                backend: StorageBackend::Local,
                local_base_path: Some("/tmp/picshelf".to_string()),
                local_public_url: Some("http://localhost:3000/media".to_string()),
                s3_bucket: None,
                s3_region: None,
                s3_endpoint: None,
                s3_force_path_style: false,
                presigned_ttl_secs: 900,
            },
            validator: ValidatorConfig::default(),
            processor: ProcessorConfig::default(),
            queue: QueueConfig::default(),
            scanner: ScannerConfig {
                host: "localhost".to_string(),
                port: 3310,
                timeout_secs: 30,
                enabled: true,
            },
            reconcile: ReconcileConfig::default(),
        }
    }

    #[test]
    fn validator_defaults() {
        let v = ValidatorConfig::default();
        assert_eq!(v.max_file_size, 10 * 1024 * 1024);
        assert_eq!(v.max_width, 8192);
        assert_eq!(v.max_pixels, 100_000_000);
        assert_eq!(v.allowed_mime_types.len(), 4);
    }

    #[test]
    fn validate_local_requires_base_path() {
        let mut config = base_config();
        config.storage.local_base_path = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_s3_requires_bucket_and_region() {
        let mut config = base_config();
        config.storage.backend = StorageBackend::S3;
        assert!(config.validate().is_err());

        config.storage.s3_bucket = Some("pics".to_string());
        assert!(config.validate().is_err());

        config.storage.s3_region = Some("us-east-1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_scan_requires_scanner() {
        let mut config = base_config();
        config.scanner.enabled = false;
        assert!(config.validate().is_err());

        config.validator.enable_malware_scan = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn queue_weight_lookup() {
        let config = base_config();
        assert_eq!(config.queue_weight(crate::models::QueueName::Critical), 6);
        assert_eq!(config.queue_weight(crate::models::QueueName::Low), 1);
    }

    #[test]
    fn is_production_detection() {
        let mut config = base_config();
        assert!(!config.is_production());
        config.server.environment = "Production".to_string();
        assert!(config.is_production());
    }
}
