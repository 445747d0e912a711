//! Error types module
//!
//! Core error types used throughout the application. All errors surfaced to
//! the HTTP layer are unified under [`AppError`]; the [`ErrorMetadata`] trait
//! lets each variant self-describe its response characteristics (status code,
//! problem type, recoverability, redaction).

use std::io;

use crate::models::image::DomainError;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code, used as the problem-type slug
    /// (e.g. "file_too_large")
    fn error_code(&self) -> &'static str;

    /// Short human-readable title for the problem type
    fn title(&self) -> &'static str;

    /// Whether this error is transient (the caller may retry)
    fn is_recoverable(&self) -> bool;

    /// Client-facing detail (may differ from the internal error message)
    fn client_message(&self) -> String;

    /// Whether internal details must be hidden from responses
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Image processing error: {0}")]
    Processing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Malware detected: {0}")]
    MalwareDetected(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidMetadata(msg) => AppError::InvalidInput(msg),
            other => AppError::Conflict(other.to_string()),
        }
    }
}

impl AppError {
    /// Get the error type name for log correlation
    pub fn error_type(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::Processing(_) => "Processing",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::NotFound(_) => "NotFound",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Conflict(_) => "Conflict",
            AppError::MalwareDetected(_) => "MalwareDetected",
            AppError::Unavailable(_) => "Unavailable",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including the source chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => 500,
            AppError::Storage(_) => 500,
            AppError::Processing(_) => 400,
            AppError::InvalidInput(_) => 400,
            AppError::PayloadTooLarge(_) => 413,
            AppError::NotFound(_) => 404,
            AppError::Forbidden(_) => 403,
            AppError::Conflict(_) => 409,
            AppError::MalwareDetected(_) => 400,
            AppError::Unavailable(_) => 503,
            AppError::Internal(_) => 500,
            AppError::InternalWithSource { .. } => 500,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => "database_error",
            AppError::Storage(_) => "storage_error",
            AppError::Processing(_) => "processing_failed",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::PayloadTooLarge(_) => "file_too_large",
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::MalwareDetected(_) => "malware_detected",
            AppError::Unavailable(_) => "service_unavailable",
            AppError::Internal(_) => "internal_error",
            AppError::InternalWithSource { .. } => "internal_error",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => "Database Error",
            AppError::Storage(_) => "Storage Error",
            AppError::Processing(_) => "Image Processing Failed",
            AppError::InvalidInput(_) => "Invalid Input",
            AppError::PayloadTooLarge(_) => "File Too Large",
            AppError::NotFound(_) => "Not Found",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Conflict(_) => "Conflict",
            AppError::MalwareDetected(_) => "Malware Detected",
            AppError::Unavailable(_) => "Service Unavailable",
            AppError::Internal(_) => "Internal Error",
            AppError::InternalWithSource { .. } => "Internal Error",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => true,
            AppError::Storage(_) => true,
            AppError::Processing(_) => false,
            AppError::InvalidInput(_) => false,
            AppError::PayloadTooLarge(_) => false,
            AppError::NotFound(_) => false,
            AppError::Forbidden(_) => false,
            AppError::Conflict(_) => true,
            AppError::MalwareDetected(_) => false,
            AppError::Unavailable(_) => true,
            AppError::Internal(_) => true,
            AppError::InternalWithSource { .. } => true,
        }
    }

    fn client_message(&self) -> String {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::Processing(ref msg) => msg.clone(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::PayloadTooLarge(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Forbidden(ref msg) => msg.clone(),
            AppError::Conflict(ref msg) => msg.clone(),
            AppError::MalwareDetected(_) => "File rejected: malware detected".to_string(),
            AppError::Unavailable(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }

    fn is_sensitive(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => true,
            AppError::Storage(_) => true,
            AppError::Internal(_) => true,
            AppError::InternalWithSource { .. } => true,
            _ => false,
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => LogLevel::Error,
            AppError::Storage(_) => LogLevel::Error,
            AppError::Processing(_) => LogLevel::Warn,
            AppError::InvalidInput(_) => LogLevel::Debug,
            AppError::PayloadTooLarge(_) => LogLevel::Debug,
            AppError::NotFound(_) => LogLevel::Debug,
            AppError::Forbidden(_) => LogLevel::Debug,
            AppError::Conflict(_) => LogLevel::Warn,
            AppError::MalwareDetected(_) => LogLevel::Warn,
            AppError::Unavailable(_) => LogLevel::Warn,
            AppError::Internal(_) => LogLevel::Error,
            AppError::InternalWithSource { .. } => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_not_found() {
        let err = AppError::NotFound("Image not found".to_string());
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), "not_found");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "Image not found");
        assert!(!err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_payload_too_large() {
        let err = AppError::PayloadTooLarge("11534337 bytes exceeds max 10485760".to_string());
        assert_eq!(err.http_status_code(), 413);
        assert_eq!(err.error_code(), "file_too_large");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_metadata_malware_redacted() {
        let err = AppError::MalwareDetected("Eicar-Signature".to_string());
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), "malware_detected");
        // The signature name stays in logs, not in the client message.
        assert!(!err.client_message().contains("Eicar"));
    }

    #[cfg(feature = "sqlx")]
    #[test]
    fn test_error_metadata_database_sensitive() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.http_status_code(), 500);
        assert!(err.is_sensitive());
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_domain_error_conversion() {
        let err: AppError = DomainError::InvalidMetadata("file size must be positive".into()).into();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let err: AppError = DomainError::Infected.into();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
