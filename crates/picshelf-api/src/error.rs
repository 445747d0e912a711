//! HTTP error response conversion
//!
//! Errors render as RFC 7807 `application/problem+json` bodies with a
//! `traceId` that correlates with logs. Detail text is redacted for
//! sensitive errors so internal messages never leak to callers.
//!
//! **Preferred handler pattern:** return `Result<impl IntoResponse,
//! HttpAppError>` and `.map_err(Into::into)` domain errors into it.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use picshelf_core::models::image::DomainError;
use picshelf_core::{AppError, ErrorMetadata, LogLevel};
use picshelf_processing::{ProcessError, ValidationError};
use picshelf_storage::StorageError;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// RFC 7807 problem document.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProblemDetails {
    /// Problem type as a stable slug (e.g. "file_too_large")
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(rename = "traceId")]
    pub trace_id: String,
}

/// Wrapper type for AppError to implement IntoResponse, with optional
/// overrides so validation and processing failures keep their specific
/// problem types instead of collapsing into "invalid_input".
#[derive(Debug)]
pub struct HttpAppError {
    pub error: AppError,
    code: Option<&'static str>,
    title: Option<&'static str>,
}

impl HttpAppError {
    pub fn new(error: AppError) -> Self {
        Self {
            error,
            code: None,
            title: None,
        }
    }

    fn with_problem(error: AppError, code: &'static str, title: &'static str) -> Self {
        Self {
            error,
            code: Some(code),
            title: Some(title),
        }
    }
}

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError::new(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        // Keep conflicts (optimistic concurrency, duplicate keys) visible as
        // 409 instead of burying them in a 500.
        match err.downcast::<AppError>() {
            Ok(app) => HttpAppError::new(app),
            Err(err) => HttpAppError::new(AppError::InternalWithSource {
                message: err.to_string(),
                source: err,
            }),
        }
    }
}

impl From<DomainError> for HttpAppError {
    fn from(err: DomainError) -> Self {
        HttpAppError::new(err.into())
    }
}

impl From<StorageError> for HttpAppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => HttpAppError::new(AppError::NotFound(msg)),
            StorageError::InvalidKey(msg) => HttpAppError::with_problem(
                AppError::InvalidInput(msg),
                "invalid_key",
                "Invalid Storage Key",
            ),
            StorageError::SizeMismatch { declared, actual } => {
                HttpAppError::new(AppError::Storage(format!(
                    "declared {} bytes, received {}",
                    declared, actual
                )))
            }
            StorageError::AccessDenied(msg) => HttpAppError::new(AppError::Storage(msg)),
            StorageError::NotSupported(msg) => HttpAppError::new(AppError::Storage(msg)),
            StorageError::UploadFailed(msg)
            | StorageError::DownloadFailed(msg)
            | StorageError::DeleteFailed(msg)
            | StorageError::BackendError(msg)
            | StorageError::ConfigError(msg) => HttpAppError::new(AppError::Storage(msg)),
            StorageError::IoError(e) => {
                HttpAppError::new(AppError::Storage(format!("IO error: {}", e)))
            }
        }
    }
}

impl From<ValidationError> for HttpAppError {
    fn from(err: ValidationError) -> Self {
        let detail = err.to_string();
        match err {
            ValidationError::EmptyFile => HttpAppError::new(AppError::InvalidInput(detail)),
            ValidationError::FileTooLarge { .. } => {
                HttpAppError::new(AppError::PayloadTooLarge(detail))
            }
            ValidationError::InvalidMimeType(_) => HttpAppError::with_problem(
                AppError::InvalidInput(detail),
                "invalid_mime_type",
                "Invalid MIME Type",
            ),
            ValidationError::InvalidDimensions { .. } => HttpAppError::with_problem(
                AppError::InvalidInput(detail),
                "invalid_dimensions",
                "Invalid Dimensions",
            ),
            ValidationError::ImageTooLarge { .. } => HttpAppError::with_problem(
                AppError::InvalidInput(detail),
                "image_too_large",
                "Image Too Large",
            ),
            ValidationError::TooManyPixels { .. } => HttpAppError::with_problem(
                AppError::InvalidInput(detail),
                "image_too_many_pixels",
                "Image Has Too Many Pixels",
            ),
        }
    }
}

impl From<ProcessError> for HttpAppError {
    fn from(err: ProcessError) -> Self {
        let detail = err.to_string();
        match err {
            ProcessError::UnsupportedFormat(_) => HttpAppError::with_problem(
                AppError::InvalidInput(detail),
                "unsupported_format",
                "Unsupported Image Format",
            ),
            ProcessError::ImageTooSmall { .. } => HttpAppError::with_problem(
                AppError::InvalidInput(detail),
                "image_too_small",
                "Image Too Small",
            ),
            ProcessError::ProcessingFailed(_) => {
                HttpAppError::new(AppError::Processing(detail))
            }
        }
    }
}

fn log_error(error: &AppError, trace_id: &str) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type, trace_id, "Request error");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type, trace_id, "Request error");
        }
        LogLevel::Error => {
            tracing::error!(
                error = %error.detailed_message(),
                error_type,
                trace_id,
                "Request error"
            );
        }
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let trace_id = Uuid::new_v4().to_string();
        let app_error = &self.error;

        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error, &trace_id);

        // Sensitive errors never expose internal text.
        let detail = app_error.client_message();

        let body = ProblemDetails {
            problem_type: self.code.unwrap_or(app_error.error_code()).to_string(),
            title: self.title.unwrap_or(app_error.title()).to_string(),
            status: status.as_u16(),
            detail,
            trace_id,
        };

        let mut response = (status, Json(body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_CONTENT_TYPE),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_maps_to_404() {
        let HttpAppError { error, .. } =
            StorageError::NotFound("missing.jpg".to_string()).into();
        assert!(matches!(error, AppError::NotFound(_)));
        assert_eq!(error.http_status_code(), 404);
    }

    #[test]
    fn invalid_key_keeps_specific_problem_type() {
        let err: HttpAppError = StorageError::InvalidKey("leading slash".to_string()).into();
        assert_eq!(err.code, Some("invalid_key"));
        assert_eq!(err.error.http_status_code(), 400);
    }

    #[test]
    fn validation_errors_keep_specific_problem_types() {
        let err: HttpAppError = ValidationError::FileTooLarge {
            size: 11,
            max: 10,
        }
        .into();
        assert!(matches!(err.error, AppError::PayloadTooLarge(_)));
        assert_eq!(err.error.http_status_code(), 413);
        assert_eq!(err.error.error_code(), "file_too_large");

        let err: HttpAppError = ValidationError::TooManyPixels {
            pixels: 100_010_000,
            max: 100_000_000,
        }
        .into();
        assert_eq!(err.code, Some("image_too_many_pixels"));

        let err: HttpAppError =
            ValidationError::InvalidMimeType("application/pdf".to_string()).into();
        assert_eq!(err.code, Some("invalid_mime_type"));
    }

    #[test]
    fn process_errors_map() {
        let err: HttpAppError = ProcessError::UnsupportedFormat("bmp".to_string()).into();
        assert_eq!(err.code, Some("unsupported_format"));
        assert_eq!(err.error.http_status_code(), 400);
    }

    #[test]
    fn anyhow_conflict_surfaces_as_409() {
        let source: anyhow::Error = AppError::Conflict("concurrent update".to_string()).into();
        let err: HttpAppError = source.into();
        assert_eq!(err.error.http_status_code(), 409);
    }

    #[test]
    fn problem_details_shape() {
        let problem = ProblemDetails {
            problem_type: "not_found".to_string(),
            title: "Not Found".to_string(),
            status: 404,
            detail: "Image not found".to_string(),
            trace_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["type"], "not_found");
        assert_eq!(json["status"], 404);
        assert!(json.get("traceId").is_some());
        assert!(json.get("trace_id").is_none());
    }
}
