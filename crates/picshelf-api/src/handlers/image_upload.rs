//! Upload endpoint: multipart in, 202 out.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use picshelf_core::models::Visibility;
use picshelf_core::AppError;
use picshelf_processing::ValidationError;

use crate::auth::RequestUser;
use crate::dto::UploadAccepted;
use crate::error::{HttpAppError, ProblemDetails};
use crate::services::{IngestRequest, IngestService};
use crate::state::AppState;

/// Upload an image.
///
/// Accepts the upload after the synchronous gates pass; variant generation
/// and malware scanning run asynchronously. Poll `GET /images/{id}` for the
/// status transition away from `processing`.
#[utoipa::path(
    post,
    path = "/images",
    tag = "images",
    request_body(content_type = "multipart/form-data", content = inline(Object),
        description = "Fields: image (file, required), title, description, visibility, tags (comma-separated)"),
    responses(
        (status = 202, description = "Upload accepted, processing queued", body = UploadAccepted),
        (status = 400, description = "Validation failed", body = ProblemDetails),
        (status = 413, description = "File too large", body = ProblemDetails),
        (status = 503, description = "Too many concurrent uploads", body = ProblemDetails)
    )
)]
#[tracing::instrument(skip(state, multipart), fields(owner_id = %owner_id))]
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    RequestUser(owner_id): RequestUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    // Backpressure: bounded concurrent uploads per process. The permit is
    // held for the whole request.
    let _slot = state.upload_slots.clone().try_acquire_owned().map_err(|_| {
        HttpAppError::new(AppError::Unavailable(
            "Too many concurrent uploads, retry shortly".to_string(),
        ))
    })?;

    let request = extract_upload(&state, &mut multipart).await?;

    let service = IngestService::new(&state);
    let deadline = Duration::from_secs(state.config.server.ingest_timeout_secs);
    let image = tokio::time::timeout(deadline, service.ingest(owner_id, request))
        .await
        .map_err(|_| {
            HttpAppError::new(AppError::Unavailable(
                "Upload deadline exceeded".to_string(),
            ))
        })??;

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            id: image.id,
            status: image.status,
        }),
    ))
}

/// Pull the file and metadata fields out of the multipart form, reading the
/// file in chunks against a hard cap so an oversized body is rejected
/// without being buffered whole.
async fn extract_upload(
    state: &Arc<AppState>,
    multipart: &mut Multipart,
) -> Result<IngestRequest, HttpAppError> {
    let max_file_size = state.config.validator.max_file_size;

    let mut data: Option<Vec<u8>> = None;
    let mut original_filename: Option<String> = None;
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut visibility = Visibility::Public;
    let mut tags: Vec<String> = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        HttpAppError::new(AppError::InvalidInput(format!(
            "Failed to read multipart: {}",
            e
        )))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                original_filename = field.file_name().map(|s| s.to_string());

                let mut buffer = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(|e| {
                    HttpAppError::new(AppError::InvalidInput(format!(
                        "Failed to read file data: {}",
                        e
                    )))
                })? {
                    if buffer.len() + chunk.len() > max_file_size {
                        return Err(ValidationError::FileTooLarge {
                            size: buffer.len() + chunk.len(),
                            max: max_file_size,
                        }
                        .into());
                    }
                    buffer.extend_from_slice(&chunk);
                }
                data = Some(buffer);
            }
            "title" => {
                title = Some(read_text(field, "title").await?).filter(|s| !s.is_empty());
            }
            "description" => {
                description =
                    Some(read_text(field, "description").await?).filter(|s| !s.is_empty());
            }
            "visibility" => {
                let text = read_text(field, "visibility").await?;
                visibility = text.parse().map_err(|_| {
                    HttpAppError::new(AppError::InvalidInput(format!(
                        "Invalid visibility '{}': expected public, private, or unlisted",
                        text
                    )))
                })?;
            }
            "tags" => {
                let text = read_text(field, "tags").await?;
                tags = text
                    .split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| {
        HttpAppError::new(AppError::InvalidInput(
            "Missing 'image' file field".to_string(),
        ))
    })?;

    Ok(IngestRequest {
        data,
        original_filename: original_filename.unwrap_or_else(|| "unknown".to_string()),
        title,
        description,
        visibility,
        tags,
    })
}

async fn read_text(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<String, HttpAppError> {
    field.text().await.map_err(|e| {
        HttpAppError::new(AppError::InvalidInput(format!(
            "Failed to read '{}' field: {}",
            name, e
        )))
    })
}
