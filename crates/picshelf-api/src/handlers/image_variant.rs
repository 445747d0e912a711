//! Variant delivery endpoint: streams encoded bytes from the object store.
//!
//! Only variant types are addressable; the pristine `upload` blob has no
//! route and is never served.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
};
use futures::TryStreamExt;
use picshelf_core::models::VariantType;
use picshelf_core::AppError;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::MaybeUser;
use crate::error::{HttpAppError, ProblemDetails};
use crate::handlers::authorize_view;
use crate::state::AppState;
use picshelf_storage::StorageError;

#[derive(Debug, Deserialize)]
pub struct VariantQuery {
    /// Redirect to a time-limited direct URL instead of proxying bytes.
    /// Falls back to proxying on backends that cannot sign URLs.
    #[serde(default)]
    pub redirect: bool,
}

/// Stream a variant's bytes (or redirect to a presigned URL).
#[utoipa::path(
    get,
    path = "/images/{id}/variants/{size}",
    tag = "images",
    params(
        ("id" = Uuid, Path, description = "Image id"),
        ("size" = String, Path, description = "thumbnail | small | medium | large | original"),
        ("redirect" = Option<bool>, Query, description = "Redirect to a presigned URL when the backend supports it")
    ),
    responses(
        (status = 200, description = "Variant bytes with the stored content type"),
        (status = 307, description = "Redirect to a presigned URL"),
        (status = 404, description = "Image or variant not found", body = ProblemDetails)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_variant(
    State(state): State<Arc<AppState>>,
    MaybeUser(viewer): MaybeUser,
    Path((id, size)): Path<(Uuid, String)>,
    Query(query): Query<VariantQuery>,
) -> Result<Response, HttpAppError> {
    let variant_type: VariantType = size.parse().map_err(|_| {
        HttpAppError::new(AppError::InvalidInput(format!(
            "Unknown variant '{}': expected thumbnail, small, medium, large, or original",
            size
        )))
    })?;

    let image = state
        .image_repository
        .find_by_id(id)
        .await
        .map_err(HttpAppError::from)?
        .ok_or_else(|| HttpAppError::new(AppError::NotFound("Image not found".to_string())))?;

    authorize_view(&image, viewer)?;

    let variant = state
        .image_repository
        .find_variant(id, variant_type)
        .await
        .map_err(HttpAppError::from)?
        .ok_or_else(|| {
            HttpAppError::new(AppError::NotFound(format!(
                "Variant '{}' not found",
                variant_type
            )))
        })?;

    if query.redirect {
        let ttl = Duration::from_secs(state.config.storage.presigned_ttl_secs);
        match state
            .object_store
            .presigned_url(&variant.storage_key, ttl)
            .await
        {
            Ok(url) => {
                let response = Response::builder()
                    .status(StatusCode::TEMPORARY_REDIRECT)
                    .header(header::LOCATION, url)
                    .body(Body::empty())
                    .map_err(|e| HttpAppError::new(AppError::Internal(e.to_string())))?;
                return Ok(response);
            }
            // Backend cannot sign; proxy the bytes instead.
            Err(StorageError::NotSupported(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let stream = state.object_store.get(&variant.storage_key).await?;
    let body = Body::from_stream(stream.map_err(std::io::Error::other));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, variant.format.mime_type())
        .header(header::CONTENT_LENGTH, variant.file_size)
        .header(header::CACHE_CONTROL, "public, max-age=31536000, immutable")
        .body(body)
        .map_err(|e| HttpAppError::new(AppError::Internal(e.to_string())))?;

    Ok(response)
}
