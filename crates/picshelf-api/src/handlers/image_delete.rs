//! Soft-delete endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use picshelf_core::AppError;
use uuid::Uuid;

use crate::auth::RequestUser;
use crate::error::{HttpAppError, ProblemDetails};
use crate::state::AppState;
use crate::task_handlers::enqueue_cleanup;

/// Soft-delete an image.
///
/// The row is marked deleted immediately; a cleanup job removes all stored
/// blobs and eventually hard-deletes the row after the grace period.
#[utoipa::path(
    delete,
    path = "/images/{id}",
    tag = "images",
    params(("id" = Uuid, Path, description = "Image id")),
    responses(
        (status = 204, description = "Image deleted"),
        (status = 403, description = "Not the owner", body = ProblemDetails),
        (status = 404, description = "Image not found", body = ProblemDetails)
    )
)]
#[tracing::instrument(skip(state), fields(user_id = %user_id))]
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    RequestUser(user_id): RequestUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HttpAppError> {
    let mut image = state
        .image_repository
        .find_by_id(id)
        .await
        .map_err(HttpAppError::from)?
        .ok_or_else(|| HttpAppError::new(AppError::NotFound("Image not found".to_string())))?;

    if image.owner_id != user_id {
        return Err(HttpAppError::new(AppError::Forbidden(
            "Only the owner can delete an image".to_string(),
        )));
    }

    image.soft_delete()?;
    state
        .image_repository
        .update(&mut image)
        .await
        .map_err(HttpAppError::from)?;

    enqueue_cleanup(&state, &image).await;

    tracing::info!(image_id = %id, "Image soft-deleted, cleanup scheduled");
    Ok(StatusCode::NO_CONTENT)
}
