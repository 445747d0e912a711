//! Image metadata endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use picshelf_core::models::{ImageStatus, Visibility};
use picshelf_core::AppError;
use uuid::Uuid;

use crate::auth::MaybeUser;
use crate::dto::ImageResponse;
use crate::error::{HttpAppError, ProblemDetails};
use crate::handlers::authorize_view;
use crate::state::AppState;

/// Fetch image metadata.
#[utoipa::path(
    get,
    path = "/images/{id}",
    tag = "images",
    params(("id" = Uuid, Path, description = "Image id")),
    responses(
        (status = 200, description = "Image metadata", body = ImageResponse),
        (status = 403, description = "Not visible to this viewer", body = ProblemDetails),
        (status = 404, description = "Image not found", body = ProblemDetails)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ImageResponse>, HttpAppError> {
    let image = state
        .image_repository
        .find_by_id(id)
        .await
        .map_err(HttpAppError::from)?
        .ok_or_else(|| HttpAppError::new(AppError::NotFound("Image not found".to_string())))?;

    authorize_view(&image, viewer)?;

    // View counting is best-effort and never fails the read. Private images
    // are not counted.
    if image.status == ImageStatus::Active && image.visibility != Visibility::Private {
        if let Err(e) = state.image_repository.increment_view_count(id).await {
            tracing::warn!(error = %e, image_id = %id, "Failed to increment view count");
        }
    }

    let tags = state
        .image_repository
        .find_tags(id)
        .await
        .map_err(HttpAppError::from)?;
    let variants = state
        .image_repository
        .find_variants(id)
        .await
        .map_err(HttpAppError::from)?;

    Ok(Json(ImageResponse::from_image(&image, tags, &variants)))
}
