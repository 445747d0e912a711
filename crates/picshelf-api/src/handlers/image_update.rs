//! Image metadata update endpoint (visibility).

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use picshelf_core::models::Visibility;
use picshelf_core::AppError;

use crate::auth::RequestUser;
use crate::dto::ImageResponse;
use crate::error::{HttpAppError, ProblemDetails};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateImageRequest {
    pub visibility: Visibility,
}

/// Change an image's visibility. Owner-only; allowed while the image is
/// processing or active.
#[utoipa::path(
    patch,
    path = "/images/{id}",
    tag = "images",
    params(("id" = Uuid, Path, description = "Image id")),
    request_body = UpdateImageRequest,
    responses(
        (status = 200, description = "Updated image metadata", body = ImageResponse),
        (status = 403, description = "Not the owner", body = ProblemDetails),
        (status = 404, description = "Image not found", body = ProblemDetails),
        (status = 409, description = "Image is in a terminal state", body = ProblemDetails)
    )
)]
#[tracing::instrument(skip(state, request), fields(user_id = %user_id))]
pub async fn update_image(
    State(state): State<Arc<AppState>>,
    RequestUser(user_id): RequestUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateImageRequest>,
) -> Result<Json<ImageResponse>, HttpAppError> {
    let mut image = state
        .image_repository
        .find_by_id(id)
        .await
        .map_err(HttpAppError::from)?
        .ok_or_else(|| HttpAppError::new(AppError::NotFound("Image not found".to_string())))?;

    if image.owner_id != user_id {
        return Err(HttpAppError::new(AppError::Forbidden(
            "Only the owner can update an image".to_string(),
        )));
    }

    image.update_visibility(request.visibility)?;
    state
        .image_repository
        .update(&mut image)
        .await
        .map_err(HttpAppError::from)?;

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
