//! Paginated image listing.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use picshelf_core::models::{ImageStatus, Visibility};
use picshelf_core::AppError;
use picshelf_db::{ImageSearchParams, ImageSort, Pagination};

use crate::auth::MaybeUser;
use crate::dto::{ImageListResponse, ImageResponse};
use crate::error::{HttpAppError, ProblemDetails};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub owner: Option<Uuid>,
    pub tag: Option<String>,
    pub visibility: Option<String>,
    pub sort: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// List images.
///
/// Anonymous viewers (and viewers browsing someone else's images) see only
/// active, public images. Owners listing themselves may filter across their
/// own visibilities and statuses. Soft-deleted rows never appear.
#[utoipa::path(
    get,
    path = "/images",
    tag = "images",
    params(
        ("owner" = Option<Uuid>, Query, description = "Filter by owner"),
        ("tag" = Option<String>, Query, description = "Filter by tag"),
        ("visibility" = Option<String>, Query, description = "public | private | unlisted"),
        ("sort" = Option<String>, Query, description = "newest | oldest | most_viewed"),
        ("page" = Option<i64>, Query, description = "Page number, 1-based"),
        ("per_page" = Option<i64>, Query, description = "Page size, max 100")
    ),
    responses(
        (status = 200, description = "Image listing", body = ImageListResponse),
        (status = 400, description = "Invalid query", body = ProblemDetails)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn list_images(
    State(state): State<Arc<AppState>>,
    MaybeUser(viewer): MaybeUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ImageListResponse>, HttpAppError> {
    let sort: ImageSort = match query.sort.as_deref() {
        None => ImageSort::default(),
        Some(s) => s.parse().map_err(|_| {
            HttpAppError::new(AppError::InvalidInput(format!(
                "Invalid sort '{}': expected newest, oldest, or most_viewed",
                s
            )))
        })?,
    };

    let requested_visibility: Option<Visibility> = match query.visibility.as_deref() {
        None => None,
        Some(v) => Some(v.parse().map_err(|_| {
            HttpAppError::new(AppError::InvalidInput(format!(
                "Invalid visibility '{}'",
                v
            )))
        })?),
    };

    let page = Pagination::new(query.page.unwrap_or(1), query.per_page.unwrap_or(20));

    // Listing one's own images allows private/processing rows; everything
    // else is restricted to active, public images.
    let listing_self = viewer.is_some() && query.owner == viewer;
    let params = if listing_self {
        ImageSearchParams {
            owner: query.owner,
            tag: query.tag.clone(),
            visibility: requested_visibility,
            status: None,
            sort,
            page,
        }
    } else {
        ImageSearchParams {
            owner: query.owner,
            tag: query.tag.clone(),
            visibility: Some(Visibility::Public),
            status: Some(ImageStatus::Active),
            sort,
            page,
        }
    };

    let images = state
        .image_repository
        .search(params)
        .await
        .map_err(HttpAppError::from)?;

    let mut items = Vec::with_capacity(images.len());
    for image in &images {
        let tags = state
            .image_repository
            .find_tags(image.id)
            .await
            .map_err(HttpAppError::from)?;
        let variants = state
            .image_repository
            .find_variants(image.id)
            .await
            .map_err(HttpAppError::from)?;
        items.push(ImageResponse::from_image(image, tags, &variants));
    }

    Ok(Json(ImageListResponse {
        items,
        page: query.page.unwrap_or(1).max(1),
        per_page: page.limit(),
    }))
}
