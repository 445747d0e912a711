use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::api_doc::ApiDoc;
use crate::handlers::{
    health, image_delete, image_get, image_list, image_update, image_upload, image_variant,
};
use crate::state::AppState;

/// Slack on top of the max file size for multipart framing and metadata
/// fields.
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.validator.max_file_size + BODY_LIMIT_SLACK;
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route(
            "/images",
            post(image_upload::upload_image).get(image_list::list_images),
        )
        .route(
            "/images/{id}",
            get(image_get::get_image)
                .patch(image_update::update_image)
                .delete(image_delete::delete_image),
        )
        .route(
            "/images/{id}/variants/{size}",
            get(image_variant::get_variant),
        )
        .route("/healthz", get(health::healthz))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
