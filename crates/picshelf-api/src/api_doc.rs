//! OpenAPI document for the image API.

use utoipa::OpenApi;

use picshelf_core::models::{ImageFormat, ImageStatus, ScanStatus, VariantType, Visibility};

use crate::dto::{ImageListResponse, ImageResponse, UploadAccepted, VariantResponse};
use crate::error::ProblemDetails;
use crate::handlers::image_update::UpdateImageRequest;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "picshelf API",
        description = "Image hosting backend: validated uploads, asynchronous variant generation and malware scanning, and variant delivery."
    ),
    paths(
        crate::handlers::image_upload::upload_image,
        crate::handlers::image_list::list_images,
        crate::handlers::image_get::get_image,
        crate::handlers::image_update::update_image,
        crate::handlers::image_delete::delete_image,
        crate::handlers::image_variant::get_variant,
    ),
    components(schemas(
        UploadAccepted,
        UpdateImageRequest,
        ImageResponse,
        ImageListResponse,
        VariantResponse,
        ProblemDetails,
        ImageStatus,
        Visibility,
        ScanStatus,
        VariantType,
        ImageFormat,
    )),
    tags((name = "images", description = "Image upload, metadata, and delivery"))
)]
pub struct ApiDoc;
