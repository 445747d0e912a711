pub mod health;
pub mod image_delete;
pub mod image_get;
pub mod image_list;
pub mod image_update;
pub mod image_upload;
pub mod image_variant;

use picshelf_core::models::{Image, Visibility};
use picshelf_core::AppError;
use uuid::Uuid;

use crate::error::HttpAppError;

/// Visibility check shared by the read endpoints: public and unlisted are
/// readable by anyone (unlisted requires knowing the id, which the caller
/// evidently does); private is owner-only.
pub(crate) fn authorize_view(image: &Image, viewer: Option<Uuid>) -> Result<(), HttpAppError> {
    match image.visibility {
        Visibility::Public | Visibility::Unlisted => Ok(()),
        Visibility::Private => {
            if viewer == Some(image.owner_id) {
                Ok(())
            } else {
                Err(HttpAppError::new(AppError::Forbidden(
                    "You do not have access to this image".to_string(),
                )))
            }
        }
    }
}
