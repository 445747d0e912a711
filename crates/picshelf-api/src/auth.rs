//! Caller identity extraction.
//!
//! Authentication itself is handled upstream (gateway/middleware, outside
//! this service); the authenticated user id arrives in the
//! `X-Picshelf-User` header. These extractors only bind that contract.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use picshelf_core::AppError;
use uuid::Uuid;

use crate::error::HttpAppError;

pub const USER_HEADER: &str = "x-picshelf-user";

/// Required caller identity. Rejects the request when the header is missing
/// or malformed.
#[derive(Debug, Clone, Copy)]
pub struct RequestUser(pub Uuid);

impl<S> FromRequestParts<S> for RequestUser
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match extract_user(parts) {
            Some(user_id) => Ok(RequestUser(user_id)),
            None => Err(HttpAppError::new(AppError::Forbidden(
                "Caller identity required".to_string(),
            ))),
        }
    }
}

/// Optional caller identity, for endpoints anonymous viewers may hit.
#[derive(Debug, Clone, Copy)]
pub struct MaybeUser(pub Option<Uuid>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(extract_user(parts)))
    }
}

fn extract_user(parts: &Parts) -> Option<Uuid> {
    parts
        .headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
}
