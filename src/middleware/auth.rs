//! Actor identity extraction
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the gateway has resolved the caller and forwarded their
//! identifier in the `x-actor-id` header.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

/// Header carrying the already-authenticated actor identifier
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Authenticated actor (borrower, investor or staff) making the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Extractor for the acting identity
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(actor: Actor) -> impl IntoResponse {
///     format!("Hello, {}", actor.id())
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("{} header required", ACTOR_HEADER)))?;

        let actor_id = value
            .to_str()
            .map_err(|_| ApiError::Unauthorized(format!("{} header is not valid text", ACTOR_HEADER)))?
            .trim();

        if actor_id.is_empty() {
            return Err(ApiError::Unauthorized(format!(
                "{} header must not be empty",
                ACTOR_HEADER
            )));
        }

        Ok(Actor(actor_id.to_string()))
    }
}
