//! Route modules and shared extractors.

pub mod auth;
pub mod messages;
pub mod users;
pub mod websocket;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use super::AppState;
use crate::db::User;
use crate::error::ApiError;

/// Extractor for routes that require a valid bearer session.
///
/// Resolves the `Authorization: Bearer <token>` header to the owning user;
/// missing, unknown and expired tokens all reject with 401.
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::Unauthorized)?;

        let user = state.sessions.validate(bearer.token()).await?;
        Ok(AuthUser(user))
    }
}
