//! Signup, login and logout.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::AuthUser;
use crate::auth::{hash_password, verify_password, AuthError};
use crate::db::User;
use crate::error::ApiError;
use crate::server::AppState;

/// Minimum password length accepted at signup.
const MIN_PASSWORD_LEN: usize = 6;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", get(logout))
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// POST /api/v1/user/signup
async fn signup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let username = body.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password_hash = hash_password(&body.password)?;
    let user = state.users.create(username, &password_hash).await?;

    info!(user_id = %user.id, username = %user.username, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/v1/user/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let row = state
        .users
        .find_by_username(body.username.trim())
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if !verify_password(&body.password, &row.password_hash) {
        return Err(AuthError::InvalidCredentials.into());
    }

    let user = row.into_user();
    let session = state.sessions.create(&user.id).await?;

    info!(user_id = %user.id, "User logged in");
    Ok(Json(LoginResponse {
        token: session.token,
        user,
    }))
}

/// GET /api/v1/user/logout
///
/// Revokes the presented session; an unknown or expired token rejects with
/// 401 like any other protected route. The WebSocket side of a logout is the
/// client's own `userDisconnected` event; this only invalidates the token.
async fn logout(
    State(state): State<Arc<AppState>>,
    AuthUser(me): AuthUser,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.sessions.revoke(bearer.token()).await?;
    info!(user_id = %me.id, "User logged out");
    Ok(Json(json!({ "message": "Logged out" })))
}
