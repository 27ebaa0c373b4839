//! Contact-list routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;

use super::AuthUser;
use crate::db::User;
use crate::error::ApiError;
use crate::server::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/sidebar", get(sidebar))
}

/// GET /api/v1/user/sidebar
///
/// Every user except the caller, for the conversation sidebar. Presence is
/// not part of this payload; clients learn who is online from the
/// `getOnlineUsers` broadcast.
async fn sidebar(
    State(state): State<Arc<AppState>>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = state.users.list_except(&me.id).await?;
    Ok(Json(users))
}
