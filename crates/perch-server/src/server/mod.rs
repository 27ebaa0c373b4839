//! HTTP + WebSocket server assembly.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use perch_realtime::{ConnectionRegistry, MessageRouter, PresenceBroadcaster};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::SessionManager;
use crate::config::ServerConfig;
use crate::db::{Database, MessageRepository, UserRepository};

mod routes;

/// Shared application state.
///
/// The connection registry is constructed here, once, at startup and handed
/// around by reference; there is no global instance.
pub struct AppState {
    pub users: UserRepository,
    pub messages: MessageRepository,
    pub sessions: SessionManager,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: PresenceBroadcaster,
    pub router: MessageRouter,
}

impl AppState {
    pub fn new(db: Database, session_ttl_hours: i64) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(Arc::clone(&registry));
        let router = MessageRouter::new(Arc::clone(&registry));

        Self {
            users: UserRepository::new(db.clone()),
            messages: MessageRepository::new(db.clone()),
            sessions: SessionManager::new(db, session_ttl_hours),
            registry,
            presence,
            router,
        }
    }
}

/// Assemble the full application router.
pub fn build_router(state: Arc<AppState>, config: &ServerConfig) -> Result<Router> {
    let cors = match &config.cors_origin {
        Some(origin) => {
            let origin: HeaderValue = origin
                .parse()
                .with_context(|| format!("invalid CORS origin: {origin}"))?;
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
                .allow_credentials(true)
        }
        None => CorsLayer::permissive(),
    };

    Ok(Router::new()
        .route("/health", get(health))
        .route("/ws", get(routes::websocket::ws_handler))
        .nest(
            "/api/v1/user",
            routes::auth::router().merge(routes::users::router()),
        )
        .nest("/api/v1/message", routes::messages::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// Start the server and serve until shutdown.
pub async fn start(config: ServerConfig) -> Result<()> {
    let db = Database::connect(&config.db_path).await?;
    let state = Arc::new(AppState::new(db, config.session_ttl_hours));
    let app = build_router(state, &config)?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Perch server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
