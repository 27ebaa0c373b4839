//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PERCH_BIND_ADDR`: HTTP bind address. Default: `0.0.0.0:7000`
//! - `PERCH_DB_PATH`: sqlite database path. Default: `perch.db`
//! - `PERCH_CORS_ORIGIN`: allowed browser origin. Default: any origin
//! - `PERCH_SESSION_TTL_HOURS`: bearer session lifetime. Default: `168`

use std::net::SocketAddr;

use tracing::info;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP + WebSocket listener
    pub bind_addr: SocketAddr,
    /// Path to the sqlite database file
    pub db_path: String,
    /// Exact browser origin allowed by CORS; None means any origin
    pub cors_origin: Option<String>,
    /// Session lifetime in hours
    pub session_ttl_hours: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7000".parse().expect("Valid default address"),
            db_path: "perch.db".to_string(),
            cors_origin: None,
            session_ttl_hours: 168,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = std::env::var("PERCH_BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.bind_addr);

        let db_path = std::env::var("PERCH_DB_PATH").unwrap_or(defaults.db_path);

        let cors_origin = std::env::var("PERCH_CORS_ORIGIN")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let session_ttl_hours = std::env::var("PERCH_SESSION_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.session_ttl_hours);

        let config = Self {
            bind_addr,
            db_path,
            cors_origin,
            session_ttl_hours,
        };

        info!(
            bind_addr = %config.bind_addr,
            db_path = %config.db_path,
            "Loaded server configuration"
        );

        config
    }
}
