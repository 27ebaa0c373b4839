//! Bearer session management.
//!
//! Sessions are opaque random tokens stored server-side with an expiry.
//! Validation resolves a token to the owning user in one query.

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use sqlx::FromRow;
use tracing::debug;

use super::AuthError;
use crate::db::{Database, DbError, User};

/// Length of generated session tokens.
const TOKEN_LEN: usize = 48;

/// An issued session.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[derive(Debug, FromRow)]
struct SessionUserRow {
    expires_at: DateTime<Utc>,
    id: String,
    username: String,
    created_at: DateTime<Utc>,
}

/// Issues, validates and revokes bearer sessions.
#[derive(Debug, Clone)]
pub struct SessionManager {
    db: Database,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(db: Database, ttl_hours: i64) -> Self {
        Self {
            db,
            ttl: Duration::hours(ttl_hours),
        }
    }

    fn generate_token() -> String {
        rand::rng()
            .sample_iter(Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect()
    }

    /// Issue a new session for a user.
    pub async fn create(&self, user_id: &str) -> Result<Session, AuthError> {
        let now = Utc::now();
        let session = Session {
            token: Self::generate_token(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(self.db.pool())
        .await
        .map_err(DbError::from)?;

        debug!(user_id, "Issued session");
        Ok(session)
    }

    /// Resolve a bearer token to its user, rejecting unknown and expired
    /// tokens. Expired sessions are deleted on sight.
    pub async fn validate(&self, token: &str) -> Result<User, AuthError> {
        let row = sqlx::query_as::<_, SessionUserRow>(
            "SELECT s.expires_at, u.id, u.username, u.created_at
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?",
        )
        .bind(token)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::from)?
        .ok_or(AuthError::SessionNotFound)?;

        if Utc::now() >= row.expires_at {
            self.revoke(token).await?;
            return Err(AuthError::SessionExpired);
        }

        Ok(User {
            id: row.id,
            username: row.username,
            created_at: row.created_at,
        })
    }

    /// Delete a session. Revoking an unknown token is a quiet no-op.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(self.db.pool())
            .await
            .map_err(DbError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRepository;

    async fn setup() -> (SessionManager, String) {
        let db = Database::in_memory().await.unwrap();
        let users = UserRepository::new(db.clone());
        let alice = users.create("alice", "h").await.unwrap();
        (SessionManager::new(db, 1), alice.id)
    }

    #[tokio::test]
    async fn create_and_validate() {
        let (sessions, alice) = setup().await;

        let session = sessions.create(&alice).await.unwrap();
        assert!(!session.is_expired());

        let user = sessions.validate(&session.token).await.unwrap();
        assert_eq!(user.id, alice);
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let (sessions, _alice) = setup().await;
        let err = sessions.validate("no-such-token").await.unwrap_err();
        assert!(matches!(err, AuthError::SessionNotFound));
    }

    #[tokio::test]
    async fn expired_session_is_rejected_and_removed() {
        let db = Database::in_memory().await.unwrap();
        let users = UserRepository::new(db.clone());
        let alice = users.create("alice", "h").await.unwrap();

        // Zero TTL: expired the moment it is issued.
        let sessions = SessionManager::new(db, 0);
        let session = sessions.create(&alice.id).await.unwrap();

        let err = sessions.validate(&session.token).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));

        // Gone now, not just expired.
        let err = sessions.validate(&session.token).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionNotFound));
    }

    #[tokio::test]
    async fn revoke_invalidates_token() {
        let (sessions, alice) = setup().await;

        let session = sessions.create(&alice).await.unwrap();
        sessions.revoke(&session.token).await.unwrap();

        let err = sessions.validate(&session.token).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionNotFound));

        // Idempotent.
        sessions.revoke(&session.token).await.unwrap();
    }
}
