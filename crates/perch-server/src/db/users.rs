//! User repository.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::{Database, DbError};

/// Public view of a user account. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Internal row including credentials, for login verification only.
#[derive(Debug, FromRow)]
pub(crate) struct UserAuthRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl UserAuthRow {
    pub(crate) fn into_user(self) -> User {
        User {
            id: self.id,
            username: self.username,
            created_at: self.created_at,
        }
    }
}

/// CRUD operations over the `users` table.
#[derive(Debug, Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user with an already-hashed password.
    pub async fn create(&self, username: &str, password_hash: &str) -> Result<User, DbError> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(password_hash)
        .bind(user.created_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::UniqueViolation("Username")
            }
            _ => DbError::Sqlx(e),
        })?;

        Ok(user)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(user)
    }

    pub(crate) async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAuthRow>, DbError> {
        let row = sqlx::query_as::<_, UserAuthRow>(
            "SELECT id, username, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// The contact-list query: every user except the caller.
    pub async fn list_except(&self, id: &str) -> Result<Vec<User>, DbError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE id != ? ORDER BY username",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(users)
    }
}
