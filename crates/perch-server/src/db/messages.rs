//! Message repository.
//!
//! Messages are immutable once persisted; persistence is the authoritative
//! step of the send flow, with live routing strictly after and best-effort.

use chrono::{DateTime, Utc};
use perch_realtime::{Message, UserId};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Database, DbError};

/// Input for persisting a new message. The route layer has already validated
/// that at least one of `text` / `attachments` is non-empty.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub attachments: Vec<String>,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    sender_id: String,
    receiver_id: String,
    text: Option<String>,
    attachments: String,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, DbError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| DbError::CorruptRow(format!("message id {}: {e}", self.id)))?;
        let attachments: Vec<String> = serde_json::from_str(&self.attachments)
            .map_err(|e| DbError::CorruptRow(format!("attachments for {}: {e}", self.id)))?;

        Ok(Message {
            id,
            sender_id: UserId::new(self.sender_id),
            receiver_id: UserId::new(self.receiver_id),
            text: self.text,
            attachments,
            created_at: self.created_at,
        })
    }
}

/// Operations over the `messages` table.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    db: Database,
}

impl MessageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a message and return it in its routed/wire form.
    pub async fn create(&self, new: NewMessage) -> Result<Message, DbError> {
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: UserId::new(new.sender_id),
            receiver_id: UserId::new(new.receiver_id),
            text: new.text,
            attachments: new.attachments,
            created_at: Utc::now(),
        };

        let attachments_json = serde_json::to_string(&message.attachments)
            .map_err(|e| DbError::CorruptRow(format!("attachments encode: {e}")))?;

        sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_id, text, attachments, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.sender_id.as_str())
        .bind(message.receiver_id.as_str())
        .bind(&message.text)
        .bind(attachments_json)
        .bind(message.created_at)
        .execute(self.db.pool())
        .await?;

        Ok(message)
    }

    /// Full conversation between two users, oldest first.
    pub async fn find_between(&self, a: &str, b: &str) -> Result<Vec<Message>, DbError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, sender_id, receiver_id, text, attachments, created_at
             FROM messages
             WHERE (sender_id = ? AND receiver_id = ?)
                OR (sender_id = ? AND receiver_id = ?)
             ORDER BY created_at ASC, id ASC",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }
}
