//! Wire events exchanged with clients over the WebSocket.
//!
//! Frames are JSON objects tagged with `event` and carrying an optional
//! `data` payload, e.g. `{"event":"userConnected","data":{"userId":"..."}}`.
//! The event names are a stable wire contract shared with the web client.

use serde::{Deserialize, Serialize};

use crate::types::{Message, UserId};

/// Events a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Identity announcement, sent once right after the transport opens.
    #[serde(rename_all = "camelCase")]
    UserConnected { user_id: UserId },
    /// Explicit disconnect (user clicked logout) ahead of the transport close.
    UserDisconnected,
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full snapshot of everyone currently online, broadcast to all clients
    /// after every presence change.
    #[serde(rename_all = "camelCase")]
    GetOnlineUsers { online_user_ids: Vec<UserId> },
    /// A newly persisted message, pushed to the receiver only.
    NewMessage(Message),
}

impl ServerEvent {
    pub fn online_users(online_user_ids: Vec<UserId>) -> Self {
        Self::GetOnlineUsers { online_user_ids }
    }

    /// Event name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::GetOnlineUsers { .. } => "getOnlineUsers",
            ServerEvent::NewMessage(_) => "newMessage",
        }
    }
}
