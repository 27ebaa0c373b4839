//! Message routing to live connections.
//!
//! Runs strictly after the message has been durably persisted. Delivery is
//! best-effort: an offline receiver, a full buffer, or a transport that closed
//! a moment earlier all resolve to a logged no-op, never an error back to the
//! sender (who already has their 200 from persistence).

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::event::ServerEvent;
use crate::registry::{ConnectionRegistry, SendResult};
use crate::types::Message;

/// What became of a delivery attempt. Informational only; no outcome is an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued on the receiver's live connection.
    Delivered,
    /// Receiver offline; they will pick the message up from history.
    ReceiverOffline,
    /// Receiver connected but their buffer was full; same recovery as offline.
    ChannelFull,
    /// Receiver's transport closed under us; same recovery as offline.
    ChannelClosed,
}

/// Routes persisted messages to their receiver's live connection.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push a persisted message to its receiver, if they are online.
    #[instrument(skip(self, message), fields(id = %message.id, to = %message.receiver_id))]
    pub fn deliver(&self, message: &Message) -> DeliveryOutcome {
        let receiver = message.receiver_id.clone();
        match self
            .registry
            .send_to(&receiver, ServerEvent::NewMessage(message.clone()))
        {
            SendResult::Sent => {
                debug!("Message delivered to live connection");
                DeliveryOutcome::Delivered
            }
            SendResult::NotConnected => {
                debug!("Receiver offline, message awaits history fetch");
                DeliveryOutcome::ReceiverOffline
            }
            SendResult::ChannelFull => {
                warn!("Receiver buffer full, dropping live delivery");
                DeliveryOutcome::ChannelFull
            }
            SendResult::ChannelClosed => {
                debug!("Receiver transport closed, dropping live delivery");
                DeliveryOutcome::ChannelClosed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use crate::registry::ConnectionHandle;
    use crate::types::{ConnectionId, UserId};

    fn message(from: &str, to: &str, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: UserId::new(from),
            receiver_id: UserId::new(to),
            text: Some(text.to_string()),
            attachments: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_online_receiver() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));

        let (tx, mut rx) = mpsc::channel(16);
        registry.register(
            UserId::new("bob"),
            ConnectionHandle::new(ConnectionId::new(), tx, CancellationToken::new()),
        );

        let msg = message("alice", "bob", "hi");
        assert_eq!(router.deliver(&msg), DeliveryOutcome::Delivered);

        // Exactly one push, payload deep-equal to the persisted message.
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::NewMessage(msg));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn offline_receiver_is_a_quiet_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry);

        let msg = message("alice", "bob", "hi");
        assert_eq!(router.deliver(&msg), DeliveryOutcome::ReceiverOffline);
    }

    #[test]
    fn closed_transport_is_swallowed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));

        let (tx, rx) = mpsc::channel(16);
        registry.register(
            UserId::new("bob"),
            ConnectionHandle::new(ConnectionId::new(), tx, CancellationToken::new()),
        );
        drop(rx);

        let msg = message("alice", "bob", "hi");
        assert_eq!(router.deliver(&msg), DeliveryOutcome::ChannelClosed);
        assert!(!registry.is_online(&UserId::new("bob")));
    }

    #[test]
    fn sender_does_not_receive_their_own_message() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));

        let (tx, mut rx) = mpsc::channel(16);
        registry.register(
            UserId::new("alice"),
            ConnectionHandle::new(ConnectionId::new(), tx, CancellationToken::new()),
        );

        let msg = message("alice", "bob", "hi");
        assert_eq!(router.deliver(&msg), DeliveryOutcome::ReceiverOffline);
        assert!(rx.try_recv().is_err());
    }
}
