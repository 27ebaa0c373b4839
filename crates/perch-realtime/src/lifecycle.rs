//! Per-connection lifecycle state machine.
//!
//! Each accepted transport owns one `ConnectionLifecycle` driving
//! `Pending -> Registered -> Closed`. Registration happens when the client
//! announces its identity; cleanup runs exactly once per connection whether
//! the client logs out explicitly, the transport drops abruptly, or both race.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::event::ServerEvent;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::types::{ConnectionId, UserId};

/// Lifecycle states of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, identity not yet bound.
    Pending,
    /// Identity bound and present in the registry.
    Registered,
    /// Terminal; cleanup has run.
    Closed,
}

/// State machine for one client connection.
///
/// Owns the connection's id, its outbound channel sender and the cancellation
/// token shared with the transport tasks. Dropping the lifecycle runs cleanup
/// as a backstop, so a registry entry can never outlive its connection task.
pub struct ConnectionLifecycle {
    conn_id: ConnectionId,
    sender: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    presence: PresenceBroadcaster,
    state: ConnectionState,
    user: Option<UserId>,
}

impl ConnectionLifecycle {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        presence: PresenceBroadcaster,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            conn_id: ConnectionId::new(),
            sender,
            cancel: CancellationToken::new(),
            registry,
            presence,
            state: ConnectionState::Pending,
            user: None,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Token the transport tasks watch; cancelled on close or when this
    /// connection is superseded by a newer one for the same user.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The client announced its identity: bind it and go online.
    ///
    /// A blank user id is a malformed announcement; the connection stays
    /// `Pending` and is never registered. Repeat announcements on an already
    /// registered or closed connection are ignored.
    #[instrument(skip(self), fields(conn = %self.conn_id, user = %user))]
    pub fn handle_identify(&mut self, user: UserId) {
        match self.state {
            ConnectionState::Pending => {
                if user.is_blank() {
                    warn!("Identity announcement with blank user id, leaving connection pending");
                    return;
                }

                let handle =
                    ConnectionHandle::new(self.conn_id, self.sender.clone(), self.cancel.clone());
                if let Some(previous) = self.registry.register(user.clone(), handle) {
                    debug!(superseded = %previous.id(), "Cancelling superseded connection");
                    previous.cancel();
                }
                self.user = Some(user);
                self.state = ConnectionState::Registered;
                self.presence.announce();
            }
            ConnectionState::Registered => {
                debug!("Duplicate identity announcement ignored");
            }
            ConnectionState::Closed => {
                debug!("Identity announcement after close ignored");
            }
        }
    }

    /// Explicit logout signal from the client, ahead of the transport close.
    pub fn handle_logout(&mut self) {
        self.cleanup("logout");
    }

    /// The transport closed (network loss, tab closed, crash) with no prior
    /// explicit signal.
    pub fn handle_transport_closed(&mut self) {
        self.cleanup("transport closed");
    }

    /// Runs at most once per connection; the state check makes the
    /// logout/transport-close race converge on a single cleanup, and the
    /// handle match in the registry keeps a stale cleanup from evicting a
    /// newer connection for the same user.
    fn cleanup(&mut self, reason: &str) {
        if self.state == ConnectionState::Closed {
            return;
        }

        if let Some(user) = self.user.take() {
            if self.registry.unregister(&user, self.conn_id) {
                debug!(conn = %self.conn_id, user = %user, reason, "Connection cleaned up");
            } else {
                debug!(conn = %self.conn_id, user = %user, reason, "Registry entry already superseded or evicted");
            }
            // The entry may already be gone (superseded login, or evicted by
            // a failed send that broadcast nothing); the final snapshot still
            // has to reach the remaining peers.
            self.presence.announce();
        } else {
            debug!(conn = %self.conn_id, reason, "Connection closed before identity was bound");
        }

        self.state = ConnectionState::Closed;
        self.cancel.cancel();
    }
}

impl Drop for ConnectionLifecycle {
    fn drop(&mut self) {
        self.cleanup("lifecycle dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::event::ServerEvent;
    use crate::router::{DeliveryOutcome, MessageRouter};
    use crate::types::Message;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        presence: PresenceBroadcaster,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let presence = PresenceBroadcaster::new(Arc::clone(&registry));
            Self { registry, presence }
        }

        fn connect(&self) -> (ConnectionLifecycle, mpsc::Receiver<ServerEvent>) {
            let (tx, rx) = mpsc::channel(16);
            (
                ConnectionLifecycle::new(Arc::clone(&self.registry), self.presence.clone(), tx),
                rx,
            )
        }
    }

    fn online_set(event: ServerEvent) -> Vec<String> {
        match event {
            ServerEvent::GetOnlineUsers { online_user_ids } => {
                let mut ids: Vec<String> =
                    online_user_ids.into_iter().map(|u| u.as_str().to_string()).collect();
                ids.sort();
                ids
            }
            other => panic!("expected presence event, got {other:?}"),
        }
    }

    #[test]
    fn identify_registers_and_announces() {
        let fx = Fixture::new();
        let (mut conn, mut rx) = fx.connect();

        conn.handle_identify(UserId::new("alice"));

        assert_eq!(conn.state(), ConnectionState::Registered);
        assert!(fx.registry.is_online(&UserId::new("alice")));
        assert_eq!(online_set(rx.try_recv().unwrap()), vec!["alice"]);
    }

    #[test]
    fn blank_identity_stays_pending() {
        let fx = Fixture::new();
        let (mut conn, mut rx) = fx.connect();

        conn.handle_identify(UserId::new("  "));

        assert_eq!(conn.state(), ConnectionState::Pending);
        assert_eq!(fx.registry.online_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn pending_close_skips_registry_and_broadcast() {
        let fx = Fixture::new();
        let (mut conn, mut rx) = fx.connect();

        conn.handle_transport_closed();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(fx.registry.online_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn logout_unregisters_and_announces() {
        let fx = Fixture::new();
        let (mut conn, mut rx) = fx.connect();

        conn.handle_identify(UserId::new("alice"));
        let _ = rx.try_recv();

        conn.handle_logout();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!fx.registry.is_online(&UserId::new("alice")));
        assert!(conn.cancellation_token().is_cancelled());
    }

    #[test]
    fn cleanup_runs_at_most_once() {
        let fx = Fixture::new();
        let (mut conn, mut rx) = fx.connect();
        let (mut observer, mut observer_rx) = fx.connect();
        observer.handle_identify(UserId::new("observer"));
        let _ = observer_rx.try_recv();

        conn.handle_identify(UserId::new("alice"));
        let _ = rx.try_recv();
        let _ = observer_rx.try_recv();

        // Explicit logout and the transport close race: only one broadcast.
        conn.handle_logout();
        conn.handle_transport_closed();

        assert!(observer_rx.try_recv().is_ok());
        assert!(observer_rx.try_recv().is_err());
    }

    #[test]
    fn superseded_connection_cleanup_keeps_newer_entry() {
        let fx = Fixture::new();
        let (mut old_conn, _old_rx) = fx.connect();
        let (mut new_conn, _new_rx) = fx.connect();

        old_conn.handle_identify(UserId::new("alice"));
        new_conn.handle_identify(UserId::new("alice"));

        // The replaced connection was told to shut down.
        assert!(old_conn.cancellation_token().is_cancelled());

        // Its late disconnect must not evict the newer registration.
        old_conn.handle_transport_closed();
        assert!(fx.registry.is_online(&UserId::new("alice")));
        assert_eq!(fx.registry.online_count(), 1);

        new_conn.handle_transport_closed();
        assert!(!fx.registry.is_online(&UserId::new("alice")));
    }

    #[test]
    fn drop_is_a_cleanup_backstop() {
        let fx = Fixture::new();
        {
            let (mut conn, _rx) = fx.connect();
            conn.handle_identify(UserId::new("alice"));
            assert_eq!(fx.registry.online_count(), 1);
        }
        assert_eq!(fx.registry.online_count(), 0);
    }

    #[tokio::test]
    async fn eviction_then_close_still_broadcasts_presence() {
        let fx = Fixture::new();
        let router = MessageRouter::new(Arc::clone(&fx.registry));

        let (mut conn_a, mut rx_a) = fx.connect();
        let (mut conn_b, rx_b) = fx.connect();
        conn_a.handle_identify(UserId::new("A"));
        conn_b.handle_identify(UserId::new("B"));
        let _ = rx_a.try_recv();
        let _ = rx_a.try_recv();

        // B's transport dies without unregistering; a delivery attempt then
        // evicts the stale entry, and that eviction broadcasts nothing.
        drop(rx_b);
        let msg = Message {
            id: Uuid::new_v4(),
            sender_id: UserId::new("A"),
            receiver_id: UserId::new("B"),
            text: Some("hi".to_string()),
            attachments: vec![],
            created_at: Utc::now(),
        };
        assert_eq!(router.deliver(&msg), DeliveryOutcome::ChannelClosed);
        assert!(!fx.registry.is_online(&UserId::new("B")));
        assert!(rx_a.try_recv().is_err());

        // B's own cleanup finds no entry to remove but must still converge
        // the remaining peers to the final online set.
        conn_b.handle_transport_closed();
        assert_eq!(online_set(rx_a.try_recv().unwrap()), vec!["A"]);
    }

    /// End-to-end scenario: two users online, a message routed, an abrupt
    /// disconnect, presence converging to the survivor.
    #[tokio::test]
    async fn two_user_chat_scenario() {
        let fx = Fixture::new();
        let router = MessageRouter::new(Arc::clone(&fx.registry));

        let (mut conn_a, mut rx_a) = fx.connect();
        let (mut conn_b, mut rx_b) = fx.connect();

        conn_a.handle_identify(UserId::new("A"));
        conn_b.handle_identify(UserId::new("B"));
        assert_eq!(fx.registry.online_count(), 2);

        // Skip A's first snapshot (only A online); the latest one both saw
        // lists A and B, order-independent.
        let _ = rx_a.try_recv();
        assert_eq!(online_set(rx_a.try_recv().unwrap()), vec!["A", "B"]);
        assert_eq!(online_set(rx_b.try_recv().unwrap()), vec!["A", "B"]);

        // A sends "hi" to B.
        let msg = Message {
            id: Uuid::new_v4(),
            sender_id: UserId::new("A"),
            receiver_id: UserId::new("B"),
            text: Some("hi".to_string()),
            attachments: vec![],
            created_at: Utc::now(),
        };
        assert_eq!(router.deliver(&msg), DeliveryOutcome::Delivered);
        assert_eq!(rx_b.recv().await.unwrap(), ServerEvent::NewMessage(msg));

        // B's browser dies: abrupt close, no explicit signal.
        conn_b.handle_transport_closed();
        assert_eq!(fx.registry.online_count(), 1);
        assert!(fx.registry.is_online(&UserId::new("A")));
        assert_eq!(online_set(rx_a.recv().await.unwrap()), vec!["A"]);
    }
}
