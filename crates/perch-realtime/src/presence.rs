//! Presence broadcasting.
//!
//! Every registry mutation is followed by a global `getOnlineUsers` broadcast
//! carrying the full snapshot. Clients reconcile against the snapshot rather
//! than diffs, so a dropped intermediate broadcast (full buffer on a slow
//! client) is harmless: the next one converges them to the final state.

use std::sync::Arc;

use tracing::debug;

use crate::event::ServerEvent;
use crate::registry::ConnectionRegistry;

/// Pushes the current online-user set to every live connection.
#[derive(Debug, Clone)]
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcast the current online set to all connected clients.
    ///
    /// Fire-and-forget fan-out; returns how many connections the snapshot was
    /// queued for.
    pub fn announce(&self) -> usize {
        let online = self.registry.online_users();
        debug!(online = online.len(), "Broadcasting presence snapshot");
        self.registry.broadcast(ServerEvent::online_users(online))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::registry::ConnectionHandle;
    use crate::types::{ConnectionId, UserId};

    fn handle() -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            ConnectionHandle::new(ConnectionId::new(), tx, CancellationToken::new()),
            rx,
        )
    }

    #[tokio::test]
    async fn announce_sends_full_snapshot_to_everyone() {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(Arc::clone(&registry));

        let (a, mut rx_a) = handle();
        let (b, mut rx_b) = handle();
        registry.register(UserId::new("alice"), a);
        registry.register(UserId::new("bob"), b);

        let delivered = presence.announce();
        assert_eq!(delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await.unwrap() {
                ServerEvent::GetOnlineUsers { mut online_user_ids } => {
                    online_user_ids.sort_by(|x, y| x.as_str().cmp(y.as_str()));
                    assert_eq!(online_user_ids, vec![UserId::new("alice"), UserId::new("bob")]);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn announce_with_no_connections_is_a_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry);
        assert_eq!(presence.announce(), 0);
    }
}
