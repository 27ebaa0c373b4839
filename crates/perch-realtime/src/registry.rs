//! Connection registry: the single source of truth for who is online.
//!
//! Maps a `UserId` to at most one live connection handle. Uses DashMap for
//! concurrent access without explicit locking; no operation performs network
//! I/O while holding a map guard (senders are cloned out first, and all pushes
//! go through non-blocking `try_send`).

use std::fmt;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::event::ServerEvent;
use crate::types::{ConnectionId, UserId};

/// Default bound for a connection's outbound event buffer.
///
/// A client that stops draining its socket fills this buffer and starts
/// losing events instead of blocking senders; presence snapshots are
/// self-correcting and messages remain fetchable from history.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Handle to one live client connection.
///
/// Carries the bounded outbound channel plus a cancellation token that shuts
/// down the connection's transport when the handle is superseded by a newer
/// login for the same user.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        sender: mpsc::Sender<ServerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self { id, sender, cancel }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Request that this connection's transport shut down.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Result of attempting to push an event to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Event was queued for delivery.
    Sent,
    /// The recipient is not currently connected.
    NotConnected,
    /// The recipient's outbound buffer is full; the event was dropped.
    ChannelFull,
    /// The recipient's channel is closed; the stale entry was removed.
    ChannelClosed,
}

/// Registry of active connections keyed by user.
///
/// A user holds zero or one entry; a newer connection for the same user
/// replaces the older one (last-connected wins). Entries are removed with a
/// handle match so a disconnect event from a superseded connection is a no-op.
///
/// Constructed at server startup and passed by reference; there is no global
/// instance, so tests can run independent registries side by side.
pub struct ConnectionRegistry {
    connections: DashMap<UserId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Bind a user to a connection handle.
    ///
    /// Returns the previous handle if the user was already connected; the
    /// caller should cancel it so the stale transport closes instead of
    /// lingering.
    #[instrument(skip(self, handle), fields(user = %user, conn = %handle.id()))]
    pub fn register(&self, user: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.connections.insert(user, handle);
        if previous.is_some() {
            debug!("Replaced existing connection registration");
        } else {
            debug!("Registered new connection");
        }
        previous
    }

    /// Remove a user's entry, but only if it still belongs to `conn`.
    ///
    /// Returns true if an entry was removed. A mismatched `conn` means the
    /// user reconnected in the meantime and the newer entry is left alone.
    #[instrument(skip(self), fields(user = %user, conn = %conn))]
    pub fn unregister(&self, user: &UserId, conn: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(user, |_, handle| handle.id() == conn)
            .is_some();
        if removed {
            debug!("Unregistered connection");
        } else {
            debug!("No matching registration to remove");
        }
        removed
    }

    /// Check whether a user currently holds a live connection.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.connections.contains_key(user)
    }

    /// Number of connected users.
    pub fn online_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of all online users. No ordering guarantee.
    pub fn online_users(&self) -> Vec<UserId> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Push an event to one connected user.
    ///
    /// Never blocks: the push is a `try_send` against the connection's bounded
    /// buffer. A closed channel means the transport dropped without
    /// unregistering, so the stale entry is removed here (handle-matched).
    #[instrument(skip(self, event), fields(user = %user, event = event.name()))]
    pub fn send_to(&self, user: &UserId, event: ServerEvent) -> SendResult {
        let (conn, sender) = match self.connections.get(user) {
            Some(entry) => (entry.value().id(), entry.value().sender.clone()),
            None => {
                debug!("Recipient not connected");
                return SendResult::NotConnected;
            }
        };

        match sender.try_send(event) {
            Ok(()) => {
                debug!("Event queued for delivery");
                SendResult::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound buffer full, dropping event");
                SendResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound channel closed, removing stale entry");
                self.connections.remove_if(user, |_, h| h.id() == conn);
                SendResult::ChannelClosed
            }
        }
    }

    /// Push an event to every connected user, best-effort.
    ///
    /// Each push is independent; a slow or dead client never stalls delivery
    /// to the rest. Stale entries discovered along the way are removed.
    /// Returns the number of connections the event was queued for.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        // Snapshot handles first so no map guard is held while sending and
        // stale entries can be removed without deadlocking the iterator.
        let targets: Vec<(UserId, ConnectionId, mpsc::Sender<ServerEvent>)> = self
            .connections
            .iter()
            .map(|r| (r.key().clone(), r.value().id(), r.value().sender.clone()))
            .collect();

        let mut delivered = 0;
        for (user, conn, sender) in targets {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(user = %user, event = event.name(), "Outbound buffer full, dropping broadcast");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(user = %user, "Outbound channel closed, removing stale entry");
                    self.connections.remove_if(&user, |_, h| h.id() == conn);
                }
            }
        }
        delivered
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("online_count", &self.connections.len())
            .finish()
    }
}
