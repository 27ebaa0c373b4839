//! # perch-realtime
//!
//! Presence tracking and message fan-out core for the Perch messaging server.
//!
//! This crate maps logical users to live connections and routes events to
//! them; it knows nothing about HTTP, WebSockets or the database. The server
//! crate drives it from its transport handlers.
//!
//! ## Architecture
//!
//! - **ConnectionRegistry**: concurrent `UserId -> ConnectionHandle` map, the
//!   single source of truth for who is online. Last-connected wins on
//!   register; unregister requires a handle match so stale disconnects are
//!   no-ops.
//! - **PresenceBroadcaster**: global `getOnlineUsers` snapshot fan-out after
//!   every registry change.
//! - **MessageRouter**: best-effort push of a persisted message to the
//!   receiver's live connection.
//! - **ConnectionLifecycle**: per-connection `Pending -> Registered -> Closed`
//!   state machine with exactly-once cleanup.
//!
//! ```text
//! transport task (per client) <-> ConnectionLifecycle <-> ConnectionRegistry
//!            |                                                  |
//!            v                                                  v
//!   mpsc::Receiver<ServerEvent>                DashMap<UserId, ConnectionHandle>
//! ```

mod event;
mod lifecycle;
mod presence;
mod registry;
mod router;
mod types;

pub use event::{ClientEvent, ServerEvent};
pub use lifecycle::{ConnectionLifecycle, ConnectionState};
pub use presence::PresenceBroadcaster;
pub use registry::{ConnectionHandle, ConnectionRegistry, SendResult, DEFAULT_OUTBOUND_BUFFER};
pub use router::{DeliveryOutcome, MessageRouter};
pub use types::{ConnectionId, Message, UserId};
