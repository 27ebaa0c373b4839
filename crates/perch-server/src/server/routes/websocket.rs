//! WebSocket transport for the realtime core.
//!
//! Each accepted socket gets a reader loop (this task) driving the
//! `ConnectionLifecycle`, and a writer task draining the connection's bounded
//! event channel. The lifecycle's cancellation token ties them together: it
//! fires on cleanup or when a newer login for the same user supersedes this
//! connection, and the writer closes the socket in response.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use perch_realtime::{ClientEvent, ConnectionLifecycle, DEFAULT_OUTBOUND_BUFFER};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::server::AppState;

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel(DEFAULT_OUTBOUND_BUFFER);

    let mut lifecycle = ConnectionLifecycle::new(
        Arc::clone(&state.registry),
        state.presence.clone(),
        event_tx,
    );
    let cancel = lifecycle.cancellation_token();
    debug!(conn = %lifecycle.connection_id(), "WebSocket connection established");

    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    match serde_json::to_string(&event) {
                        Ok(text) => {
                            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => error!(error = %e, "Failed to encode server event"),
                    }
                }
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::UserConnected { user_id }) => {
                    lifecycle.handle_identify(user_id);
                }
                Ok(ClientEvent::UserDisconnected) => {
                    lifecycle.handle_logout();
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Unparseable client frame ignored");
                }
            },
            Ok(WsMessage::Close(_)) => break,
            // Pings are answered by the protocol layer; binary frames are not
            // part of the wire contract.
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "WebSocket read error");
                break;
            }
        }
    }

    // Reached on logout, on abrupt close and on read errors alike; cleanup
    // itself is idempotent and cancels the writer.
    lifecycle.handle_transport_closed();
    let _ = writer.await;
    debug!(conn = %lifecycle.connection_id(), "WebSocket connection closed");
}
