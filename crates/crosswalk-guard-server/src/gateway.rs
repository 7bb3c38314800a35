//! WebSocket gateway.
//!
//! Each connection gets a server-minted session id, an outbound queue
//! drained by a forward task, and a read loop parsing client commands.
//! Disconnect — graceful or not — tears the session down through the same
//! cleanup path.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crosswalk_guard_core::SessionId;

use crate::dto::{ClientCommand, ServerMessage};
use crate::handlers::{self, AppState};

/// Upgrade handler for `GET /ws`.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let sid = SessionId::new(format!("s-{}", Uuid::new_v4()));
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.hub.register(sid.clone(), tx);
    debug!(%sid, sessions = state.hub.len(), "session connected");

    let (mut sender, mut receiver) = socket.split();

    // Forward queued messages to the wire.
    let forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(error) => {
                    warn!(%error, "failed to encode outbound message");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => handlers::handle_command(&state, &sid, command).await,
                Err(error) => {
                    debug!(%sid, %error, "ignoring malformed client command");
                    let _ = state.hub.send(
                        &sid,
                        ServerMessage::Error {
                            message: format!("malformed command: {error}"),
                        },
                    );
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            _ => {}
        }
    }

    forward_task.abort();
    handlers::disconnect(&state, &sid).await;
    debug!(%sid, sessions = state.hub.len(), "session disconnected");
}
