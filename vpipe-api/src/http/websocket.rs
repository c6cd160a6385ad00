//! WebSocket endpoint for real-time analysis subscriptions.
//!
//! Frames are JSON, not protobuf — there is no proto contract in this
//! system, unlike the gRPC/WebSocket dual transport this is adapted from.
//! The upgrade-then-split-socket shape and the forward-task/receive-loop
//! split are kept as-is.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use vpipe_core::ids::{SessionId, StreamKey};

use super::AppState;
use crate::bus::ServerMessage;

/// Messages a subscriber may send. `stream_id` on the wire names the
/// stream this connection wants analyses for, the same identifier this
/// system calls a `stream_key` internally.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { stream_id: String, session_id: Option<String> },
    Unsubscribe { stream_id: String },
    Ping { timestamp: i64 },
}

pub async fn websocket_handler(
    Path(stream_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, stream_id, state))
}

async fn handle_socket(socket: WebSocket, stream_id: String, state: AppState) {
    let connection_id = format!("ws_{}", nanoid::nanoid!(8));
    info!(connection_id, stream_id, "websocket: connected");

    let stream_key = StreamKey::from_string(stream_id.clone());
    let mut event_rx = match state.bus.subscribe(stream_key, None, connection_id.clone()).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(connection_id, error = %e, "websocket: initial subscribe failed");
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    let forward_connection_id = connection_id.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(message) = event_rx.recv().await {
            let payload = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "websocket: failed to encode server message");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                debug!(connection_id = forward_connection_id, "websocket: send failed, closing forward task");
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(WsMessage::Text(text)) => {
                handle_client_message(&text, &state, &connection_id).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(connection_id, error = %e, "websocket: receive error");
                break;
            }
        }
    }

    forward_task.abort();
    state.bus.unsubscribe(&connection_id);
    info!(connection_id, "websocket: disconnected");
}

async fn handle_client_message(text: &str, state: &AppState, connection_id: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(connection_id, error = %e, "websocket: malformed client message");
            return;
        }
    };

    match message {
        ClientMessage::Subscribe { stream_id, session_id } => {
            let stream_key = StreamKey::from_string(stream_id);
            let session_id = session_id.map(SessionId::from_string);
            if let Err(e) = state.bus.resubscribe(connection_id, stream_key, session_id.as_ref()).await {
                warn!(connection_id, error = %e, "websocket: resubscribe failed");
            }
        }
        ClientMessage::Unsubscribe { stream_id: _ } => {
            state.bus.unsubscribe(connection_id);
        }
        ClientMessage::Ping { timestamp } => {
            state.bus.send_to(connection_id, ServerMessage::Pong { timestamp });
        }
    }
}
