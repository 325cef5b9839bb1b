use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::connctx::{ConnectionHandle, Outbound};
use super::coordinator::Coordinator;
use crate::auth::identity::Identity;
use crate::models::{ClientMessage, CollabError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "type")]
    pub client_type: Option<String>,
}

/// WebSocket handler for `/ws/:note_id`
pub async fn websocket_handler(
    Path(note_key): Path<String>,
    Query(params): Query<ConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = state.identity.resolve(&headers);
    info!(
        "New WebSocket connection attempt for note {} from {} (authenticated: {})",
        note_key, addr, identity.authenticated
    );
    let coordinator = state.coordinator.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, note_key, identity, addr, params.client_type, coordinator))
}

/// Application error codes are sent in the private close-code range.
fn close_code(code: u16) -> u16 {
    if code >= 1000 {
        code
    } else {
        4000 + code
    }
}

async fn handle_socket(
    socket: WebSocket,
    note_key: String,
    identity: Identity,
    addr: SocketAddr,
    client_type: Option<String>,
    coordinator: Arc<Coordinator>,
) {
    let (conn, mut outbox) = ConnectionHandle::new(note_key, identity, Some(addr.to_string()), client_type);
    let conn_id = conn.id.clone();
    info!("WebSocket connection {} established for note {}", conn_id, conn.note_key);

    let (mut sender, mut receiver) = socket.split();
    coordinator.connect(conn);

    // Forward everything the coordinator queues for this connection
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = outbox.recv().await {
            match out {
                Outbound::Message(msg) => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize outgoing message: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let frame = CloseFrame {
                        code: close_code(code),
                        reason: reason.into(),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    let receiving = coordinator.clone();
    let recv_id = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Ignoring malformed message from {}: {}", recv_id, e);
                    continue;
                }
            };

            if let Err(e) = receiving.handle_message(&recv_id, msg).await {
                match e {
                    CollabError::Protocol(_) => warn!("Ignoring operation from {}: {}", recv_id, e),
                    _ => debug!("Message from {} not handled: {}", recv_id, e),
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    coordinator.disconnect(&conn_id);
    info!("WebSocket connection {} terminated", conn_id);
}
