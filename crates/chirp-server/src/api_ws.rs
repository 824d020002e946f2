//! WebSocket ingress and push egress.
//!
//! A client connects with its user id, sends binary voice frames that
//! become pipeline tasks, and receives push frames (voice responses,
//! emotion reports) on the same socket. The socket registered here is the
//! connection the registry pushes to; when a user reconnects, the new
//! socket replaces the old one as the sole push target.

use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use chirp_connect::{Connection, PushSink, RegistryError};
use chirp_types::VoiceTask;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Per-session outbound buffer. Beyond this the client is too slow and
/// pushes to it are dropped.
const SESSION_SEND_BUFFER: usize = 256;

/// Query parameters for the WebSocket connection.
///
/// Authentication is a collaborator concern; the user id is accepted as
/// presented. An omitted session id starts a fresh chat session.
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Push sink backed by the session's outbound channel.
///
/// The forwarder task owns the actual socket writer; this sink only
/// enqueues. A full buffer fails the write rather than blocking a pipeline
/// worker on a slow client.
struct WsSink {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl PushSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<(), RegistryError> {
        self.tx
            .try_send(frame)
            .map_err(|e| RegistryError::Write(format!("session send buffer: {e}")))
    }
}

/// WebSocket handler: `GET /ws?user_id=...&session_id=...`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> impl IntoResponse {
    let Some(user_id) = params.user_id.filter(|id| !id.is_empty()) else {
        tracing::warn!("websocket connect missing user_id");
        return StatusCode::BAD_REQUEST.into_response();
    };

    let session_id = params
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, session_id))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: String,
    session_id: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded channel between the registry's push path and the socket
    // writer, so a slow consumer cannot grow memory without limit.
    let (tx, mut rx) = mpsc::channel::<String>(SESSION_SEND_BUFFER);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(AxumMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let connection = Connection::new(&user_id, Box::new(WsSink { tx }));
    let connection_id = connection.session_id();
    let replaced = state.registry.register(connection).await;
    if replaced.is_some() {
        tracing::info!(user_id = %user_id, "new socket replaced an existing connection");
    }
    tracing::info!(user_id = %user_id, session_id = %session_id, "websocket connected");

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Binary(frame) => {
                let task = VoiceTask::new(&user_id, &session_id, frame.to_vec());
                if let Err(e) = state.pipeline.submit(task).await {
                    tracing::warn!(user_id = %user_id, "failed to submit voice frame: {}", e);
                }
            }
            AxumMessage::Close(_) => break,
            // Pings are answered by axum; text frames carry nothing yet.
            _ => {}
        }
    }

    // Only remove the registry entry if this socket is still the live one;
    // a reconnect may already have replaced it.
    state
        .registry
        .unregister_session(&user_id, connection_id)
        .await;
    send_task.abort();
    tracing::info!(user_id = %user_id, session_id = %session_id, "websocket disconnected");
}
