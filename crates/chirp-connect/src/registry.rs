//! The user → live connection map and its push path.

use crate::frame::PushFrame;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Errors surfaced by the registry's push path.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The push frame could not be serialized.
    #[error("failed to serialize push frame: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The connection's underlying writer failed.
    #[error("connection write failed: {0}")]
    Write(String),
}

/// Write half of one client connection.
///
/// The production implementation wraps a WebSocket sender; tests use a
/// recording sink. Implementations do not need to serialize concurrent
/// callers; the registry's per-connection lock does that.
#[async_trait]
pub trait PushSink: Send {
    /// Writes one serialized frame to the client.
    async fn send(&mut self, frame: String) -> Result<(), RegistryError>;
}

/// One live connection: the user it belongs to plus its locked write half.
pub struct Connection {
    user_id: String,
    session_id: Uuid,
    sink: Mutex<Box<dyn PushSink>>,
}

impl Connection {
    /// Wraps a sink into a connection owned by `user_id`.
    pub fn new(user_id: impl Into<String>, sink: Box<dyn PushSink>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Uuid::new_v4(),
            sink: Mutex::new(sink),
        }
    }

    /// The user this connection belongs to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Unique id of this connection instance, used to detect stale
    /// unregister requests after a reconnect replaced the entry.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Serializes concurrent writers: the per-connection lock is held for
    /// exactly one frame write.
    async fn write(&self, frame: String) -> Result<(), RegistryError> {
        let mut sink = self.sink.lock().await;
        sink.send(frame).await
    }
}

/// Process-wide map from user id to that user's single live connection.
///
/// Constructed once at process start and handed to every component that
/// pushes (the pipeline's terminal stage, the report scheduler). A new
/// connection for a user replaces any prior entry; the replaced handle is
/// returned to the caller, because connection teardown belongs to the
/// connection layer, not the registry.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<Connection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connection` as the sole push target for its user.
    ///
    /// Returns the previous connection for that user, if any, so the
    /// caller can close it.
    pub async fn register(&self, connection: Connection) -> Option<Arc<Connection>> {
        let user_id = connection.user_id().to_string();
        let previous = self
            .connections
            .write()
            .await
            .insert(user_id.clone(), Arc::new(connection));
        if previous.is_some() {
            tracing::info!(user_id = %user_id, "replaced existing connection");
        }
        previous
    }

    /// Removes the mapping for `user_id`; no-op if absent.
    pub async fn unregister(&self, user_id: &str) -> Option<Arc<Connection>> {
        self.connections.write().await.remove(user_id)
    }

    /// Removes the mapping for `user_id` only while `session_id` is still
    /// the live connection. A stale request from a socket that was already
    /// replaced by a reconnect leaves the newer entry untouched.
    pub async fn unregister_session(
        &self,
        user_id: &str,
        session_id: Uuid,
    ) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        match connections.get(user_id) {
            Some(current) if current.session_id() == session_id => connections.remove(user_id),
            _ => None,
        }
    }

    /// The current connection handle for `user_id`, if one is live.
    pub async fn get(&self, user_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(user_id).cloned()
    }

    /// Pushes `frame` to `user_id`'s live connection.
    ///
    /// Best-effort: an absent connection is a successful no-op. Concurrent
    /// pushes to the same user are serialized by that connection's write
    /// lock; pushes to different users proceed in parallel. The registry
    /// map lock is released before the write begins.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the frame cannot be serialized or the
    /// connection's writer fails.
    pub async fn push(&self, user_id: &str, frame: &PushFrame) -> Result<(), RegistryError> {
        let json = serde_json::to_string(frame)?;

        let connection = match self.get(user_id).await {
            Some(c) => c,
            None => {
                tracing::debug!(user_id = %user_id, "no live connection, dropping push");
                return Ok(());
            }
        };

        connection.write(json).await
    }
}
