//! Registry of live connections and their outstanding task tables.
//!
//! The [`ConnectionRegistry`] is the single owner of every [`Connection`]
//! for its lifetime: entries are created on a successful handshake and
//! removed on disconnect, at which point all of the connection's in-flight
//! tasks are force-closed so suspended generators never outlive their peer.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    envelope::Envelope,
    metrics,
    push::{PushError, PushHandle, PushPolicy},
    task::TaskTable,
};

/// Client-assigned identifier for one peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity unit for one connected peer.
///
/// Owns the peer's push handle and its table of in-flight streaming tasks.
/// The task table starts empty; every task in it has this connection as its
/// live parent.
pub struct Connection {
    id: ClientId,
    handle: PushHandle,
    tasks: TaskTable,
}

impl Connection {
    /// Create a connection record for `id` writing through `handle`.
    #[must_use]
    pub fn new(id: ClientId, handle: PushHandle) -> Self {
        Self {
            id,
            handle,
            tasks: TaskTable::new(),
        }
    }

    /// The peer's client id.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// The connection's in-flight task table.
    #[must_use]
    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// Queue an envelope for this peer, waiting for capacity.
    ///
    /// Best-effort: if the peer's writer has already gone away the envelope
    /// is dropped silently — the disconnect handler owns cleanup, not the
    /// send path.
    pub async fn send(&self, envelope: Envelope) {
        if let Err(PushError::Closed) = self.handle.push(envelope).await {
            debug!(client = %self.id, "send after close dropped");
        }
    }

    /// Queue an envelope without waiting, dropping it if the lane is full.
    pub fn try_send(&self, envelope: Envelope) {
        match self.handle.try_push(envelope, PushPolicy::WarnAndDropIfFull) {
            Ok(()) | Err(PushError::QueueFull) => {}
            Err(PushError::Closed) => debug!(client = %self.id, "send after close dropped"),
        }
    }
}

/// Concurrent registry of live connections keyed by [`ClientId`].
pub struct ConnectionRegistry {
    connections: DashMap<ClientId, Arc<Connection>>,
    server_id: String,
}

impl ConnectionRegistry {
    /// Create a registry that identifies this server as `server_id` in
    /// handshake envelopes.
    #[must_use]
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            connections: DashMap::new(),
            server_id: server_id.into(),
        }
    }

    /// The identifier sent to peers in the CONNECT envelope.
    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Create and store a connection, immediately queueing the CONNECT
    /// envelope that completes the handshake. The peer must not send
    /// application messages until it has received it.
    ///
    /// A reconnect under an id that is still registered displaces the old
    /// record; its tasks are force-closed as if it had disconnected.
    pub async fn on_connect(&self, id: ClientId, handle: PushHandle) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(id.clone(), handle));
        connection
            .send(Envelope::Connect {
                channel: self.server_id.clone(),
            })
            .await;
        if let Some(previous) = self.connections.insert(id.clone(), Arc::clone(&connection)) {
            warn!(client = %id, "client id reconnected; closing displaced connection's tasks");
            previous.tasks().close_all().await;
        } else {
            metrics::inc_connections();
        }
        debug!(client = %id, "connection registered");
        connection
    }

    /// Remove a connection and force-close every task it owns.
    pub async fn on_disconnect(&self, id: &ClientId) {
        if let Some((_, connection)) = self.connections.remove(id) {
            connection.tasks().close_all().await;
            metrics::dec_connections();
            debug!(client = %id, "connection removed");
        }
    }

    /// Look up a live connection by id.
    #[must_use]
    pub fn get(&self, id: &ClientId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Ids of every live connection, for pub/sub target filtering.
    #[must_use]
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.connections.iter().map(|c| c.key().clone()).collect()
    }

    /// Every live connection.
    #[must_use]
    pub fn active_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|c| Arc::clone(c.value()))
            .collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no peers are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Force-close the tasks of every connection. Used on server shutdown
    /// so module teardown never races in-flight streams.
    pub async fn close_all_tasks(&self) {
        for connection in self.active_connections() {
            connection.tasks().close_all().await;
        }
    }
}
