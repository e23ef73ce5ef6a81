//! Out-of-band publish fan-out to connected clients.
//!
//! The broadcaster walks the connection registry and queues one PUBLISH
//! envelope per matching peer. Delivery is best-effort: a slow client's
//! full queue drops the frame rather than stalling the fan-out.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::{
    envelope::Envelope,
    metrics,
    session::{ClientId, ConnectionRegistry},
};

/// Sends server-initiated PUBLISH envelopes to all or selected clients.
#[derive(Clone)]
pub struct Broadcaster {
    connections: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over the given connection registry.
    #[must_use]
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    /// Publish `data` under `topic` to the clients named in `targets`, or
    /// to every connected client when `targets` is empty.
    ///
    /// Returns whether at least one send was attempted, letting callers
    /// report "no subscribers" if they care.
    pub fn publish(&self, topic: &str, data: Value, targets: &[ClientId]) -> bool {
        let envelope = Envelope::Publish {
            topic: topic.to_owned(),
            data,
        };
        let mut recipients = 0usize;
        for connection in self.connections.active_connections() {
            if !targets.is_empty() && !targets.contains(connection.id()) {
                continue;
            }
            connection.try_send(envelope.clone());
            metrics::inc_frames(metrics::Direction::Outbound);
            recipients += 1;
        }
        debug!(topic, recipients, "publish fan-out");
        recipients > 0
    }
}
