//! Shared fixtures for crosswire integration tests.

use std::{sync::Arc, time::Duration};

use crosswire::{
    ClientId,
    Connection,
    ConnectionRegistry,
    Dispatcher,
    Envelope,
    ModuleRegistry,
    PushQueues,
};

/// Build a dispatcher over fresh registries.
#[must_use]
pub fn dispatcher(
    modules: &Arc<ModuleRegistry>,
    call_deadline: Option<Duration>,
) -> Dispatcher {
    Dispatcher::new(Arc::clone(modules), call_deadline)
}

/// Register a connection and drain its handshake CONNECT envelope so tests
/// observe only protocol replies.
pub async fn connect(
    registry: &ConnectionRegistry,
    id: impl Into<ClientId>,
) -> (Arc<Connection>, PushQueues) {
    let (mut queues, handle) = PushQueues::bounded(8, 64);
    let connection = registry.on_connect(id.into(), handle).await;
    let (_, envelope) = queues.recv().await.expect("handshake envelope");
    assert!(matches!(envelope, Envelope::Connect { .. }));
    (connection, queues)
}

/// Receive the next outbound envelope, failing the test after two seconds.
pub async fn recv(queues: &mut PushQueues) -> Envelope {
    tokio::time::timeout(Duration::from_secs(2), queues.recv())
        .await
        .expect("timed out waiting for an envelope")
        .expect("push queues closed")
        .1
}
