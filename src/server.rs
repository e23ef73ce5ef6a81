//! WebSocket server runtime for the channel protocol.
//!
//! The server accepts TCP connections, screens the HTTP upgrade request
//! (path, client id, optional shared secret) before any envelope exchange,
//! and then runs one reader loop plus one writer task per connection. Raw
//! text frames go to the [`Dispatcher`]; queued envelopes drain to the
//! WebSocket sink. Disconnects and write failures both funnel into the
//! registry's disconnect path, which force-closes the peer's tasks.

use std::{net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::ServerConfig,
    dispatch::Dispatcher,
    metrics,
    module::{Module, ModuleRegistry, RegistryError},
    push::PushQueues,
    session::{ClientId, ConnectionRegistry},
};

/// Control-lane queue capacity per connection.
const HIGH_QUEUE_CAPACITY: usize = 32;
/// Bulk-lane queue capacity per connection.
const LOW_QUEUE_CAPACITY: usize = 256;

/// Parameters extracted from an accepted upgrade request.
struct HandshakeParams {
    client_id: ClientId,
}

/// The channel protocol server.
///
/// Cheap to clone: registries and the dispatcher are shared, so a clone can
/// be moved into spawned tasks or handed to application code for
/// broadcasting while `serve` runs.
#[derive(Clone)]
pub struct ChannelServer {
    config: ServerConfig,
    modules: Arc<ModuleRegistry>,
    connections: Arc<ConnectionRegistry>,
    dispatcher: Dispatcher,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
}

impl ChannelServer {
    /// Create a server from `config` with empty registries.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let modules = Arc::new(ModuleRegistry::new(config.init_policy));
        let connections = Arc::new(ConnectionRegistry::new(config.server_id.clone()));
        let dispatcher = Dispatcher::new(Arc::clone(&modules), config.call_deadline);
        let broadcaster = Broadcaster::new(Arc::clone(&connections));
        Self {
            config,
            modules,
            connections,
            dispatcher,
            broadcaster,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a module, running its `init` hook.
    ///
    /// # Errors
    ///
    /// Propagates [`RegistryError`] from the module registry.
    pub async fn register(&self, module: Module) -> Result<(), RegistryError> {
        self.modules.register(module).await
    }

    /// The server's module registry.
    #[must_use]
    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    /// The server's connection registry.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// A broadcaster for server-initiated publishes.
    #[must_use]
    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Request a graceful stop of the accept loop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Bind `addr` and serve until Ctrl+C or [`shutdown`](Self::shutdown).
    ///
    /// Embedders that manage their own shutdown signal should use
    /// [`serve`](Self::serve) directly.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if binding or accepting fails fatally.
    pub async fn run(&self, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        });
        self.serve(listener).await
    }

    /// Serve connections from an existing listener until shutdown.
    ///
    /// On exit every connection's tasks are force-closed and module
    /// `destroy` hooks run exactly once.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if accepting fails fatally.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!(
            endpoint = %self.config.endpoint,
            server = %self.connections.server_id(),
            "channel server accepting connections"
        );
        let result = loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.handle_socket(stream, peer).await;
                        });
                    }
                    Err(error) => break Err(error),
                },
            }
        };
        self.connections.close_all_tasks().await;
        self.modules.shutdown().await;
        info!("channel server stopped");
        result
    }

    async fn handle_socket(&self, stream: TcpStream, peer: SocketAddr) {
        let mut params: Option<HandshakeParams> = None;
        let callback = |request: &Request, response: Response| {
            let screened = self.screen_upgrade(request)?;
            params = Some(screened);
            Ok(response)
        };
        let websocket = match accept_hdr_async(stream, callback).await {
            Ok(websocket) => websocket,
            Err(error) => {
                debug!(%peer, %error, "websocket upgrade failed");
                return;
            }
        };
        let Some(params) = params else {
            return;
        };

        let (mut queues, handle) = PushQueues::bounded(HIGH_QUEUE_CAPACITY, LOW_QUEUE_CAPACITY);
        let connection = self
            .connections
            .on_connect(params.client_id, handle)
            .await;
        info!(client = %connection.id(), %peer, "peer connected");

        let (mut sink, mut frames) = websocket.split();
        let writer = tokio::spawn(async move {
            while let Some((_, envelope)) = queues.recv().await {
                metrics::inc_frames(metrics::Direction::Outbound);
                if let Err(error) = sink.send(Message::text(envelope.encode())).await {
                    // Best-effort: the disconnect path owns cleanup.
                    debug!(%error, "write failed; dropping remaining output");
                    break;
                }
            }
        });

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Message::Text(text)) => self.dispatcher.dispatch(&connection, text.as_str()),
                Ok(Message::Close(_)) => break,
                // Binary and transport control frames are not channel traffic.
                Ok(_) => {}
                Err(error) => {
                    debug!(client = %connection.id(), %error, "read failed");
                    break;
                }
            }
        }

        self.connections.on_disconnect(connection.id()).await;
        writer.abort();
        info!(client = %connection.id(), "peer disconnected");
    }

    /// Validate an upgrade request before any envelope exchange.
    ///
    /// A path other than the configured endpoint is a 404; a missing `id`
    /// or a secret mismatch is a 401.
    fn screen_upgrade(&self, request: &Request) -> Result<HandshakeParams, ErrorResponse> {
        if request.uri().path() != self.config.endpoint {
            warn!(path = %request.uri().path(), "upgrade to unknown endpoint rejected");
            return Err(reject(StatusCode::NOT_FOUND));
        }
        let query = request.uri().query().unwrap_or("");
        let Some(id) = query_param(query, "id") else {
            warn!("upgrade without client id rejected");
            return Err(reject(StatusCode::UNAUTHORIZED));
        };
        if let Some(expected) = &self.config.secret
            && query_param(query, "secret").as_deref() != Some(expected)
        {
            warn!(client = %id, "upgrade with bad secret rejected");
            return Err(reject(StatusCode::UNAUTHORIZED));
        }
        Ok(HandshakeParams {
            client_id: ClientId::new(id),
        })
    }
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}

/// Extract a query-string parameter. Keys and values are plain tokens; no
/// percent-decoding is applied.
fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::InitFailurePolicy;

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).expect("request")
    }

    fn server(secret: Option<&str>) -> ChannelServer {
        let mut config = ServerConfig::new("srv-1").with_endpoint("/channel");
        if let Some(secret) = secret {
            config = config.with_secret(secret);
        }
        ChannelServer::new(config)
    }

    #[test]
    fn query_param_extracts_pairs() {
        assert_eq!(query_param("id=alice&secret=s", "id").as_deref(), Some("alice"));
        assert_eq!(query_param("id=alice&secret=s", "secret").as_deref(), Some("s"));
        assert_eq!(query_param("id=alice", "secret"), None);
        assert_eq!(query_param("", "id"), None);
        assert_eq!(query_param("id", "id"), None);
    }

    #[test]
    fn wrong_path_is_not_found() {
        let error = server(None)
            .screen_upgrade(&request("/other?id=alice"))
            .err()
            .expect("rejected");
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn missing_id_is_unauthorized() {
        let error = server(None)
            .screen_upgrade(&request("/channel"))
            .err()
            .expect("rejected");
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn secret_mismatch_is_unauthorized() {
        let error = server(Some("hunter2"))
            .screen_upgrade(&request("/channel?id=alice&secret=nope"))
            .err()
            .expect("rejected");
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);

        let error = server(Some("hunter2"))
            .screen_upgrade(&request("/channel?id=alice"))
            .err()
            .expect("rejected");
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn valid_upgrade_extracts_the_client_id() {
        let params = server(Some("hunter2"))
            .screen_upgrade(&request("/channel?id=alice&secret=hunter2"))
            .expect("accepted");
        assert_eq!(params.client_id.as_str(), "alice");
    }

    #[test]
    fn server_without_secret_accepts_any_identified_peer() {
        let params = server(None)
            .screen_upgrade(&request("/channel?id=bob"))
            .expect("accepted");
        assert_eq!(params.client_id.as_str(), "bob");
    }

    #[tokio::test]
    async fn registers_modules_with_the_configured_policy() {
        let config =
            ServerConfig::new("srv-1").with_init_policy(InitFailurePolicy::FailRegistration);
        let server = ChannelServer::new(config);
        let module = Module::builder("m")
            .method("noop", |_| async {
                Ok(crate::module::Outcome::Value(serde_json::Value::Null))
            })
            .expect("method")
            .on_init(|| async { Err(crate::error::WireError::new("InitError", "nope")) })
            .build();
        assert!(server.register(module).await.is_err());
        assert!(server.modules().is_empty());
    }
}
