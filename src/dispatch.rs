//! The protocol state machine routing decoded envelopes.
//!
//! One reader task per connection feeds raw frames into
//! [`Dispatcher::dispatch`]; every INVOKE and continuation is then handled
//! as its own spawned unit of work. Completion order across different
//! envelopes on the same connection is deliberately unordered — a slow
//! INVOKE must never delay a concurrent PING — while continuations of a
//! single task stay serialized through the task table's per-task lock.
//!
//! Errors raised by module methods or generators never tear down the
//! connection: they are narrowed to `{name, message}` and answered as a
//! THROW scoped to the originating task id.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::{
    envelope::{Envelope, TaskId},
    error::{ChannelError, WireError},
    metrics,
    module::{ModuleRegistry, Outcome},
    session::Connection,
    task::Continuation,
};

/// Routes decoded envelopes to invocation, continuation, and liveness
/// handling. Cheap to clone; registries are shared behind `Arc`.
#[derive(Clone)]
pub struct Dispatcher {
    modules: Arc<ModuleRegistry>,
    call_deadline: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher over the given module registry.
    ///
    /// When `call_deadline` is set, a handler or awaited future that runs
    /// longer produces a THROW instead of retaining resources indefinitely.
    #[must_use]
    pub fn new(modules: Arc<ModuleRegistry>, call_deadline: Option<Duration>) -> Self {
        Self {
            modules,
            call_deadline,
        }
    }

    /// Decode and route one raw text frame from `connection`.
    ///
    /// Malformed frames are dropped without any reply to the peer, so
    /// stray traffic on the socket never disturbs the protocol. INVOKE and
    /// continuation events are processed fire-and-forget on their own
    /// spawned tasks; PING is answered inline.
    pub fn dispatch(&self, connection: &Arc<Connection>, raw: &str) {
        metrics::inc_frames(metrics::Direction::Inbound);
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                let error = ChannelError::from_codec(error);
                debug!(client = %connection.id(), %error, "frame dropped");
                metrics::inc_errors();
                return;
            }
        };
        trace!(client = %connection.id(), event = %envelope.event(), "frame received");

        match envelope {
            Envelope::Invoke {
                task_id,
                module,
                method,
                args,
            } => {
                let dispatcher = self.clone();
                let connection = Arc::clone(connection);
                tokio::spawn(async move {
                    dispatcher
                        .run_invoke(&connection, task_id, &module, &method, args)
                        .await;
                });
            }
            Envelope::Yield { task_id, data } => {
                Self::spawn_continuation(connection, task_id, Continuation::Resume(data));
            }
            Envelope::Return { task_id, .. } => {
                Self::spawn_continuation(connection, task_id, Continuation::Close);
            }
            Envelope::Throw { task_id, data } => {
                // Reconstruct the typed error before it reaches the
                // generator's throw path; unstructured payloads degrade to
                // a generic name carrying the raw text.
                let error = WireError::from_value(&data)
                    .unwrap_or_else(|| WireError::new("Error", data.to_string()));
                Self::spawn_continuation(connection, task_id, Continuation::Inject(error));
            }
            Envelope::Ping { seq } => {
                // Answered inline on the high-priority lane so liveness
                // never queues behind call traffic.
                connection.try_send(Envelope::Pong { seq });
            }
            Envelope::Connect { .. }
            | Envelope::StreamStart { .. }
            | Envelope::Pong { .. }
            | Envelope::Publish { .. } => {
                // Server-originated events are not accepted from peers.
                trace!(client = %connection.id(), event = %envelope.event(), "ignoring peer frame");
            }
        }
    }

    fn spawn_continuation(
        connection: &Arc<Connection>,
        task_id: TaskId,
        continuation: Continuation,
    ) {
        let connection = Arc::clone(connection);
        tokio::spawn(async move {
            let reply = connection.tasks().continue_task(task_id, continuation).await;
            connection.send(reply).await;
        });
    }

    async fn run_invoke(
        &self,
        connection: &Arc<Connection>,
        task_id: TaskId,
        module: &str,
        method: &str,
        args: Vec<Value>,
    ) {
        let reply = match self.modules.resolve(module, method) {
            Err(error) => {
                metrics::inc_errors();
                Envelope::throw(task_id, &error.to_wire())
            }
            Ok(handler) => match self.call(handler(args), module, method).await {
                Ok(Outcome::Value(value)) => Envelope::Return {
                    task_id,
                    data: value,
                },
                Ok(Outcome::Stream(generator)) => {
                    connection.tasks().insert(task_id, generator).await;
                    Envelope::StreamStart { task_id }
                }
                Err(error) => {
                    metrics::inc_errors();
                    Envelope::throw(task_id, &error.to_wire())
                }
            },
        };
        connection.send(reply).await;
    }

    async fn call(
        &self,
        call: impl Future<Output = Result<Outcome, WireError>>,
        module: &str,
        method: &str,
    ) -> Result<Outcome, ChannelError> {
        match self.call_deadline {
            None => call.await.map_err(ChannelError::Call),
            Some(deadline) => match timeout(deadline, call).await {
                Ok(result) => result.map_err(ChannelError::Call),
                Err(_) => Err(ChannelError::Deadline {
                    module: module.to_owned(),
                    method: method.to_owned(),
                }),
            },
        }
    }
}
