#![doc(html_root_url = "https://docs.rs/crosswire/latest")]
//! Public API for the `crosswire` library.
//!
//! `crosswire` is an RPC channel protocol and server runtime: remote peers
//! invoke methods on registered server-side modules over one persistent
//! WebSocket connection, with plain request/response calls, generator-backed
//! streaming calls, server-initiated publish/subscribe, and ping/pong
//! liveness checks.

pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod module;
pub mod push;
pub mod server;
pub mod session;
pub mod task;

pub use broadcast::Broadcaster;
pub use config::ServerConfig;
pub use dispatch::Dispatcher;
pub use envelope::{ChannelEvent, CodecError, Envelope, TaskId};
pub use error::{ChannelError, WireError};
pub use generator::{Generator, StreamGenerator, ValueStream};
pub use module::{
    InitFailurePolicy,
    Module,
    ModuleBuilder,
    ModuleRegistry,
    Outcome,
    ReadyState,
    RegistryError,
};
pub use push::{PushError, PushHandle, PushPolicy, PushPriority, PushQueues};
pub use server::ChannelServer;
pub use session::{ClientId, Connection, ConnectionRegistry};
pub use task::{Continuation, TaskTable};
