//! Canonical error types for the channel protocol.
//!
//! [`ChannelError`] is the dispatcher-facing taxonomy; every variant that
//! reaches a peer is first narrowed to a [`WireError`], the portable
//! `{name, message}` projection defined by the wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::envelope::{CodecError, TaskId};

/// The `{name, message}` error shape that crosses the wire.
///
/// Application errors of any origin are reduced to this pair before
/// serialization; the inbound THROW path reconstructs it so generators
/// receive a typed error rather than a raw map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub name: String,
    pub message: String,
}

impl WireError {
    /// Create a wire error with the given name and message.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Project this error into its JSON wire form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({ "name": self.name, "message": self.message })
    }

    /// Reconstruct a wire error from a structured `{name, message}` payload.
    ///
    /// Returns `None` when the payload does not carry both fields, in which
    /// case callers fall back to a generic error wrapping the raw payload.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?;
        let message = value.get("message")?.as_str()?;
        Some(Self::new(name, message))
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for WireError {}

/// Top-level error type for protocol handling.
#[derive(Debug)]
pub enum ChannelError {
    /// An undecodable frame. Dropped on the inbound path, never surfaced.
    Malformed(CodecError),
    /// The named module is unknown or not ready for invocation.
    Unavailable { module: String },
    /// A continuation referenced a task id with no registered task.
    UnknownTask { task_id: TaskId },
    /// An application error raised by a handler or a generator.
    Call(WireError),
    /// A call exceeded the configured per-call deadline.
    Deadline { module: String, method: String },
}

impl ChannelError {
    /// Convert a codec failure into a `ChannelError`.
    #[must_use]
    pub fn from_codec(error: CodecError) -> Self {
        Self::Malformed(error)
    }

    /// Narrow this error to the `{name, message}` pair sent to peers.
    #[must_use]
    pub fn to_wire(&self) -> WireError {
        match self {
            Self::Malformed(error) => WireError::new("MalformedMessageError", error.to_string()),
            Self::Unavailable { module } => WireError::new(
                "UnavailableError",
                format!("module '{module}' is unknown or not ready"),
            ),
            Self::UnknownTask { task_id } => WireError::new(
                "ReferenceError",
                format!("no task {task_id} is registered on this connection"),
            ),
            Self::Call(error) => error.clone(),
            Self::Deadline { module, method } => WireError::new(
                "DeadlineError",
                format!("call to {module}.{method} exceeded the configured deadline"),
            ),
        }
    }
}

impl From<WireError> for ChannelError {
    fn from(error: WireError) -> Self {
        Self::Call(error)
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(error) => write!(f, "malformed frame: {error}"),
            Self::Unavailable { module } => {
                write!(f, "module '{module}' is unknown or not ready")
            }
            Self::UnknownTask { task_id } => write!(f, "unknown task {task_id}"),
            Self::Call(error) => write!(f, "call failed: {error}"),
            Self::Deadline { module, method } => {
                write!(f, "call to {module}.{method} exceeded its deadline")
            }
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Malformed(error) => Some(error),
            Self::Call(error) => Some(error),
            _ => None,
        }
    }
}
