//! Wire envelope codec for the channel protocol.
//!
//! Every frame on the wire is a JSON array whose first element is a small
//! integer event tag. [`Envelope`] is the decoded in-memory form; `encode`
//! and `decode` are exact inverses for every well-formed envelope. The tag
//! values are part of the protocol and must never change.

use serde_json::{Value, json};

use crate::error::WireError;

/// Identifier correlating a request with its responses and continuations.
///
/// Task ids are chosen by the client and are unique only within the scope of
/// the connection that issued the originating INVOKE.
pub type TaskId = i64;

/// Event kinds carried in the first element of every wire frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelEvent {
    Connect,
    Invoke,
    Yield,
    Return,
    Throw,
    Ping,
    Pong,
    Publish,
}

impl ChannelEvent {
    /// Return the stable integer tag for this event.
    #[must_use]
    pub const fn tag(self) -> i64 {
        match self {
            Self::Connect => 0,
            Self::Invoke => 1,
            Self::Yield => 2,
            Self::Return => 3,
            Self::Throw => 4,
            Self::Ping => 5,
            Self::Pong => 6,
            Self::Publish => 7,
        }
    }

    /// Look up the event for a wire tag, if the tag is known.
    #[must_use]
    pub const fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(Self::Connect),
            1 => Some(Self::Invoke),
            2 => Some(Self::Yield),
            3 => Some(Self::Return),
            4 => Some(Self::Throw),
            5 => Some(Self::Ping),
            6 => Some(Self::Pong),
            7 => Some(Self::Publish),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect => "CONNECT",
            Self::Invoke => "INVOKE",
            Self::Yield => "YIELD",
            Self::Return => "RETURN",
            Self::Throw => "THROW",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Publish => "PUBLISH",
        };
        f.write_str(name)
    }
}

/// One decoded wire message.
///
/// The INVOKE tag has two shapes: the five-element request form sent by a
/// client, and the three-element echo ([`Envelope::StreamStart`]) the server
/// sends back when a call produced a stream. The element count disambiguates
/// them on decode.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// Handshake completion, server to client: `[0, "<server-id>"]`.
    Connect { channel: String },
    /// Method invocation request: `[1, taskId, module, method, args]`.
    Invoke {
        task_id: TaskId,
        module: String,
        method: String,
        args: Vec<Value>,
    },
    /// INVOKE echo telling the peer the call is a stream: `[1, taskId, null]`.
    StreamStart { task_id: TaskId },
    /// Stream continuation or step result: `[2, taskId, data]`.
    Yield { task_id: TaskId, data: Value },
    /// Final result or early close: `[3, taskId, data]`.
    Return { task_id: TaskId, data: Value },
    /// Error or injected exception: `[4, taskId, data]`.
    Throw { task_id: TaskId, data: Value },
    /// Liveness probe: `[5, seq]`.
    Ping { seq: i64 },
    /// Liveness answer: `[6, seq]`.
    Pong { seq: i64 },
    /// Out-of-band broadcast, server to client: `[7, topic, data]`.
    Publish { topic: String, data: Value },
}

impl Envelope {
    /// Return the event kind of this envelope.
    #[must_use]
    pub const fn event(&self) -> ChannelEvent {
        match self {
            Self::Connect { .. } => ChannelEvent::Connect,
            Self::Invoke { .. } | Self::StreamStart { .. } => ChannelEvent::Invoke,
            Self::Yield { .. } => ChannelEvent::Yield,
            Self::Return { .. } => ChannelEvent::Return,
            Self::Throw { .. } => ChannelEvent::Throw,
            Self::Ping { .. } => ChannelEvent::Ping,
            Self::Pong { .. } => ChannelEvent::Pong,
            Self::Publish { .. } => ChannelEvent::Publish,
        }
    }

    /// Build a YIELD step result: `{done: false, value}`.
    #[must_use]
    pub fn step(task_id: TaskId, value: Value) -> Self {
        Self::Yield {
            task_id,
            data: json!({ "done": false, "value": value }),
        }
    }

    /// Build the terminal RETURN result: `{done: true}`.
    #[must_use]
    pub fn done(task_id: TaskId) -> Self {
        Self::Return {
            task_id,
            data: json!({ "done": true }),
        }
    }

    /// Build a THROW envelope carrying only the portable `{name, message}`
    /// projection of `error`. Stack traces and internal detail never cross
    /// the wire.
    #[must_use]
    pub fn throw(task_id: TaskId, error: &WireError) -> Self {
        Self::Throw {
            task_id,
            data: error.to_value(),
        }
    }

    /// Encode this envelope as a JSON text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Connect { channel } => json!([ChannelEvent::Connect.tag(), channel]),
            Self::Invoke {
                task_id,
                module,
                method,
                args,
            } => json!([ChannelEvent::Invoke.tag(), task_id, module, method, args]),
            Self::StreamStart { task_id } => {
                json!([ChannelEvent::Invoke.tag(), task_id, Value::Null])
            }
            Self::Yield { task_id, data } => json!([ChannelEvent::Yield.tag(), task_id, data]),
            Self::Return { task_id, data } => json!([ChannelEvent::Return.tag(), task_id, data]),
            Self::Throw { task_id, data } => json!([ChannelEvent::Throw.tag(), task_id, data]),
            Self::Ping { seq } => json!([ChannelEvent::Ping.tag(), seq]),
            Self::Pong { seq } => json!([ChannelEvent::Pong.tag(), seq]),
            Self::Publish { topic, data } => json!([ChannelEvent::Publish.tag(), topic, data]),
        };
        value.to_string()
    }

    /// Decode a text frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the frame is not JSON, is not an array
    /// tagged with a known event, or its elements do not fit the tagged
    /// shape. Callers on the inbound path drop such frames without
    /// surfacing the error to the peer.
    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_str(raw).map_err(CodecError::Json)?;
        let Value::Array(items) = value else {
            return Err(CodecError::NotAnArray);
        };
        let tag = items
            .first()
            .and_then(Value::as_i64)
            .ok_or(CodecError::MissingTag)?;
        let event = ChannelEvent::from_tag(tag).ok_or(CodecError::UnknownTag(tag))?;
        Self::decode_body(event, &items[1..])
    }

    fn decode_body(event: ChannelEvent, body: &[Value]) -> Result<Self, CodecError> {
        let malformed = |detail| CodecError::Shape { event, detail };
        match event {
            ChannelEvent::Connect => {
                let channel = body
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("expected a channel identifier string"))?;
                Ok(Self::Connect {
                    channel: channel.to_owned(),
                })
            }
            ChannelEvent::Invoke => Self::decode_invoke(body),
            ChannelEvent::Yield | ChannelEvent::Return | ChannelEvent::Throw => {
                let (task_id, data) = Self::decode_continuation(event, body)?;
                Ok(match event {
                    ChannelEvent::Yield => Self::Yield { task_id, data },
                    ChannelEvent::Return => Self::Return { task_id, data },
                    _ => Self::Throw { task_id, data },
                })
            }
            ChannelEvent::Ping | ChannelEvent::Pong => {
                let seq = body
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| malformed("expected an integer sequence number"))?;
                Ok(if event == ChannelEvent::Ping {
                    Self::Ping { seq }
                } else {
                    Self::Pong { seq }
                })
            }
            ChannelEvent::Publish => {
                let topic = body
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("expected a topic string"))?;
                let data = body.get(1).cloned().unwrap_or(Value::Null);
                Ok(Self::Publish {
                    topic: topic.to_owned(),
                    data,
                })
            }
        }
    }

    fn decode_invoke(body: &[Value]) -> Result<Self, CodecError> {
        let malformed = |detail| CodecError::Shape {
            event: ChannelEvent::Invoke,
            detail,
        };
        let task_id = body
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| malformed("expected an integer task id"))?;
        // Three-element form is the server's stream-start echo.
        if body.len() < 3 {
            return Ok(Self::StreamStart { task_id });
        }
        let module = body
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("expected a module name string"))?;
        let method = body
            .get(2)
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("expected a method name string"))?;
        let args = match body.get(3) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args.clone(),
            Some(_) => return Err(malformed("expected an argument array")),
        };
        Ok(Self::Invoke {
            task_id,
            module: module.to_owned(),
            method: method.to_owned(),
            args,
        })
    }

    fn decode_continuation(
        event: ChannelEvent,
        body: &[Value],
    ) -> Result<(TaskId, Value), CodecError> {
        let task_id = body
            .first()
            .and_then(Value::as_i64)
            .ok_or(CodecError::Shape {
                event,
                detail: "expected an integer task id",
            })?;
        let data = body.get(1).cloned().unwrap_or(Value::Null);
        Ok((task_id, data))
    }
}

/// Failure to decode a raw frame into an [`Envelope`].
///
/// Malformed frames are dropped by the dispatcher rather than surfaced to
/// the peer, so stray traffic on the socket never crashes the protocol.
#[derive(Debug)]
pub enum CodecError {
    /// The frame was not valid JSON.
    Json(serde_json::Error),
    /// The frame decoded to something other than a JSON array.
    NotAnArray,
    /// The array was empty or its first element was not an integer.
    MissingTag,
    /// The integer tag does not name a known event.
    UnknownTag(i64),
    /// The elements after the tag do not fit the event's wire shape.
    Shape {
        event: ChannelEvent,
        detail: &'static str,
    },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(error) => write!(f, "frame is not valid JSON: {error}"),
            Self::NotAnArray => f.write_str("frame is not a JSON array"),
            Self::MissingTag => f.write_str("frame has no integer event tag"),
            Self::UnknownTag(tag) => write!(f, "unknown event tag {tag}"),
            Self::Shape { event, detail } => write!(f, "malformed {event} frame: {detail}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(error) => Some(error),
            _ => None,
        }
    }
}
