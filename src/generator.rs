//! Pull-based generator seam bridging streaming calls to discrete wire events.
//!
//! A streaming invocation suspends between continuations; the task manager
//! advances it only when the client sends YIELD, closes it on RETURN, and
//! injects an exception on THROW. [`Generator`] is the trait handlers return
//! for streaming results, and [`StreamGenerator`] adapts any ordinary
//! [`Stream`] of values to it. The underlying stream is polled only when a
//! continuation arrives, never eagerly, preserving pull semantics.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::WireError;

/// Boxed stream of JSON values used by [`StreamGenerator`].
pub type ValueStream = Pin<Box<dyn Stream<Item = Result<Value, WireError>> + Send + 'static>>;

/// Suspended execution state of a streaming method call.
#[async_trait]
pub trait Generator: Send {
    /// Advance the stream with a client-supplied input value.
    ///
    /// `Ok(Some(value))` is a produced item, `Ok(None)` is exhaustion.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] when the stream's own logic fails; the task
    /// is closed and the error is surfaced as a THROW to the peer.
    async fn resume(&mut self, input: Value) -> Result<Option<Value>, WireError>;

    /// Inject an exception into the suspended stream.
    ///
    /// The default propagates the error, terminating the stream. An
    /// implementation may handle it instead and keep producing values.
    ///
    /// # Errors
    ///
    /// Returns the propagated error when the generator does not handle it.
    async fn throw(&mut self, error: WireError) -> Result<Option<Value>, WireError> {
        Err(error)
    }

    /// Release the generator's resources. Idempotent; called on early
    /// RETURN and on forced closure when the owning connection goes away.
    async fn close(&mut self) {}
}

/// Adapter exposing an ordinary value stream as a [`Generator`].
///
/// Resume inputs are ignored, thrown errors propagate, and the stream fuses
/// after its first end or error.
pub struct StreamGenerator {
    stream: Option<ValueStream>,
}

impl StreamGenerator {
    /// Wrap `stream` in a generator.
    #[must_use]
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, WireError>> + Send + 'static,
    {
        Self {
            stream: Some(Box::pin(stream)),
        }
    }
}

#[async_trait]
impl Generator for StreamGenerator {
    async fn resume(&mut self, _input: Value) -> Result<Option<Value>, WireError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match stream.next().await {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(error)) => {
                self.stream = None;
                Err(error)
            }
            None => {
                self.stream = None;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.stream = None;
    }
}
