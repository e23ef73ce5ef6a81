//! Prioritized outbound queues feeding a connection's writer task.
//!
//! Each connection owns a pair of bounded channels: control frames
//! (CONNECT, PONG) ride the high-priority lane so liveness answers are
//! never stuck behind bulk stream traffic, and everything else rides the
//! low-priority lane. Producers hold a cloneable [`PushHandle`]; the writer
//! drains via [`PushQueues::recv`], which prefers the high lane. Sends are
//! best-effort: once the peer is gone the queues close and frames are
//! silently dropped, with cleanup left to the disconnect path.

use std::{sync::Arc, time::Duration};

use leaky_bucket::RateLimiter;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::Envelope;

/// Priority lane for an outbound envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushPriority {
    /// Control traffic: handshake and liveness answers.
    High,
    /// Call responses, stream results and broadcasts.
    Low,
}

impl PushPriority {
    /// The lane an envelope of this kind belongs to.
    #[must_use]
    pub fn for_envelope(envelope: &Envelope) -> Self {
        match envelope {
            Envelope::Connect { .. } | Envelope::Pong { .. } => Self::High,
            _ => Self::Low,
        }
    }
}

/// Behaviour when a push queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushPolicy {
    /// Return an error to the caller if the queue is full.
    ReturnErrorIfFull,
    /// Silently drop the envelope.
    DropIfFull,
    /// Drop the envelope but emit a log warning.
    WarnAndDropIfFull,
}

/// Errors that can occur when pushing an envelope.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    /// The queue was at capacity and the policy was `ReturnErrorIfFull`.
    QueueFull,
    /// The receiving end of the queue has been dropped.
    Closed,
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull => f.write_str("push queue full"),
            Self::Closed => f.write_str("push queue closed"),
        }
    }
}

impl std::error::Error for PushError {}

struct PushHandleInner {
    high_tx: mpsc::Sender<Envelope>,
    low_tx: mpsc::Sender<Envelope>,
    limiter: Option<RateLimiter>,
}

/// Cloneable handle used by producers to queue envelopes for a connection.
#[derive(Clone)]
pub struct PushHandle(Arc<PushHandleInner>);

impl PushHandle {
    fn lane(&self, priority: PushPriority) -> &mpsc::Sender<Envelope> {
        match priority {
            PushPriority::High => &self.0.high_tx,
            PushPriority::Low => &self.0.low_tx,
        }
    }

    /// Queue an envelope, waiting for capacity (and the rate limiter, if
    /// configured).
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Closed`] if the writer side has gone away.
    pub async fn push(&self, envelope: Envelope) -> Result<(), PushError> {
        let priority = PushPriority::for_envelope(&envelope);
        if let Some(limiter) = &self.0.limiter {
            limiter.acquire(1).await;
        }
        self.lane(priority)
            .send(envelope)
            .await
            .map_err(|_| PushError::Closed)?;
        debug!(?priority, "envelope queued");
        Ok(())
    }

    /// Queue an envelope without waiting, applying `policy` when full.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::QueueFull`] under
    /// [`PushPolicy::ReturnErrorIfFull`], or [`PushError::Closed`] if the
    /// writer side has gone away.
    pub fn try_push(&self, envelope: Envelope, policy: PushPolicy) -> Result<(), PushError> {
        let priority = PushPriority::for_envelope(&envelope);
        match self.lane(priority).try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => match policy {
                PushPolicy::ReturnErrorIfFull => Err(PushError::QueueFull),
                PushPolicy::DropIfFull => Ok(()),
                PushPolicy::WarnAndDropIfFull => {
                    warn!(?priority, "push queue full; envelope dropped");
                    Ok(())
                }
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PushError::Closed),
        }
    }
}

/// Receiver ends of the push queues, held by the connection's writer task.
pub struct PushQueues {
    high_rx: mpsc::Receiver<Envelope>,
    low_rx: mpsc::Receiver<Envelope>,
}

impl PushQueues {
    /// Create bounded queues and the matching producer handle.
    #[must_use]
    pub fn bounded(high_capacity: usize, low_capacity: usize) -> (Self, PushHandle) {
        Self::bounded_with_rate(high_capacity, low_capacity, None)
    }

    /// Create bounded queues whose handle admits at most `rate` pushes per
    /// second when a rate is given.
    #[must_use]
    pub fn bounded_with_rate(
        high_capacity: usize,
        low_capacity: usize,
        rate: Option<usize>,
    ) -> (Self, PushHandle) {
        let (high_tx, high_rx) = mpsc::channel(high_capacity);
        let (low_tx, low_rx) = mpsc::channel(low_capacity);
        let limiter = rate.map(|r| {
            RateLimiter::builder()
                .initial(r)
                .refill(r)
                .interval(Duration::from_secs(1))
                .max(r)
                .build()
        });
        (
            Self { high_rx, low_rx },
            PushHandle(Arc::new(PushHandleInner {
                high_tx,
                low_tx,
                limiter,
            })),
        )
    }

    /// Receive the next envelope, preferring the high-priority lane.
    ///
    /// Returns `None` when both lanes are closed and drained.
    pub async fn recv(&mut self) -> Option<(PushPriority, Envelope)> {
        tokio::select! {
            biased;
            res = self.high_rx.recv() => res.map(|e| (PushPriority::High, e)),
            res = self.low_rx.recv() => res.map(|e| (PushPriority::Low, e)),
        }
    }

    /// Close both lanes so further pushes fail with [`PushError::Closed`].
    pub fn close(&mut self) {
        self.high_rx.close();
        self.low_rx.close();
    }
}
