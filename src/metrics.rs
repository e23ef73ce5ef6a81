//! Metric helpers for `crosswire`.
//!
//! Thin wrappers over the [`metrics`](https://docs.rs/metrics) crate. When
//! the `metrics` feature is disabled every helper compiles to a no-op so
//! call sites stay unconditional.

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "crosswire_connections_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "crosswire_frames_processed_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "crosswire_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy)]
pub enum Direction {
    /// Inbound frames received from a client.
    Inbound,
    /// Outbound frames sent to a client.
    Outbound,
}

impl Direction {
    #[cfg(feature = "metrics")]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

#[cfg(feature = "metrics")]
mod enabled {
    use metrics::{counter, gauge};

    use super::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED};

    /// Increment the active connections gauge.
    pub fn inc_connections() {
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections() {
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    }

    /// Record a processed frame for the given direction.
    pub fn inc_frames(direction: Direction) {
        counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    }

    /// Record an error occurrence.
    pub fn inc_errors() {
        counter!(ERRORS_TOTAL).increment(1);
    }
}

#[cfg(not(feature = "metrics"))]
mod enabled {
    use super::Direction;

    pub fn inc_connections() {}
    pub fn dec_connections() {}
    pub fn inc_frames(_direction: Direction) {}
    pub fn inc_errors() {}
}

pub use enabled::{dec_connections, inc_connections, inc_errors, inc_frames};
