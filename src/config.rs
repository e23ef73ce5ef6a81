//! Server configuration.
//!
//! [`ServerConfig`] collects the knobs the channel server needs before it
//! can accept upgrades: the endpoint path, the identifier announced in the
//! CONNECT handshake, the optional shared secret, the optional per-call
//! deadline, and the module init-failure policy.

use std::time::Duration;

use crate::module::InitFailurePolicy;

/// Configuration for a [`crate::server::ChannelServer`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Request path accepted for upgrades; anything else is rejected with
    /// a 404 before any envelope exchange.
    pub endpoint: String,
    /// Identifier this server announces in the CONNECT envelope.
    pub server_id: String,
    /// Shared secret peers must present in the upgrade query string. When
    /// `None`, no secret is required.
    pub secret: Option<String>,
    /// Upper bound on a single method call (including awaited futures).
    /// `None` leaves calls unbounded.
    pub call_deadline: Option<Duration>,
    /// What to do when a module's `init` hook fails.
    pub init_policy: InitFailurePolicy,
}

impl ServerConfig {
    /// Create a configuration with the given announced server identifier
    /// and defaults for everything else.
    #[must_use]
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            endpoint: "/".into(),
            server_id: server_id.into(),
            secret: None,
            call_deadline: None,
            init_policy: InitFailurePolicy::default(),
        }
    }

    /// Set the accepted upgrade path.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Require peers to present this secret at upgrade time.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Bound every method call by `deadline`.
    #[must_use]
    pub fn with_call_deadline(mut self, deadline: Duration) -> Self {
        self.call_deadline = Some(deadline);
        self
    }

    /// Choose the module init-failure policy.
    #[must_use]
    pub fn with_init_policy(mut self, policy: InitFailurePolicy) -> Self {
        self.init_policy = policy;
        self
    }
}
