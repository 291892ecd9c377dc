//! Server configuration

use crate::auth::{AuthConfig, HashPolicy};
use std::net::SocketAddr;
use std::time::Duration;

/// Default client port
pub const DEFAULT_PORT: u16 = 4222;

/// How long an unauthenticated client may take to present credentials
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest message payload advertised to clients
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Configuration for a [`GateServer`](crate::server::GateServer)
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Authentication strategy and its parameters
    pub auth: AuthConfig,

    /// Accepted bcrypt cost range for hashed references
    pub hash_policy: HashPolicy,

    /// Deadline for completing authentication after accept
    pub auth_timeout: Duration,

    /// Maximum payload size advertised in INFO
    pub max_payload: usize,
}

impl GateConfig {
    /// Create a new configuration with the given bind address and strategy
    pub fn new(bind_addr: SocketAddr, auth: AuthConfig) -> Self {
        Self {
            bind_addr,
            auth,
            hash_policy: HashPolicy::default(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Set the authentication deadline
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the accepted hash cost range
    pub fn hash_policy(mut self, policy: HashPolicy) -> Self {
        self.hash_policy = policy;
        self
    }

    /// Set the advertised maximum payload
    pub fn max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new(
            SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            AuthConfig::Open,
        )
    }
}
