//! Connection and HTTP configuration.
//!
//! Options carry per-connection state only; auth and TLS behavior hang off
//! the connection's own HTTP client instance rather than any process-wide
//! hook.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::transport::TransportKind;

/// Supplies a bearer token for outgoing requests. Called before every HTTP
/// request; returning `None` omits the `Authorization` header.
pub type AccessTokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Options applied to every HTTP request the connection makes.
#[derive(Clone, Default)]
pub struct HttpOptions {
    /// Extra headers included on every request.
    pub headers: HashMap<String, String>,
    /// Bearer token source, applied as `Authorization: Bearer {token}` and
    /// as an `access_token` query parameter where headers cannot be set.
    pub access_token_provider: Option<AccessTokenProvider>,
    /// Per-request timeout. `None` leaves the HTTP client default.
    pub request_timeout: Option<Duration>,
}

impl fmt::Debug for HttpOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOptions")
            .field("headers", &self.headers)
            .field(
                "access_token_provider",
                &self.access_token_provider.as_ref().map(|_| "<provider>"),
            )
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Options governing connection establishment and keep-alive.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Skip the negotiate round trip and connect the single configured
    /// transport directly. Only valid for WebSocket.
    pub skip_negotiation: bool,
    /// Allowed transports, in preference order.
    pub transports: Vec<TransportKind>,
    /// How long to wait for the handshake response before failing `start`.
    pub handshake_timeout: Duration,
    /// Interval between keep-alive pings while no application traffic is
    /// being sent.
    pub keep_alive_interval: Duration,
    /// Treat the connection as lost when no inbound frame (including pings)
    /// arrives within this window.
    pub server_timeout: Duration,
    /// Maximum inbound WebSocket message size.
    pub max_message_size: Option<usize>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            skip_negotiation: false,
            transports: TransportKind::PREFERENCE_ORDER.to_vec(),
            handshake_timeout: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            max_message_size: None,
        }
    }
}
