//! Public types for the hub connection.

use std::fmt;

/// Lifecycle state of a hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; `start` may be called.
    Disconnected,
    /// Negotiation, transport connect, or handshake in progress.
    Connecting,
    /// Handshake accepted; invocations may be issued.
    Connected,
    /// Connection lost, automatic reconnection in progress.
    Reconnecting,
    /// Teardown in progress.
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Disconnecting => "Disconnecting",
        };
        f.write_str(name)
    }
}

/// Identity of one `on` handler registration, used to remove it again.
///
/// Registrations compare by identity, not by target name: two handlers for
/// the same target have distinct registrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistration {
    pub(crate) target: String,
    pub(crate) id: u64,
}

impl HandlerRegistration {
    /// The client-method name this registration is attached to.
    pub fn target(&self) -> &str {
        &self.target
    }
}
