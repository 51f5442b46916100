//! Transports carrying hub protocol frames.
//!
//! Every variant connects into the same channel-based handle: an outbound
//! frame sender drained by a single write task (one write at a time on the
//! wire), an inbound frame receiver fed by a single read task, and a
//! cancellation token tearing both down. The inbound channel closing is the
//! transport-loss signal.

pub(crate) mod long_polling;
pub(crate) mod sse;
pub(crate) mod websocket;

use hublink_protocol::TransferFormat;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::negotiate::AvailableTransport;

/// The transports this client can establish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    ServerSentEvents,
    LongPolling,
}

impl TransportKind {
    /// Highest to lowest preference.
    pub const PREFERENCE_ORDER: [Self; 3] =
        [Self::WebSocket, Self::ServerSentEvents, Self::LongPolling];

    /// The name used in negotiation payloads.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WebSocket => "WebSocket",
            Self::ServerSentEvents => "ServerSentEvents",
            Self::LongPolling => "LongPolling",
        }
    }

    /// Whether this transport can carry the given encoding. SSE is a text
    /// protocol and cannot carry binary frames.
    pub fn supports(&self, format: TransferFormat) -> bool {
        match self {
            Self::ServerSentEvents => format == TransferFormat::Text,
            Self::WebSocket | Self::LongPolling => true,
        }
    }
}

/// Errors internal to the transport layer; normalized into
/// [`crate::ConnectionError`] before reaching the application.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid transport url: {0}")]
    Url(String),
}

/// A connected transport.
pub(crate) struct TransportConnection {
    pub kind: TransportKind,
    /// Frames to write, in order. One complete protocol record per send.
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Frames as received. Closes when the transport is lost or closed.
    pub inbound: mpsc::Receiver<Vec<u8>>,
    /// Cancels the transport's internal tasks.
    pub cancel: CancellationToken,
    pub tasks: Vec<JoinHandle<()>>,
}

impl TransportConnection {
    /// Signals the transport to shut down. Tasks finish their own cleanup
    /// (close frames, DELETE for long-polling) before exiting.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn abort_tasks(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Builds the transport endpoint: `{base}?id={connection_id}`. Negotiation
/// can be skipped, in which case there is no id to append.
pub(crate) fn transport_url(base: &Url, connection_id: Option<&str>) -> Url {
    let mut url = base.clone();
    if let Some(id) = connection_id {
        url.query_pairs_mut().append_pair("id", id);
    }
    url
}

/// Picks the first allowed transport that the server offers with a
/// compatible transfer format. Used once per connection attempt; a selected
/// transport that then fails to connect is surfaced as a failure rather
/// than falling back within the attempt.
pub(crate) fn select_transport(
    allowed: &[TransportKind],
    available: &[AvailableTransport],
    format: TransferFormat,
) -> Option<TransportKind> {
    allowed.iter().copied().find(|kind| {
        kind.supports(format)
            && available.iter().any(|offer| {
                offer.transport == kind.name()
                    && (offer.transfer_formats.is_empty()
                        || offer.transfer_formats.iter().any(|f| f == format.as_str()))
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(transport: &str, formats: &[&str]) -> AvailableTransport {
        AvailableTransport {
            transport: transport.into(),
            transfer_formats: formats.iter().map(|f| (*f).into()).collect(),
        }
    }

    #[test]
    fn websocket_preferred_when_available() {
        let available = vec![
            offer("LongPolling", &["Text", "Binary"]),
            offer("WebSocket", &["Text", "Binary"]),
        ];
        let selected = select_transport(
            &TransportKind::PREFERENCE_ORDER,
            &available,
            TransferFormat::Text,
        );
        assert_eq!(selected, Some(TransportKind::WebSocket));
    }

    #[test]
    fn sse_skipped_for_binary_format() {
        let available = vec![
            offer("ServerSentEvents", &["Text"]),
            offer("LongPolling", &["Text", "Binary"]),
        ];
        let selected = select_transport(
            &TransportKind::PREFERENCE_ORDER,
            &available,
            TransferFormat::Binary,
        );
        assert_eq!(selected, Some(TransportKind::LongPolling));
    }

    #[test]
    fn allowed_list_filters_and_orders() {
        let available = vec![
            offer("WebSocket", &["Text"]),
            offer("LongPolling", &["Text"]),
        ];
        let selected = select_transport(
            &[TransportKind::LongPolling, TransportKind::WebSocket],
            &available,
            TransferFormat::Text,
        );
        assert_eq!(selected, Some(TransportKind::LongPolling));
    }

    #[test]
    fn nothing_compatible_selects_none() {
        let available = vec![offer("ServerSentEvents", &["Text"])];
        let selected = select_transport(
            &[TransportKind::WebSocket],
            &available,
            TransferFormat::Text,
        );
        assert_eq!(selected, None);
    }

    #[test]
    fn transport_url_appends_id() {
        let base = Url::parse("https://example.com/hub?tenant=7").unwrap();
        let url = transport_url(&base, Some("abc"));
        assert_eq!(url.as_str(), "https://example.com/hub?tenant=7&id=abc");
        let bare = transport_url(&base, None);
        assert_eq!(bare.as_str(), "https://example.com/hub?tenant=7");
    }
}
