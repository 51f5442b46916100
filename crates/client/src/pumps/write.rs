//! Serialized outbound write path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hublink_protocol::{HubMessage, HubProtocol};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

use crate::error::ConnectionError;

/// Clone-able handle through which every outbound message is encoded and
/// handed to the transport. The transport's write task drains the channel
/// one frame at a time, so concurrent senders are queued, never interleaved
/// on the wire.
#[derive(Clone)]
pub(crate) struct OutboundHandle {
    sender: mpsc::Sender<Vec<u8>>,
    protocol: Arc<dyn HubProtocol>,
    last_send: Arc<Mutex<Instant>>,
}

impl OutboundHandle {
    pub(crate) fn new(sender: mpsc::Sender<Vec<u8>>, protocol: Arc<dyn HubProtocol>) -> Self {
        Self {
            sender,
            protocol,
            last_send: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Encodes and queues one message. An error here is always local:
    /// either the message failed to encode or the transport is gone.
    pub(crate) async fn send_message(
        &self,
        message: &HubMessage,
    ) -> Result<(), ConnectionError> {
        let frame = self.protocol.write_message(message)?;
        trace!(kind = message.kind_name(), bytes = frame.len(), "sending");
        self.sender
            .send(frame)
            .await
            .map_err(|_| ConnectionError::ConnectionLost("transport closed".into()))?;
        if let Ok(mut last) = self.last_send.lock() {
            *last = Instant::now();
        }
        Ok(())
    }

    /// Time since the last outbound message, for keep-alive pacing.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_send
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}
