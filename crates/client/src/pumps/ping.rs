//! Keep-alive ping pump.

use std::time::Duration;

use hublink_protocol::HubMessage;
use tokio_util::sync::CancellationToken;

use crate::pumps::write::OutboundHandle;

/// Sends a protocol `Ping` on each interval tick while no application
/// traffic has gone out since the previous tick. Exits when the transport
/// closes or the connection is torn down.
pub(crate) async fn ping_pump(
    outbound: OutboundHandle,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if outbound.idle_for() < interval {
                    continue;
                }
                if outbound.send_message(&HubMessage::Ping).await.is_err() {
                    break;
                }
            }
        }
    }
}
