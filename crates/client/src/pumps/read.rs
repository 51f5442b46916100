//! Inbound dispatch loop.
//!
//! One task per connection decodes every received frame and routes it:
//! server-initiated invocations to the handler table, correlated messages
//! to the invocation registry. The loop also owns the server-timeout
//! deadline; any inbound frame (pings included) resets it.

use std::sync::Arc;
use std::time::Duration;

use hublink_protocol::{HubMessage, HubProtocol};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::handlers::HandlerMap;
use crate::registry::InvocationRegistry;

/// Why the inbound loop ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReadOutcome {
    /// The server sent a Close message.
    ServerClose {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// The transport's inbound stream ended or failed.
    TransportClosed,
    /// No inbound frame arrived within the server timeout.
    ServerTimeout,
    /// Local teardown; the initiator handles cleanup.
    Cancelled,
}

pub(crate) struct ReadContext {
    pub protocol: Arc<dyn HubProtocol>,
    pub registry: Arc<InvocationRegistry>,
    pub handlers: HandlerMap,
    pub server_timeout: Duration,
}

pub(crate) async fn read_pump(
    mut inbound: mpsc::Receiver<Vec<u8>>,
    initial: Vec<u8>,
    ctx: ReadContext,
    cancel: CancellationToken,
) -> ReadOutcome {
    let mut buffer = Vec::new();

    // Messages queued behind the handshake response in the same transport
    // frame are dispatched before anything else.
    if !initial.is_empty()
        && let Some(outcome) = dispatch_frame(&ctx, &mut buffer, &initial).await
    {
        return outcome;
    }

    let deadline = tokio::time::sleep(ctx.server_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ReadOutcome::Cancelled,

            () = &mut deadline => {
                warn!(
                    timeout = ?ctx.server_timeout,
                    "no inbound frame within server timeout"
                );
                return ReadOutcome::ServerTimeout;
            }

            frame = inbound.recv() => {
                match frame {
                    Some(data) => {
                        deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + ctx.server_timeout);
                        if let Some(outcome) =
                            dispatch_frame(&ctx, &mut buffer, &data).await
                        {
                            return outcome;
                        }
                    }
                    None => {
                        debug!("transport inbound stream ended");
                        return ReadOutcome::TransportClosed;
                    }
                }
            }
        }
    }
}

async fn dispatch_frame(
    ctx: &ReadContext,
    buffer: &mut Vec<u8>,
    data: &[u8],
) -> Option<ReadOutcome> {
    for parsed in ctx.protocol.parse_frames(buffer, data) {
        match parsed {
            Ok(message) => {
                if let Some(outcome) = dispatch_message(ctx, message).await {
                    return Some(outcome);
                }
            }
            Err(e) => warn!("dropping malformed frame: {e}"),
        }
    }
    None
}

async fn dispatch_message(ctx: &ReadContext, message: HubMessage) -> Option<ReadOutcome> {
    trace!(kind = message.kind_name(), id = ?message.invocation_id(), "received");
    match message {
        HubMessage::Invocation {
            target, arguments, ..
        } => {
            let handlers = ctx.handlers.snapshot(&target);
            if handlers.is_empty() {
                debug!(method = %target, "no handler registered, ignoring invocation");
            }
            for handler in handlers {
                handler(arguments.clone());
            }
        }
        HubMessage::StreamItem {
            invocation_id,
            item,
        } => {
            if !ctx.registry.stream_item(&invocation_id, item).await {
                trace!(id = %invocation_id, "stream item for unknown invocation, ignoring");
            }
        }
        HubMessage::Completion {
            invocation_id,
            result,
            error,
        } => {
            if !ctx.registry.complete(&invocation_id, result, error).await {
                trace!(id = %invocation_id, "completion for unknown invocation, ignoring");
            }
        }
        HubMessage::CancelInvocation { invocation_id } => {
            if !ctx.registry.server_cancel(&invocation_id).await {
                trace!(id = %invocation_id, "cancel for unknown stream, ignoring");
            }
        }
        // The deadline was already reset when the frame arrived.
        HubMessage::Ping => {}
        HubMessage::StreamInvocation { target, .. } => {
            warn!(method = %target, "server requested a client stream, not supported");
        }
        HubMessage::Close {
            error,
            allow_reconnect,
        } => {
            debug!(?error, allow_reconnect, "server closed the connection");
            return Some(ReadOutcome::ServerClose {
                error,
                allow_reconnect,
            });
        }
    }
    None
}
