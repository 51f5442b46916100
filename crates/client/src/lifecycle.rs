//! Connection lifecycle: establishment, teardown, and the reconnect loop.
//!
//! Free functions over the shared [`ConnectionCore`] so the same paths
//! serve `start`, connection-loss handling, and reconnection.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use hublink_protocol::handshake::{
    HandshakeRequest, parse_handshake_response, write_handshake_request,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::connection::{ActiveTransport, ConnectionCore};
use crate::error::ConnectionError;
use crate::negotiate::negotiate;
use crate::pumps::ping::ping_pump;
use crate::pumps::read::{ReadContext, ReadOutcome, read_pump};
use crate::pumps::write::OutboundHandle;
use crate::reconnect::RetryContext;
use crate::transport::{
    TransportConnection, TransportKind, long_polling, select_transport, sse, transport_url,
    websocket,
};
use crate::types::ConnectionState;

/// A transport that has completed the handshake but is not yet installed.
pub(crate) struct Established {
    pub transport: TransportConnection,
    /// Hub message bytes that arrived in the same frame as the handshake
    /// response.
    pub rest: Vec<u8>,
    pub connection_id: Option<String>,
}

/// Negotiation → transport connect → handshake. On failure the transport is
/// torn down and the error surfaced; no lower-preference transport is tried
/// within the same attempt.
pub(crate) async fn establish(core: &Arc<ConnectionCore>) -> Result<Established, ConnectionError> {
    let format = core.protocol.transfer_format();

    let (kind, endpoint, connection_id) = if core.options.skip_negotiation {
        if !core.options.transports.contains(&TransportKind::WebSocket) {
            return Err(ConnectionError::Negotiate(
                "skipping negotiation requires the WebSocket transport".into(),
            ));
        }
        (TransportKind::WebSocket, core.url.clone(), None)
    } else {
        let negotiated = negotiate(&core.http, &core.url).await?;
        let kind = select_transport(
            &core.options.transports,
            &negotiated.available_transports,
            format,
        )
        .ok_or_else(|| {
            ConnectionError::Negotiate("no compatible transport available".into())
        })?;
        let endpoint = transport_url(&negotiated.url, Some(negotiated.transport_query_id()));
        (kind, endpoint, Some(negotiated.connection_id))
    };

    info!(transport = kind.name(), url = %endpoint, "connecting transport");
    let transport = connect_transport(core, kind, &endpoint)
        .await
        .map_err(|e| ConnectionError::TransportConnect(e.to_string()))?;

    match handshake(core, transport).await {
        Ok((transport, rest)) => Ok(Established {
            transport,
            rest,
            connection_id,
        }),
        Err(e) => Err(e),
    }
}

async fn connect_transport(
    core: &Arc<ConnectionCore>,
    kind: TransportKind,
    endpoint: &Url,
) -> Result<TransportConnection, crate::transport::TransportError> {
    match kind {
        TransportKind::WebSocket => {
            websocket::connect(
                endpoint,
                &core.http,
                core.protocol.transfer_format(),
                core.options.max_message_size,
            )
            .await
        }
        TransportKind::ServerSentEvents => sse::connect(endpoint, core.http.clone()).await,
        TransportKind::LongPolling => long_polling::connect(endpoint, core.http.clone()).await,
    }
}

/// Sends the handshake request and waits for the response within the
/// handshake timeout. The transport is torn down on any failure.
async fn handshake(
    core: &Arc<ConnectionCore>,
    mut transport: TransportConnection,
) -> Result<(TransportConnection, Vec<u8>), ConnectionError> {
    let request = HandshakeRequest::new(core.protocol.name(), core.protocol.version());
    let frame = write_handshake_request(&request)?;
    if transport.outbound.send(frame).await.is_err() {
        discard(transport);
        return Err(ConnectionError::TransportConnect(
            "transport closed during handshake".into(),
        ));
    }

    let wait = tokio::time::timeout(core.options.handshake_timeout, async {
        let mut buffer = Vec::new();
        loop {
            let Some(data) = transport.inbound.recv().await else {
                return Err(ConnectionError::TransportConnect(
                    "transport closed during handshake".into(),
                ));
            };
            // A handshake parse failure is fatal to the attempt, unlike
            // post-handshake frame errors which are merely dropped.
            match parse_handshake_response(&mut buffer, &data)? {
                Some((response, rest)) => {
                    return match response.error {
                        Some(error) => Err(ConnectionError::HandshakeRejected(error)),
                        None => Ok(rest),
                    };
                }
                None => continue,
            }
        }
    })
    .await;

    match wait {
        Ok(Ok(rest)) => {
            debug!("handshake accepted");
            Ok((transport, rest))
        }
        Ok(Err(e)) => {
            discard(transport);
            Err(e)
        }
        Err(_) => {
            discard(transport);
            Err(ConnectionError::HandshakeTimeout)
        }
    }
}

fn discard(transport: TransportConnection) {
    transport.close();
    transport.abort_tasks();
}

/// Installs an established transport: spawns the keep-alive and inbound
/// pumps and moves the connection to Connected.
pub(crate) async fn install(core: &Arc<ConnectionCore>, established: Established) {
    let Established {
        transport,
        rest,
        connection_id,
    } = established;
    let TransportConnection {
        kind,
        outbound,
        inbound,
        cancel,
        mut tasks,
    } = transport;

    let outbound = OutboundHandle::new(outbound, core.protocol.clone());
    if let Ok(mut id) = core.connection_id.lock() {
        *id = connection_id;
    }

    tasks.push(tokio::spawn(ping_pump(
        outbound.clone(),
        core.options.keep_alive_interval,
        cancel.clone(),
    )));

    let supervisor = {
        let core = core.clone();
        let cancel = cancel.clone();
        let context = ReadContext {
            protocol: core.protocol.clone(),
            registry: core.registry.clone(),
            handlers: core.handlers.clone(),
            server_timeout: core.options.server_timeout,
        };
        tokio::spawn(async move {
            let outcome = read_pump(inbound, rest, context, cancel).await;
            handle_connection_down(&core, outcome).await;
        })
    };
    tasks.push(supervisor);

    *core.active.lock().await = Some(ActiveTransport {
        kind,
        outbound,
        cancel,
        tasks,
    });
    core.set_state(ConnectionState::Connected).await;
}

/// Runs when the inbound loop ends for any reason other than local stop:
/// force-completes pendings and either reconnects or reports closure.
pub(crate) async fn handle_connection_down(core: &Arc<ConnectionCore>, outcome: ReadOutcome) {
    let (reason, may_reconnect) = match outcome {
        // stop() drives its own teardown.
        ReadOutcome::Cancelled => return,
        ReadOutcome::ServerClose {
            error,
            allow_reconnect,
        } => {
            let reason = error.unwrap_or_else(|| "connection closed by server".into());
            (reason, allow_reconnect)
        }
        ReadOutcome::TransportClosed => ("underlying transport closed".to_string(), true),
        ReadOutcome::ServerTimeout => ("server timeout elapsed".to_string(), true),
    };

    if let Some(active) = core.active.lock().await.take() {
        active.cancel.cancel();
    }
    core.registry
        .force_complete_all(|| ConnectionError::ConnectionLost(reason.clone()))
        .await;

    let reconnect = may_reconnect
        && core.reconnect_policy.is_some()
        && !core.manual_stop.load(Ordering::Relaxed);
    if reconnect {
        start_reconnect(core, ConnectionError::ConnectionLost(reason));
    } else if core.transition_to_disconnected().await {
        core.notify_close(Some(ConnectionError::ConnectionLost(reason)));
    }
}

/// Registers a fresh cancellation token and spawns the reconnect loop.
pub(crate) fn start_reconnect(core: &Arc<ConnectionCore>, initial_error: ConnectionError) {
    let token = CancellationToken::new();
    if let Ok(mut guard) = core.reconnect_cancel.lock() {
        if let Some(previous) = guard.take() {
            previous.cancel();
        }
        *guard = Some(token.clone());
    }
    tokio::spawn(reconnect_loop(core.clone(), token, initial_error));
}

/// Cancels any reconnect loop in flight.
pub(crate) fn cancel_reconnect(core: &ConnectionCore) {
    if let Ok(mut guard) = core.reconnect_cancel.lock()
        && let Some(token) = guard.take()
    {
        token.cancel();
    }
}

/// Retries negotiation + transport + handshake per the reconnect policy.
/// Individual attempt failures are not surfaced; only exhaustion is.
async fn reconnect_loop(
    core: Arc<ConnectionCore>,
    cancel: CancellationToken,
    initial_error: ConnectionError,
) {
    core.set_state(ConnectionState::Reconnecting).await;
    core.notify_reconnecting(&initial_error);

    let started = tokio::time::Instant::now();
    let mut attempts: u32 = 0;

    loop {
        let context = RetryContext {
            previous_attempts: attempts,
            elapsed: started.elapsed(),
        };
        let delay = core
            .reconnect_policy
            .as_ref()
            .and_then(|policy| policy.next_delay(&context));
        let Some(delay) = delay else {
            info!(attempts, "reconnect policy exhausted");
            if core.transition_to_disconnected().await {
                core.notify_close(Some(ConnectionError::ConnectionLost(
                    "reconnect attempts exhausted".into(),
                )));
            }
            break;
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempts = attempts.saturating_add(1);
        debug!(attempt = attempts, "reconnecting");

        match establish(&core).await {
            Ok(established) => {
                if cancel.is_cancelled() || core.manual_stop.load(Ordering::Relaxed) {
                    discard(established.transport);
                    return;
                }
                let connection_id = established.connection_id.clone();
                install(&core, established).await;
                info!(connection_id = ?connection_id, "reconnected");
                core.notify_reconnected(connection_id);
                break;
            }
            Err(e) => {
                warn!(attempt = attempts, error = %e, "reconnect attempt failed");
            }
        }

        if cancel.is_cancelled() {
            return;
        }
    }

    // Release the token slot. A cancelled loop returns early above, so on
    // this path the registered token is still ours.
    if let Ok(mut guard) = core.reconnect_cancel.lock() {
        *guard = None;
    }
}
