//! HTTP long-polling transport.
//!
//! The receive path is a continuously reissued GET: each 200 body is one
//! frame, a 204 is a clean server-initiated close. Sends are independent
//! POSTs to the same URL. Closing issues a DELETE so the server can release
//! the connection without waiting for the poll to expire.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::http::HttpClient;
use crate::transport::{TransportConnection, TransportError, TransportKind};

/// How long one poll may stay open. Longer than any server hold time so an
/// expiring poll normally comes back as an empty 200, not a client timeout.
const POLL_TIMEOUT: Duration = Duration::from_secs(110);

/// Establishes the connection with an initial poll and spawns the poll and
/// send tasks.
pub(crate) async fn connect(
    url: &Url,
    http: Arc<HttpClient>,
) -> Result<TransportConnection, TransportError> {
    debug!(url = %url, "connecting long-polling");
    // The first poll registers the connection server-side and returns
    // immediately.
    let response = http.get(url.clone(), Some(POLL_TIMEOUT)).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status));
    }
    let initial = response.bytes().await?;

    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(32);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(64);
    let cancel = CancellationToken::new();

    if !initial.is_empty() {
        let _ = inbound_tx.send(initial.to_vec()).await;
    }

    let poll_task = tokio::spawn(poll_loop(
        url.clone(),
        http.clone(),
        inbound_tx,
        cancel.clone(),
    ));
    let send_task = tokio::spawn(send_loop(
        url.clone(),
        http,
        outbound_rx,
        cancel.clone(),
    ));

    Ok(TransportConnection {
        kind: TransportKind::LongPolling,
        outbound: outbound_tx,
        inbound: inbound_rx,
        cancel,
        tasks: vec![poll_task, send_task],
    })
}

async fn poll_loop(
    url: Url,
    http: Arc<HttpClient>,
    inbound: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut server_closed = false;
    loop {
        let poll = tokio::select! {
            _ = cancel.cancelled() => break,
            poll = http.get(url.clone(), Some(POLL_TIMEOUT)) => poll,
        };
        match poll {
            Ok(response) if response.status().as_u16() == 204 => {
                debug!("long-polling terminated by server");
                server_closed = true;
                break;
            }
            Ok(response) if response.status().is_success() => {
                match response.bytes().await {
                    Ok(body) if body.is_empty() => {} // poll expired, reissue
                    Ok(body) => {
                        if inbound.send(body.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("long-polling body error: {e}");
                        break;
                    }
                }
            }
            Ok(response) => {
                warn!(status = %response.status(), "long-polling poll failed");
                break;
            }
            Err(e) if e.is_timeout() => {
                // Rare: the server held past our poll window. Reissue.
                debug!("poll timed out client-side, reissuing");
            }
            Err(e) => {
                warn!("long-polling error: {e}");
                break;
            }
        }
    }

    // Release the server-side connection unless the server already closed it.
    if !server_closed {
        if let Err(e) = http.delete(url).await {
            debug!("long-polling DELETE failed: {e}");
        }
    }
}

async fn send_loop(
    url: Url,
    http: Arc<HttpClient>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                match http.post(url.clone(), Some(frame)).await {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        warn!(status = %response.status(), "long-polling send rejected");
                        cancel.cancel();
                        break;
                    }
                    Err(e) => {
                        warn!("long-polling send error: {e}");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
}
