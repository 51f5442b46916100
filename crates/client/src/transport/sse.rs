//! Server-Sent-Events transport.
//!
//! Receive-only event stream over a long-lived GET; sends go out as
//! individual POST requests to the same connection URL. Text transfer
//! format only.

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Method;
use reqwest::header::ACCEPT;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::http::{HttpClient, append_access_token};
use crate::transport::{TransportConnection, TransportError, TransportKind};

/// Connects the event stream and spawns the receive and send tasks.
pub(crate) async fn connect(
    url: &Url,
    http: Arc<HttpClient>,
) -> Result<TransportConnection, TransportError> {
    // The event-stream GET carries the token in the URL as well; not every
    // environment lets the streaming request set headers.
    let mut stream_url = url.clone();
    append_access_token(&mut stream_url, &http);

    debug!(url = %url, "connecting SSE");
    let response = http
        .request(Method::GET, stream_url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status));
    }

    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(32);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(64);
    let cancel = CancellationToken::new();

    let recv_task = tokio::spawn(recv_loop(response, inbound_tx, cancel.clone()));
    let send_task = tokio::spawn(send_loop(
        url.clone(),
        http,
        outbound_rx,
        cancel.clone(),
    ));

    Ok(TransportConnection {
        kind: TransportKind::ServerSentEvents,
        outbound: outbound_tx,
        inbound: inbound_rx,
        cancel,
        tasks: vec![recv_task, send_task],
    })
}

async fn recv_loop(
    response: reqwest::Response,
    inbound: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        for event in parser.feed(&bytes) {
                            if inbound.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("SSE read error: {e}");
                        break;
                    }
                    None => {
                        debug!("SSE stream ended");
                        break;
                    }
                }
            }
        }
    }
}

/// Sends each outbound frame as one POST. A failed send means the
/// connection is unusable, so the whole transport is cancelled.
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
                        warn!(status = %response.status(), "SSE send rejected");
                        cancel.cancel();
                        break;
                    }
                    Err(e) => {
                        warn!("SSE send error: {e}");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
}

/// Incremental `text/event-stream` parser. Only `data:` fields matter to
/// the hub protocol; other fields and comments are skipped.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    data: Vec<u8>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).take(pos).collect();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(std::mem::take(&mut self.data));
                }
                continue;
            }
            if let Some(payload) = field_value(&line, b"data") {
                if !self.data.is_empty() {
                    self.data.push(b'\n');
                }
                self.data.extend_from_slice(payload);
            }
        }
        events
    }
}

/// Returns the value if `line` is `{field}: value` (space optional),
/// `None` otherwise.
fn field_value<'a>(line: &'a [u8], field: &[u8]) -> Option<&'a [u8]> {
    let rest = line.strip_prefix(field)?;
    let rest = rest.strip_prefix(b":")?;
    Some(rest.strip_prefix(b" ").unwrap_or(rest))
}
