//! WebSocket transport.

use futures_util::{SinkExt, StreamExt};
use hublink_protocol::TransferFormat;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, protocol::WebSocketConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::http::{HttpClient, append_access_token};
use crate::transport::{TransportConnection, TransportError, TransportKind};

/// Connects a WebSocket and spawns its read and write tasks.
///
/// The URL scheme is upgraded http→ws / https→wss, and the access token is
/// carried as a query parameter since the upgrade request cannot set an
/// `Authorization` header from every environment.
pub(crate) async fn connect(
    url: &Url,
    http: &HttpClient,
    format: TransferFormat,
    max_message_size: Option<usize>,
) -> Result<TransportConnection, TransportError> {
    let mut ws_url = url.clone();
    let scheme = match ws_url.scheme() {
        "http" | "ws" => "ws",
        _ => "wss",
    };
    ws_url
        .set_scheme(scheme)
        .map_err(|()| TransportError::Url(format!("cannot use scheme {scheme}")))?;
    append_access_token(&mut ws_url, http);

    let mut config = WebSocketConfig::default();
    if let Some(size) = max_message_size {
        config.max_message_size = Some(size);
        config.max_frame_size = Some(size);
    }
    debug!(url = %ws_url, "connecting WebSocket");
    let (stream, _) =
        tokio_tungstenite::connect_async_with_config(ws_url.as_str(), Some(config), false).await?;
    let (write, read) = stream.split();

    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(32);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(64);
    let (control_tx, control_rx) = mpsc::channel::<tungstenite::Message>(8);
    let cancel = CancellationToken::new();

    let write_task = tokio::spawn(write_pump(
        write,
        outbound_rx,
        control_rx,
        format,
        cancel.clone(),
    ));
    let read_task = tokio::spawn(read_loop(read, inbound_tx, control_tx, cancel.clone()));

    Ok(TransportConnection {
        kind: TransportKind::WebSocket,
        outbound: outbound_tx,
        inbound: inbound_rx,
        cancel,
        tasks: vec![write_task, read_task],
    })
}

fn to_ws_message(frame: Vec<u8>, format: TransferFormat) -> Option<tungstenite::Message> {
    match format {
        TransferFormat::Binary => Some(tungstenite::Message::Binary(frame.into())),
        TransferFormat::Text => match String::from_utf8(frame) {
            Ok(text) => Some(tungstenite::Message::Text(text.into())),
            Err(e) => {
                warn!("dropping non-UTF-8 frame on text transport: {e}");
                None
            }
        },
    }
}

/// Writes outbound frames and control messages (pongs, close) to the socket.
async fn write_pump<S>(
    mut write: S,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    mut control: mpsc::Receiver<tungstenite::Message>,
    format: TransferFormat,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = control.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = write.send(m).await {
                            warn!("WebSocket write error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = outbound.recv() => {
                match frame {
                    Some(bytes) => {
                        let Some(msg) = to_ws_message(bytes, format) else {
                            continue;
                        };
                        if let Err(e) = write.send(msg).await {
                            warn!("WebSocket write error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}

/// Forwards received data frames into the inbound channel and answers
/// transport-level pings. Exiting drops the inbound sender, which the
/// connection observes as transport loss.
async fn read_loop<S>(
    mut read: S,
    inbound: mpsc::Sender<Vec<u8>>,
    control: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if inbound.send(text.as_bytes().to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        if inbound.send(data.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        trace!("received ping, sending pong");
                        let _ = control.send(tungstenite::Message::Pong(data)).await;
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!(?frame, "received close frame");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }
}
