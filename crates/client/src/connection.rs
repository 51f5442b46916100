//! The hub connection.
//!
//! Owns the lifecycle state machine and the invocation registry, and
//! exposes the invoke/send/stream/on surface to the application. One
//! instance per logical connection; clones share the same connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use hublink_protocol::{HubMessage, HubProtocol, JsonProtocol, arguments};

use crate::config::{ConnectionOptions, HttpOptions};
use crate::error::ConnectionError;
use crate::handlers::HandlerMap;
use crate::http::HttpClient;
use crate::lifecycle;
use crate::pumps::write::OutboundHandle;
use crate::reconnect::{DefaultReconnectPolicy, ReconnectPolicy};
use crate::registry::InvocationRegistry;
use crate::transport::TransportKind;
use crate::types::{ConnectionState, HandlerRegistration};

/// A client-to-server stream of values, supplied by the application as a
/// bounded channel receiver. The bound is the backpressure: a slow
/// transport stalls the producer instead of buffering without limit.
pub type UploadStream = mpsc::Receiver<Value>;

type CloseCallback = Box<dyn Fn(Option<ConnectionError>) + Send + Sync>;
type ReconnectingCallback = Box<dyn Fn(&ConnectionError) + Send + Sync>;
type ReconnectedCallback = Box<dyn Fn(Option<String>) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_close: std::sync::Mutex<Option<CloseCallback>>,
    on_reconnecting: std::sync::Mutex<Option<ReconnectingCallback>>,
    on_reconnected: std::sync::Mutex<Option<ReconnectedCallback>>,
}

/// The currently installed transport and its tasks.
pub(crate) struct ActiveTransport {
    pub kind: TransportKind,
    pub outbound: OutboundHandle,
    pub cancel: CancellationToken,
    pub tasks: Vec<JoinHandle<()>>,
}

/// State shared between the public API, the pumps, and the reconnect loop.
pub(crate) struct ConnectionCore {
    pub url: Url,
    pub http: Arc<HttpClient>,
    pub protocol: Arc<dyn HubProtocol>,
    pub options: ConnectionOptions,
    pub reconnect_policy: Option<Arc<dyn ReconnectPolicy>>,
    pub registry: Arc<InvocationRegistry>,
    pub handlers: HandlerMap,
    pub state: RwLock<ConnectionState>,
    pub active: Mutex<Option<ActiveTransport>>,
    pub connection_id: std::sync::Mutex<Option<String>>,
    /// Cancel token for the reconnect loop in flight, if any.
    pub reconnect_cancel: std::sync::Mutex<Option<CancellationToken>>,
    /// Set when the user explicitly stops, suppressing reconnection.
    pub manual_stop: AtomicBool,
    callbacks: Callbacks,
}

impl ConnectionCore {
    pub(crate) async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!(from = %*state, to = %next, "connection state changed");
            *state = next;
        }
    }

    /// Moves to Disconnected unless already there. Returns whether this
    /// call performed the transition; the caller that did owns the single
    /// close notification.
    pub(crate) async fn transition_to_disconnected(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == ConnectionState::Disconnected {
            return false;
        }
        *state = ConnectionState::Disconnected;
        true
    }

    pub(crate) fn notify_close(&self, error: Option<ConnectionError>) {
        if let Ok(guard) = self.callbacks.on_close.lock()
            && let Some(callback) = guard.as_ref()
        {
            callback(error);
        }
    }

    pub(crate) fn notify_reconnecting(&self, error: &ConnectionError) {
        if let Ok(guard) = self.callbacks.on_reconnecting.lock()
            && let Some(callback) = guard.as_ref()
        {
            callback(error);
        }
    }

    pub(crate) fn notify_reconnected(&self, connection_id: Option<String>) {
        if let Ok(guard) = self.callbacks.on_reconnected.lock()
            && let Some(callback) = guard.as_ref()
        {
            callback(connection_id);
        }
    }
}

impl Drop for ConnectionCore {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.reconnect_cancel.lock()
            && let Some(token) = guard.take()
        {
            token.cancel();
        }
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
            for task in &active.tasks {
                task.abort();
            }
        }
    }
}

/// A connection to a hub.
#[derive(Clone)]
pub struct HubConnection {
    core: Arc<ConnectionCore>,
}

impl HubConnection {
    /// Starts building a connection to the given hub URL.
    pub fn builder(url: Url) -> HubConnectionBuilder {
        HubConnectionBuilder::new(url)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.core.state.read().await
    }

    /// The negotiated connection id, if connected. May change across a
    /// reconnect.
    pub fn connection_id(&self) -> Option<String> {
        self.core
            .connection_id
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// The transport currently carrying the connection.
    pub async fn transport_kind(&self) -> Option<TransportKind> {
        self.core.active.lock().await.as_ref().map(|a| a.kind)
    }

    /// Negotiates, connects a transport, and performs the handshake.
    ///
    /// Fails unless the connection is Disconnected. Any failure along the
    /// way is returned to the caller and leaves the state Disconnected.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.core.state.write().await;
            if *state != ConnectionState::Disconnected {
                return Err(ConnectionError::InvalidState {
                    expected: ConnectionState::Disconnected,
                    actual: *state,
                });
            }
            *state = ConnectionState::Connecting;
        }
        self.core.manual_stop.store(false, Ordering::Relaxed);

        match lifecycle::establish(&self.core).await {
            Ok(established) => {
                if self.core.manual_stop.load(Ordering::Relaxed) {
                    established.transport.close();
                    established.transport.abort_tasks();
                    self.core.set_state(ConnectionState::Disconnected).await;
                    return Err(ConnectionError::ConnectionStopped);
                }
                lifecycle::install(&self.core, established).await;
                Ok(())
            }
            Err(e) => {
                self.core.set_state(ConnectionState::Disconnected).await;
                Err(e)
            }
        }
    }

    /// Stops the connection: cancels any reconnection in flight,
    /// force-completes every pending invocation with a stopped error,
    /// closes the transport, and fires the close callback once with no
    /// error. Idempotent.
    pub async fn stop(&self) {
        self.core.manual_stop.store(true, Ordering::Relaxed);
        lifecycle::cancel_reconnect(&self.core);

        {
            let mut state = self.core.state.write().await;
            if *state == ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Disconnecting;
        }

        if let Some(active) = self.core.active.lock().await.take() {
            active.cancel.cancel();
            for task in &active.tasks {
                task.abort();
            }
        }
        self.core
            .registry
            .force_complete_all(|| ConnectionError::ConnectionStopped)
            .await;
        if self.core.transition_to_disconnected().await {
            self.core.notify_close(None);
        }
    }

    /// Fire-and-forget invocation: resolves once the frame is handed to the
    /// transport. An error is always a local failure to encode or
    /// transmit; there is no server acknowledgment.
    pub async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<(), ConnectionError> {
        let outbound = self.require_connected().await?;
        outbound
            .send_message(&HubMessage::send(target, arguments))
            .await
    }

    /// Invokes a hub method and waits for its completion, decoding the
    /// result into `T` (`()` for void methods).
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<T, ConnectionError> {
        self.invoke_with_streams(target, arguments, Vec::new())
            .await
    }

    /// Invokes a hub method, additionally uploading one client-to-server
    /// stream per supplied receiver.
    pub async fn invoke_with_streams<T: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<Value>,
        uploads: Vec<UploadStream>,
    ) -> Result<T, ConnectionError> {
        let outbound = self.require_connected().await?;
        let registry = &self.core.registry;

        let invocation_id = registry.next_id();
        let receiver = registry.register_invoke(&invocation_id).await;
        let stream_ids = self.allocate_uploads(&uploads).await;

        let message = HubMessage::Invocation {
            invocation_id: Some(invocation_id.clone()),
            target: target.to_string(),
            arguments,
            stream_ids: stream_ids.clone(),
        };
        if let Err(e) = outbound.send_message(&message).await {
            registry.remove(&invocation_id).await;
            for stream_id in &stream_ids {
                registry.remove(stream_id).await;
            }
            return Err(e);
        }
        self.spawn_uploads(&outbound, stream_ids, uploads);

        let outcome = receiver
            .await
            .unwrap_or(Err(ConnectionError::ConnectionStopped))?;
        Ok(arguments::result_value(outcome)?)
    }

    /// Invokes a streaming hub method. `on_item` runs for every stream item
    /// in receive order; the returned handle resolves on the terminal
    /// completion and can cancel the stream.
    pub async fn stream(
        &self,
        target: &str,
        arguments: Vec<Value>,
        on_item: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<StreamHandle, ConnectionError> {
        self.stream_with_streams(target, arguments, Vec::new(), on_item)
            .await
    }

    /// Bidirectional variant of [`stream`](Self::stream): uploads one
    /// client-to-server stream per supplied receiver while consuming the
    /// server-to-client stream.
    pub async fn stream_with_streams(
        &self,
        target: &str,
        arguments: Vec<Value>,
        uploads: Vec<UploadStream>,
        on_item: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<StreamHandle, ConnectionError> {
        let outbound = self.require_connected().await?;
        let registry = &self.core.registry;

        let invocation_id = registry.next_id();
        let done = registry
            .register_stream(&invocation_id, Arc::new(on_item))
            .await;
        let stream_ids = self.allocate_uploads(&uploads).await;

        let message = HubMessage::StreamInvocation {
            invocation_id: invocation_id.clone(),
            target: target.to_string(),
            arguments,
            stream_ids: stream_ids.clone(),
        };
        if let Err(e) = outbound.send_message(&message).await {
            registry.remove(&invocation_id).await;
            for stream_id in &stream_ids {
                registry.remove(stream_id).await;
            }
            return Err(e);
        }
        self.spawn_uploads(&outbound, stream_ids, uploads);

        Ok(StreamHandle {
            invocation_id,
            registry: self.core.registry.clone(),
            outbound,
            done,
        })
    }

    /// Registers a handler for a server-to-client invocation. Handlers for
    /// the same target run in registration order.
    pub fn on(
        &self,
        target: &str,
        handler: impl Fn(Vec<Value>) + Send + Sync + 'static,
    ) -> HandlerRegistration {
        self.core.handlers.register(target, Arc::new(handler))
    }

    /// Removes one handler registration. Returns `false` when it was
    /// already removed.
    pub fn off(&self, registration: &HandlerRegistration) -> bool {
        self.core.handlers.remove(registration)
    }

    /// Called once per termination with the terminal error, or `None` after
    /// a clean `stop`.
    pub fn set_close_callback(
        &self,
        callback: impl Fn(Option<ConnectionError>) + Send + Sync + 'static,
    ) {
        if let Ok(mut guard) = self.core.callbacks.on_close.lock() {
            *guard = Some(Box::new(callback));
        }
    }

    /// Called when the connection is lost and automatic reconnection
    /// begins.
    pub fn set_reconnecting_callback(
        &self,
        callback: impl Fn(&ConnectionError) + Send + Sync + 'static,
    ) {
        if let Ok(mut guard) = self.core.callbacks.on_reconnecting.lock() {
            *guard = Some(Box::new(callback));
        }
    }

    /// Called when reconnection succeeds, with the connection id of the new
    /// connection.
    pub fn set_reconnected_callback(
        &self,
        callback: impl Fn(Option<String>) + Send + Sync + 'static,
    ) {
        if let Ok(mut guard) = self.core.callbacks.on_reconnected.lock() {
            *guard = Some(Box::new(callback));
        }
    }

    async fn require_connected(&self) -> Result<OutboundHandle, ConnectionError> {
        let state = *self.core.state.read().await;
        if state != ConnectionState::Connected {
            return Err(ConnectionError::InvalidState {
                expected: ConnectionState::Connected,
                actual: state,
            });
        }
        self.core
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| active.outbound.clone())
            .ok_or(ConnectionError::InvalidState {
                expected: ConnectionState::Connected,
                actual: ConnectionState::Disconnected,
            })
    }

    /// Allocates a stream id and registry record per upload.
    async fn allocate_uploads(&self, uploads: &[UploadStream]) -> Vec<String> {
        let mut stream_ids = Vec::with_capacity(uploads.len());
        for _ in uploads {
            let stream_id = self.core.registry.next_id();
            self.core
                .registry
                .register_upload(&stream_id, CancellationToken::new())
                .await;
            stream_ids.push(stream_id);
        }
        stream_ids
    }

    fn spawn_uploads(
        &self,
        outbound: &OutboundHandle,
        stream_ids: Vec<String>,
        uploads: Vec<UploadStream>,
    ) {
        for (stream_id, items) in stream_ids.into_iter().zip(uploads) {
            tokio::spawn(upload_pump(
                self.core.registry.clone(),
                outbound.clone(),
                stream_id,
                items,
            ));
        }
    }
}

/// Pumps one application-supplied sequence: each item becomes a
/// `StreamItem`, and exhaustion sends the stream's terminal completion.
/// A server cancel (or connection teardown) cancels the registered token
/// and stops the pump without a completion.
async fn upload_pump(
    registry: Arc<InvocationRegistry>,
    outbound: OutboundHandle,
    stream_id: String,
    mut items: UploadStream,
) {
    let Some(token) = registry.upload_token(&stream_id).await else {
        return;
    };
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            item = items.recv() => {
                match item {
                    Some(item) => {
                        let message = HubMessage::StreamItem {
                            invocation_id: stream_id.clone(),
                            item,
                        };
                        if outbound.send_message(&message).await.is_err() {
                            registry.remove(&stream_id).await;
                            return;
                        }
                    }
                    None => {
                        registry.remove(&stream_id).await;
                        let _ = outbound
                            .send_message(&HubMessage::completion_ok(stream_id.as_str()))
                            .await;
                        return;
                    }
                }
            }
        }
    }
}

/// Handle for an in-flight server-to-client stream.
pub struct StreamHandle {
    invocation_id: String,
    registry: Arc<InvocationRegistry>,
    outbound: OutboundHandle,
    done: oneshot::Receiver<Result<(), ConnectionError>>,
}

impl StreamHandle {
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Stops the stream: no further items are delivered, the server is
    /// asked to cancel, and the overall call resolves with a cancelled
    /// (non-error) outcome.
    pub async fn cancel(&self) {
        if self.registry.cancel_local(&self.invocation_id).await {
            let _ = self
                .outbound
                .send_message(&HubMessage::CancelInvocation {
                    invocation_id: self.invocation_id.clone(),
                })
                .await;
        }
    }

    /// Waits for the stream's terminal outcome: `Ok` after the server's
    /// completion or a local cancel, `Err` on a server error or connection
    /// loss.
    pub async fn completion(self) -> Result<(), ConnectionError> {
        self.done
            .await
            .unwrap_or(Err(ConnectionError::ConnectionStopped))
    }
}

/// Builds a [`HubConnection`].
pub struct HubConnectionBuilder {
    url: Url,
    http_options: HttpOptions,
    options: ConnectionOptions,
    protocol: Option<Arc<dyn HubProtocol>>,
    reconnect_policy: Option<Arc<dyn ReconnectPolicy>>,
}

impl HubConnectionBuilder {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            http_options: HttpOptions::default(),
            options: ConnectionOptions::default(),
            protocol: None,
            reconnect_policy: None,
        }
    }

    /// Selects the hub message encoding. JSON is the default.
    pub fn with_protocol(mut self, protocol: impl HubProtocol + 'static) -> Self {
        self.protocol = Some(Arc::new(protocol));
        self
    }

    /// Adds a header to every HTTP request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_options.headers.insert(name.into(), value.into());
        self
    }

    /// Supplies bearer tokens for HTTP requests and transport URLs.
    pub fn with_access_token_provider(
        mut self,
        provider: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.http_options.access_token_provider = Some(Arc::new(provider));
        self
    }

    pub fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.http_options.request_timeout = Some(timeout);
        self
    }

    /// Connects the WebSocket transport directly, without a negotiate
    /// round trip.
    pub fn with_skip_negotiation(mut self) -> Self {
        self.options.skip_negotiation = true;
        self.options.transports = vec![TransportKind::WebSocket];
        self
    }

    /// Restricts and orders the transports the connection may use.
    pub fn with_transports(mut self, transports: Vec<TransportKind>) -> Self {
        self.options.transports = transports;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.options.handshake_timeout = timeout;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: std::time::Duration) -> Self {
        self.options.keep_alive_interval = interval;
        self
    }

    pub fn with_server_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.options.server_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.options.max_message_size = Some(size);
        self
    }

    /// Enables automatic reconnection with the given policy.
    pub fn with_automatic_reconnect(mut self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.reconnect_policy = Some(Arc::new(policy));
        self
    }

    /// Enables automatic reconnection with [`DefaultReconnectPolicy`].
    pub fn with_default_reconnect(self) -> Self {
        self.with_automatic_reconnect(DefaultReconnectPolicy::default())
    }

    pub fn build(self) -> Result<HubConnection, ConnectionError> {
        let http = Arc::new(HttpClient::new(self.http_options)?);
        let protocol = self.protocol.unwrap_or_else(|| Arc::new(JsonProtocol));
        Ok(HubConnection {
            core: Arc::new(ConnectionCore {
                url: self.url,
                http,
                protocol,
                options: self.options,
                reconnect_policy: self.reconnect_policy,
                registry: Arc::new(InvocationRegistry::default()),
                handlers: HandlerMap::default(),
                state: RwLock::new(ConnectionState::Disconnected),
                active: Mutex::new(None),
                connection_id: std::sync::Mutex::new(None),
                reconnect_cancel: std::sync::Mutex::new(None),
                manual_stop: AtomicBool::new(false),
                callbacks: Callbacks::default(),
            }),
        })
    }
}
