//! Invocation registry.
//!
//! The correlation layer between outbound calls and inbound completions:
//! maps invocation ids to pending-completion records. The registry is the
//! one piece of state shared between the inbound loop and arbitrary caller
//! tasks, so every mutation goes through its mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;

/// Called for every stream item as it arrives, in receive order.
pub(crate) type ItemSink = Arc<dyn Fn(Value) + Send + Sync>;

/// One outstanding invocation, stream, or upload pump.
pub(crate) enum Pending {
    /// Single-shot: resolved by the matching completion.
    Invoke(oneshot::Sender<Result<Option<Value>, ConnectionError>>),
    /// Repeatable item sink plus a terminal completion.
    Stream {
        on_item: ItemSink,
        done: oneshot::Sender<Result<(), ConnectionError>>,
    },
    /// Client-to-server stream pump, stopped via its token when the server
    /// cancels or the connection ends.
    Upload(CancellationToken),
}

#[derive(Default)]
pub(crate) struct InvocationRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, Pending>>,
}

impl InvocationRegistry {
    /// Next invocation or stream id. Monotonic within the connection's
    /// lifetime, so an id is never reused while still pending.
    pub(crate) fn next_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    pub(crate) async fn register_invoke(
        &self,
        id: &str,
    ) -> oneshot::Receiver<Result<Option<Value>, ConnectionError>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id.to_string(), Pending::Invoke(tx));
        rx
    }

    pub(crate) async fn register_stream(
        &self,
        id: &str,
        on_item: ItemSink,
    ) -> oneshot::Receiver<Result<(), ConnectionError>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id.to_string(), Pending::Stream { on_item, done: tx });
        rx
    }

    pub(crate) async fn register_upload(&self, id: &str, token: CancellationToken) {
        self.pending
            .lock()
            .await
            .insert(id.to_string(), Pending::Upload(token));
    }

    pub(crate) async fn remove(&self, id: &str) -> Option<Pending> {
        self.pending.lock().await.remove(id)
    }

    /// Routes an inbound completion to its pending record. Returns `false`
    /// when the id is unknown (already completed or cancelled); such
    /// completions are ignored by the caller.
    pub(crate) async fn complete(
        &self,
        id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        let Some(pending) = self.pending.lock().await.remove(id) else {
            return false;
        };
        match pending {
            Pending::Invoke(tx) => {
                let outcome = match error {
                    Some(message) => Err(ConnectionError::Invocation(message)),
                    None => Ok(result),
                };
                let _ = tx.send(outcome);
            }
            Pending::Stream { done, .. } => {
                let outcome = match error {
                    Some(message) => Err(ConnectionError::Invocation(message)),
                    None => Ok(()),
                };
                let _ = done.send(outcome);
            }
            // A completion addressed at an upload stream means the server is
            // done with it; stop the pump.
            Pending::Upload(token) => token.cancel(),
        }
        true
    }

    /// Dispatches one stream item. The sink is invoked outside the lock so
    /// a handler can issue new invocations.
    pub(crate) async fn stream_item(&self, id: &str, item: Value) -> bool {
        let sink = {
            let pending = self.pending.lock().await;
            match pending.get(id) {
                Some(Pending::Stream { on_item, .. }) => Some(on_item.clone()),
                _ => None,
            }
        };
        match sink {
            Some(on_item) => {
                on_item(item);
                true
            }
            None => false,
        }
    }

    /// Local stream cancellation: removes the record and resolves it with a
    /// cancelled (non-error) outcome. Returns `false` if already completed.
    pub(crate) async fn cancel_local(&self, id: &str) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.remove(id) {
            Some(Pending::Stream { done, .. }) => {
                let _ = done.send(Ok(()));
                true
            }
            Some(other) => {
                // Not a stream after all; put it back untouched.
                pending.insert(id.to_string(), other);
                false
            }
            None => false,
        }
    }

    /// The cancellation token of a registered upload pump.
    pub(crate) async fn upload_token(&self, id: &str) -> Option<CancellationToken> {
        match self.pending.lock().await.get(id) {
            Some(Pending::Upload(token)) => Some(token.clone()),
            _ => None,
        }
    }

    /// Server-side cancellation of an upload stream. Unknown ids are
    /// ignored.
    pub(crate) async fn server_cancel(&self, id: &str) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.remove(id) {
            Some(Pending::Upload(token)) => {
                token.cancel();
                true
            }
            Some(other) => {
                pending.insert(id.to_string(), other);
                false
            }
            None => false,
        }
    }

    /// Force-completes every pending record, exactly once each. Invoked on
    /// `stop` and on connection loss.
    pub(crate) async fn force_complete_all(
        &self,
        make_error: impl Fn() -> ConnectionError,
    ) {
        let drained: Vec<(String, Pending)> =
            self.pending.lock().await.drain().collect();
        for (_, pending) in drained {
            match pending {
                Pending::Invoke(tx) => {
                    let _ = tx.send(Err(make_error()));
                }
                Pending::Stream { done, .. } => {
                    let _ = done.send(Err(make_error()));
                }
                Pending::Upload(token) => token.cancel(),
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_monotonic_strings() {
        let registry = InvocationRegistry::default();
        assert_eq!(registry.next_id(), "1");
        assert_eq!(registry.next_id(), "2");
        assert_eq!(registry.next_id(), "3");
    }

    #[tokio::test]
    async fn invoke_resolves_with_result() {
        let registry = InvocationRegistry::default();
        let rx = registry.register_invoke("1").await;
        assert!(registry.complete("1", Some(json!(5)), None).await);
        assert_eq!(rx.await.unwrap().unwrap(), Some(json!(5)));
        assert_eq!(registry.pending_count().await, 0);
    }

    #[tokio::test]
    async fn error_completion_is_an_invocation_error() {
        let registry = InvocationRegistry::default();
        let rx = registry.register_invoke("1").await;
        registry.complete("1", None, Some("boom".into())).await;
        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectionError::Invocation(message)) if message == "boom"
        ));
    }

    #[tokio::test]
    async fn unknown_completion_is_ignored() {
        let registry = InvocationRegistry::default();
        assert!(!registry.complete("99", None, None).await);
        assert!(!registry.stream_item("99", json!(1)).await);
    }

    #[tokio::test]
    async fn stream_items_dispatch_in_order_until_completion() {
        let registry = InvocationRegistry::default();
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = {
            let received = received.clone();
            Arc::new(move |item: Value| received.lock().unwrap().push(item))
        };
        let done = registry.register_stream("7", sink).await;

        assert!(registry.stream_item("7", json!(1)).await);
        assert!(registry.stream_item("7", json!(2)).await);
        registry.complete("7", None, None).await;
        assert!(!registry.stream_item("7", json!(3)).await);

        assert_eq!(*received.lock().unwrap(), vec![json!(1), json!(2)]);
        assert!(done.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn local_cancel_resolves_without_error() {
        let registry = InvocationRegistry::default();
        let done = registry
            .register_stream("4", Arc::new(|_| {}))
            .await;
        assert!(registry.cancel_local("4").await);
        assert!(done.await.unwrap().is_ok());
        // Late items after cancel are ignored.
        assert!(!registry.stream_item("4", json!(9)).await);
        // A second cancel is a no-op.
        assert!(!registry.cancel_local("4").await);
    }

    #[tokio::test]
    async fn server_cancel_stops_upload_pump() {
        let registry = InvocationRegistry::default();
        let token = CancellationToken::new();
        registry.register_upload("5", token.clone()).await;
        assert!(registry.server_cancel("5").await);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn server_cancel_ignores_plain_invocations() {
        let registry = InvocationRegistry::default();
        let _rx = registry.register_invoke("6").await;
        assert!(!registry.server_cancel("6").await);
        assert_eq!(registry.pending_count().await, 1);
    }

    #[tokio::test]
    async fn force_complete_reaches_every_pending_exactly_once() {
        let registry = InvocationRegistry::default();
        let invoke_rx = registry.register_invoke("1").await;
        let stream_rx = registry.register_stream("2", Arc::new(|_| {})).await;
        let token = CancellationToken::new();
        registry.register_upload("3", token.clone()).await;

        registry
            .force_complete_all(|| ConnectionError::ConnectionStopped)
            .await;

        assert!(matches!(
            invoke_rx.await.unwrap(),
            Err(ConnectionError::ConnectionStopped)
        ));
        assert!(matches!(
            stream_rx.await.unwrap(),
            Err(ConnectionError::ConnectionStopped)
        ));
        assert!(token.is_cancelled());
        assert_eq!(registry.pending_count().await, 0);
    }
}
