//! Client-method handler table.
//!
//! Maps target names to the handlers registered with `on`. Multiple
//! handlers per target run in registration order; removal is by
//! registration identity, not by name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::types::HandlerRegistration;

/// Invoked with the raw argument list of a server-to-client invocation.
/// Typed extraction is up to the handler (see `hublink_protocol::arguments`).
pub type MethodHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

#[derive(Default, Clone)]
pub(crate) struct HandlerMap {
    inner: Arc<Mutex<HashMap<String, Vec<(u64, MethodHandler)>>>>,
    next_id: Arc<AtomicU64>,
}

impl HandlerMap {
    pub(crate) fn register(
        &self,
        target: &str,
        handler: MethodHandler,
    ) -> HandlerRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut map) = self.inner.lock() {
            map.entry(target.to_string())
                .or_default()
                .push((id, handler));
        }
        HandlerRegistration {
            target: target.to_string(),
            id,
        }
    }

    /// Removes one registration. Returns `false` when it was already gone.
    pub(crate) fn remove(&self, registration: &HandlerRegistration) -> bool {
        let Ok(mut map) = self.inner.lock() else {
            return false;
        };
        let Some(handlers) = map.get_mut(&registration.target) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != registration.id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            map.remove(&registration.target);
        }
        removed
    }

    /// Handlers for a target, in registration order. Snapshotted so
    /// dispatch happens outside the lock.
    pub(crate) fn snapshot(&self, target: &str) -> Vec<MethodHandler> {
        match self.inner.lock() {
            Ok(map) => map
                .get(target)
                .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let map = HandlerMap::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            map.register(
                "Notify",
                Arc::new(move |_| order.lock().unwrap().push(tag)),
            );
        }
        for handler in map.snapshot("Notify") {
            handler(vec![]);
        }
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn removal_is_by_identity() {
        let map = HandlerMap::default();
        let first = map.register("Notify", Arc::new(|_| {}));
        let second = map.register("Notify", Arc::new(|_| {}));
        assert!(map.remove(&first));
        assert_eq!(map.snapshot("Notify").len(), 1);
        // Removing again is a no-op.
        assert!(!map.remove(&first));
        assert!(map.remove(&second));
        assert!(map.snapshot("Notify").is_empty());
    }

    #[test]
    fn unknown_target_has_no_handlers() {
        let map = HandlerMap::default();
        assert!(map.snapshot("Nothing").is_empty());
    }
}
