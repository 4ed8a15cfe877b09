//! Typed listener registry.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use parley_core::events::{EventKind, InboundEnvelope};
use tracing::error;

/// A listener for inbound events.
pub type EventHandler = Arc<dyn Fn(&InboundEnvelope) + Send + Sync>;

/// Listeners keyed by event kind.
///
/// Registration is idempotent per `(kind, handler)` pair, where handler
/// identity is the `Arc` allocation. Dispatch snapshots the listener list
/// before invoking anything, so handlers may subscribe or unsubscribe
/// re-entrantly.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. Returns `false` if it was already
    /// registered for that kind.
    pub fn subscribe(&self, kind: EventKind, handler: &EventHandler) -> bool {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(kind).or_default();
        if list.iter().any(|h| Arc::ptr_eq(h, handler)) {
            return false;
        }
        list.push(Arc::clone(handler));
        true
    }

    /// Remove `handler` from `kind`. Returns whether it was registered.
    pub fn unsubscribe(&self, kind: EventKind, handler: &EventHandler) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            let _ = handlers.remove(&kind);
        }
        removed
    }

    /// Number of listeners for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every listener registered for the envelope's kind.
    ///
    /// A panicking listener is logged and does not prevent the others from
    /// running.
    pub fn dispatch(&self, envelope: &InboundEnvelope) {
        let kind = envelope.event.kind();
        let snapshot: Vec<EventHandler> = self
            .handlers
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
                error!(event = envelope.event.name(), "event listener panicked");
            }
        }
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
