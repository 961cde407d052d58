//! Global event broadcast registry
//!
//! Reduces the number of listeners attached to the global target by the
//! overlay component. Works by collecting the individual event handlers
//! and dispatching them from a single underlying listener per
//! `(event_type, capture)` pair.
//!
//! Without the registry every overlay instance would attach its own
//! window listeners, so the global listener count would grow with the
//! number of overlays. With it, the count is bounded by the number of
//! distinct event types in use.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use veil_core::memory::MemoryHost;
//! use veil_core::registry::{broadcast_registry, BroadcastRegistryExt};
//!
//! let host = MemoryHost::new();
//! let registry = broadcast_registry(host.window());
//!
//! let on_scroll: veil_core::GlobalHandler = Arc::new(|_e: &veil_core::Event| {});
//! registry.register("scroll", true, on_scroll.clone());
//! registry.deregister("scroll", true, &on_scroll);
//! ```

use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::events::Event;
use crate::host::{EventCallback, GlobalTarget, ListenerHandle};

/// A logical subscriber handler
///
/// Identity is the `Arc` allocation: registering the same clone twice is
/// a no-op, and deregistration removes by pointer identity.
pub type GlobalHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Subscriber set key: event name plus capture mode
type PairKey = (String, bool);

/// One subscriber set and its single underlying listener
struct Entry {
    /// Handlers in registration order
    handlers: SmallVec<[GlobalHandler; 4]>,
    /// The one listener attached to the global target for this pair
    listener: ListenerHandle,
}

// =============================================================================
// BroadcastRegistryInner
// =============================================================================

/// Inner state of the broadcast registry
pub struct BroadcastRegistryInner {
    /// The global target listeners are attached to
    window: Arc<dyn GlobalTarget>,
    /// Subscriber sets keyed by `(event_type, capture)`
    entries: IndexMap<PairKey, Entry>,
}

impl BroadcastRegistryInner {
    fn new(window: Arc<dyn GlobalTarget>) -> Self {
        Self {
            window,
            entries: IndexMap::new(),
        }
    }

    /// Snapshot the handlers for a pair, in registration order
    ///
    /// Handlers are cloned out so the underlying dispatch can invoke
    /// them without holding the registry lock; a handler may therefore
    /// register or deregister re-entrantly.
    fn handlers_for(&self, key: &PairKey) -> SmallVec<[GlobalHandler; 4]> {
        self.entries
            .get(key)
            .map(|entry| entry.handlers.clone())
            .unwrap_or_default()
    }

    /// Number of subscribers for a pair
    pub fn subscriber_count(&self, event_type: &str, capture: bool) -> usize {
        self.entries
            .get(&(event_type.to_owned(), capture))
            .map(|entry| entry.handlers.len())
            .unwrap_or(0)
    }
}

// =============================================================================
// BroadcastRegistry
// =============================================================================

/// Thread-safe broadcast registry
pub type BroadcastRegistry = Arc<Mutex<BroadcastRegistryInner>>;

/// Create a broadcast registry attached to the given global target
pub fn broadcast_registry(window: Arc<dyn GlobalTarget>) -> BroadcastRegistry {
    Arc::new(Mutex::new(BroadcastRegistryInner::new(window)))
}

/// Extension trait for the registry's registration surface
pub trait BroadcastRegistryExt {
    /// Add `handler` to the subscriber set for `(event_type, capture)`
    ///
    /// The first subscriber for a pair attaches one underlying listener
    /// on the global target; every event it delivers is fanned out to
    /// the currently registered handlers in registration order.
    /// Registering the same handler instance twice is a no-op.
    fn register(&self, event_type: &str, capture: bool, handler: GlobalHandler);

    /// Remove `handler` from the subscriber set for `(event_type, capture)`
    ///
    /// Removing the last subscriber detaches the underlying listener.
    /// Deregistering a handler that is not present is a no-op.
    fn deregister(&self, event_type: &str, capture: bool, handler: &GlobalHandler);

    /// Number of subscribers for a pair
    fn subscriber_count(&self, event_type: &str, capture: bool) -> usize;
}

impl BroadcastRegistryExt for BroadcastRegistry {
    fn register(&self, event_type: &str, capture: bool, handler: GlobalHandler) {
        let key: PairKey = (event_type.to_owned(), capture);
        let mut inner = self.lock().unwrap();

        if let Some(entry) = inner.entries.get_mut(&key) {
            if entry.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                return;
            }
            entry.handlers.push(handler);
            return;
        }

        // 0 -> 1 edge: attach the single underlying listener. The
        // dispatch closure holds a weak reference so a dropped registry
        // does not keep itself alive through the global target.
        let weak: Weak<Mutex<BroadcastRegistryInner>> = Arc::downgrade(self);
        let dispatch_key = key.clone();
        let dispatch: EventCallback = Arc::new(move |event: &Event| {
            let Some(registry) = weak.upgrade() else {
                return;
            };
            let handlers = registry.lock().unwrap().handlers_for(&dispatch_key);
            for current in handlers {
                current(event);
            }
        });

        let listener = inner.window.add_listener(event_type, capture, dispatch);
        tracing::debug!(event_type, capture, "registry: attached global listener");

        let mut handlers = SmallVec::new();
        handlers.push(handler);
        inner.entries.insert(key, Entry { handlers, listener });
    }

    fn deregister(&self, event_type: &str, capture: bool, handler: &GlobalHandler) {
        let key: PairKey = (event_type.to_owned(), capture);
        let mut inner = self.lock().unwrap();

        let Some(entry) = inner.entries.get_mut(&key) else {
            return;
        };
        let Some(index) = entry.handlers.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return;
        };
        entry.handlers.remove(index);

        // 1 -> 0 edge: detach the underlying listener.
        if entry.handlers.is_empty() {
            let listener = entry.listener;
            inner.entries.shift_remove(&key);
            inner.window.remove_listener(listener);
            tracing::debug!(event_type, capture, "registry: detached global listener");
        }
    }

    fn subscriber_count(&self, event_type: &str, capture: bool) -> usize {
        self.lock().unwrap().subscriber_count(event_type, capture)
    }
}

// =============================================================================
// Tests
// =============================================================================
