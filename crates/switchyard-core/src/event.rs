//! Named-event dispatch.
//!
//! [`EventEmitter`] maps event keys to ordered listener lists. It is the one
//! piece of shared mutable state every local transport is built on.
//!
//! Registration mutates the table under the key's shard lock. `emit` copies
//! the listener list under that lock, drops the lock and then calls each
//! listener in registration order, so a listener may freely register or
//! remove listeners (including itself) while it runs.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::ListenerError;

/// A listener callback.
pub type Listener<E> = dyn Fn(&E) -> Result<(), ListenerError> + Send + Sync;

/// Handle identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// The raw sequence number.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

struct Registration<E> {
    id: ListenerId,
    once: bool,
    callback: Arc<Listener<E>>,
}

/// Outcome of a single [`EventEmitter::emit`] call.
#[derive(Debug, Default)]
pub struct EmitReport {
    /// Listeners that returned `Ok`.
    pub delivered: usize,
    /// Errors returned by the remaining listeners.
    pub failures: Vec<ListenerError>,
}

impl EmitReport {
    /// Total number of listeners invoked.
    #[must_use]
    pub fn invoked(&self) -> usize {
        self.delivered + self.failures.len()
    }

    /// Whether every listener succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A thread-safe registry of listeners keyed by event name.
pub struct EventEmitter<E> {
    listeners: DashMap<String, Vec<Registration<E>>>,
    next_id: AtomicU64,
}

impl<E> EventEmitter<E> {
    /// Create an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, key: String, once: bool, callback: Arc<Listener<E>>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!(event = %key, listener = id.0, once, "Listener registered");
        self.listeners
            .entry(key)
            .or_default()
            .push(Registration { id, once, callback });
        id
    }

    /// Register a listener for every emission under `key`.
    pub fn on<F>(&self, key: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&E) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.register(key.into(), false, Arc::new(callback))
    }

    /// Register an already shared listener.
    pub fn on_shared(&self, key: impl Into<String>, callback: Arc<Listener<E>>) -> ListenerId {
        self.register(key.into(), false, callback)
    }

    /// Register a listener that is removed before its first invocation runs.
    pub fn once<F>(&self, key: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&E) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.register(key.into(), true, Arc::new(callback))
    }

    /// Remove one registration.
    ///
    /// Returns `false` if it was not registered under `key`.
    pub fn off(&self, key: &str, id: ListenerId) -> bool {
        let removed = match self.listeners.get_mut(key) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|r| r.id != id);
                before != entry.len()
            }
            None => false,
        };
        if removed {
            self.listeners.remove_if(key, |_, list| list.is_empty());
            trace!(event = %key, listener = id.0, "Listener removed");
        }
        removed
    }

    /// Remove every listener under `key`, returning how many there were.
    pub fn remove_all_listeners(&self, key: &str) -> usize {
        self.listeners
            .remove(key)
            .map(|(_, list)| list.len())
            .unwrap_or(0)
    }

    /// Remove every listener under every key.
    pub fn clear(&self) -> usize {
        let total = self.listeners.iter().map(|e| e.len()).sum();
        self.listeners.clear();
        total
    }

    /// Number of listeners under `key`.
    #[must_use]
    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners.get(key).map(|e| e.len()).unwrap_or(0)
    }

    /// Check whether `id` is still registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &str, id: ListenerId) -> bool {
        self.listeners
            .get(key)
            .map(|e| e.iter().any(|r| r.id == id))
            .unwrap_or(false)
    }

    /// Number of keys with at least one listener.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.listeners.len()
    }

    /// All keys with at least one listener.
    #[must_use]
    pub fn event_keys(&self) -> Vec<String> {
        self.listeners.iter().map(|e| e.key().clone()).collect()
    }

    /// Invoke every listener registered under `key` with `payload`.
    ///
    /// Listeners run synchronously, in registration order, on the calling
    /// thread. One-shot listeners are deregistered before any listener runs.
    /// A failing listener is logged and recorded; the rest still run.
    pub fn emit(&self, key: &str, payload: &E) -> EmitReport {
        let snapshot: Vec<Arc<Listener<E>>> = match self.listeners.get_mut(key) {
            Some(mut entry) => {
                let snapshot = entry.iter().map(|r| Arc::clone(&r.callback)).collect();
                entry.retain(|r| !r.once);
                snapshot
            }
            None => {
                trace!(event = %key, "Emit without listeners");
                return EmitReport::default();
            }
        };
        self.listeners.remove_if(key, |_, list| list.is_empty());

        let mut report = EmitReport::default();
        for callback in snapshot {
            match callback(payload) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(event = %key, error = %err, "Listener failed");
                    report.failures.push(err);
                }
            }
        }

        trace!(event = %key, delivered = report.delivered, failed = report.failures.len(), "Emitted");
        report
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("events", &self.listeners.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
