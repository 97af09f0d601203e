//! Connection readiness.
//!
//! Every transport routes its work through [`ReadinessGate::on_ready`]. When
//! the gate is connected the callback runs immediately on the caller's thread;
//! otherwise it is queued and runs exactly once, in FIFO order, on whichever
//! thread moves the gate to [`ConnectionState::Connected`].

use parking_lot::Mutex;
use std::fmt;
use tracing::debug;

use crate::event::EventEmitter;

const READY_EVENT: &str = "ready";

/// Work deferred until a transport is ready.
pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection; deferred work waits.
    Disconnected,
    /// A connection attempt is in flight; deferred work waits.
    Connecting,
    /// Connected; work runs immediately.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Connection state machine plus the queue of work waiting for it.
pub struct ReadinessGate {
    state: Mutex<ConnectionState>,
    events: EventEmitter<()>,
}

impl ReadinessGate {
    /// A gate in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(ConnectionState::Disconnected)
    }

    /// A gate that is already connected.
    #[must_use]
    pub fn connected() -> Self {
        Self::with_state(ConnectionState::Connected)
    }

    fn with_state(state: ConnectionState) -> Self {
        Self {
            state: Mutex::new(state),
            events: EventEmitter::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether deferred work would run immediately.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of callbacks waiting for the connection.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.events.listener_count(READY_EVENT)
    }

    /// Run `callback` now if connected, otherwise once the gate connects.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        let state = self.state.lock();
        if *state == ConnectionState::Connected {
            drop(state);
            callback();
            return;
        }

        // Registered while holding the state lock so a concurrent
        // `mark_connected` cannot slip between the check and the queueing.
        let slot = Mutex::new(Some(callback));
        self.events.once(READY_EVENT, move |_| {
            if let Some(callback) = slot.lock().take() {
                callback();
            }
            Ok(())
        });
    }

    /// `Disconnected -> Connecting`.
    ///
    /// Returns `false` if the gate was not disconnected.
    pub fn begin_connect(&self) -> bool {
        let mut state = self.state.lock();
        if *state != ConnectionState::Disconnected {
            return false;
        }
        *state = ConnectionState::Connecting;
        debug!("Transport connecting");
        true
    }

    /// Enter `Connected` and run every queued callback in FIFO order.
    ///
    /// Returns `false` if the gate was already connected.
    pub fn mark_connected(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Connected {
                return false;
            }
            *state = ConnectionState::Connected;
        }

        let report = self.events.emit(READY_EVENT, &());
        debug!(deferred = report.invoked(), "Transport connected");
        true
    }

    /// Enter `Disconnected`. Queued callbacks stay queued for the next
    /// connection.
    pub fn mark_disconnected(&self) -> ConnectionState {
        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            debug!(previous = %previous, "Transport disconnected");
        }
        previous
    }

    /// Drop every queued callback without running it.
    pub fn discard_pending(&self) -> usize {
        self.events.remove_all_listeners(READY_EVENT)
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}
