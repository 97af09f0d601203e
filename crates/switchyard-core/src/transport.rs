//! The transport contract.
//!
//! A [`Transport`] moves [`Message`]s between publishers and subscribers.
//! Every implementation, in-process or networked, must honour the same rules:
//!
//! - `publish` and `subscribe` route their work through `on_ready`, so calls
//!   made before the connection is established are deferred, never dropped.
//! - `subscribe` returns a fresh [`SubscriptionId`] on every call, even for
//!   the same callback on the same topic.
//! - Once `unsubscribe_by_id` or `unsubscribe` returns, the removed callbacks
//!   receive nothing more.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_protocol::Message;
use tokio::sync::oneshot;

use crate::error::{ListenerError, TransportError};
use crate::readiness::{ConnectionState, ReadyCallback};
use crate::topic::TopicInfo;

/// Callback a transport invokes for every message on a subscribed topic.
pub type MessageCallback = Arc<dyn Fn(&Message) -> Result<(), ListenerError> + Send + Sync>;

/// Identifies one `(topic, callback)` registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId {
    topic: Arc<str>,
    seq: u64,
}

impl SubscriptionId {
    /// Build an id. Transports mint these from their own counter.
    #[must_use]
    pub fn new(topic: Arc<str>, seq: u64) -> Self {
        Self { topic, seq }
    }

    /// Topic the subscription belongs to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Per-transport sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.topic, self.seq)
    }
}

/// Identifies one `advertise` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdvertiseId {
    topic: Arc<str>,
    seq: u64,
}

impl AdvertiseId {
    /// Build an id. Transports mint these from their own counter.
    #[must_use]
    pub fn new(topic: Arc<str>, seq: u64) -> Self {
        Self { topic, seq }
    }

    /// Advertised topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Per-transport sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for AdvertiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.topic, self.seq)
    }
}

/// Monotonic id source shared by a transport's advertise and subscribe paths.
#[derive(Debug)]
pub struct IdCounter(AtomicU64);

impl IdCounter {
    /// A counter whose first value is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Take the next value.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A messaging backend.
///
/// The trait is object safe; publishers and subscribers hold transports as
/// `Arc<dyn Transport>` so one backend can serve many of them.
pub trait Transport: Send + Sync {
    /// Short backend name for logs, e.g. `"memory"`.
    fn name(&self) -> &'static str;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Whether work would run immediately.
    fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Run `callback` now if connected, otherwise exactly once on connection.
    fn on_ready(&self, callback: ReadyCallback);

    /// Declare intent to publish on `topic`. Each call yields a new id.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the transport was closed.
    fn advertise(&self, topic: &TopicInfo) -> Result<AdvertiseId, TransportError>;

    /// Reverse one `advertise`. Unknown ids are ignored.
    fn unadvertise(&self, id: &AdvertiseId);

    /// Deliver `message` to every subscriber of `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] after `close`, or a protocol error if
    /// the message cannot be encoded for the wire.
    fn publish(&self, topic: &TopicInfo, message: Message) -> Result<(), TransportError>;

    /// Register `callback` for every later message on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] after `close`.
    fn subscribe(&self, topic: &TopicInfo, callback: MessageCallback) -> Result<SubscriptionId, TransportError>;

    /// Remove exactly one registration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotFound`] if `id` is unknown or already
    /// removed.
    fn unsubscribe_by_id(&self, id: &SubscriptionId) -> Result<(), TransportError>;

    /// Remove every registration on `topic`, returning how many there were.
    fn unsubscribe(&self, topic: &TopicInfo) -> usize;

    /// Number of registrations on `topic`.
    fn subscription_count(&self, topic: &TopicInfo) -> usize;

    /// Tear the transport down. No delivery happens after this returns.
    fn close(&self);
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Wait until `transport` is ready, giving up after `timeout`.
///
/// # Errors
///
/// Returns [`TransportError::NotReady`] on timeout and
/// [`TransportError::Closed`] if the transport dropped the pending callback.
pub async fn wait_ready(transport: &dyn Transport, timeout: Duration) -> Result<(), TransportError> {
    let (tx, rx) = oneshot::channel();
    transport.on_ready(Box::new(move || {
        let _ = tx.send(());
    }));

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(TransportError::Closed),
        Err(_) => Err(TransportError::NotReady(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let id = SubscriptionId::new(Arc::from("a#b"), 7);
        assert_eq!(id.to_string(), "a#b#7");
        assert_eq!(id.topic(), "a#b");
        assert_eq!(id.seq(), 7);
    }

    #[test]
    fn test_ids_are_structured() {
        // Topic names containing the display separator cannot collide.
        let a = SubscriptionId::new(Arc::from("x#1"), 2);
        let b = SubscriptionId::new(Arc::from("x"), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_counter_is_monotonic() {
        let counter = IdCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.next(), 3);
    }
}
