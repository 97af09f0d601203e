//! In-process transport.
//!
//! Distributes messages within the current process only, synchronously on
//! the publishing thread. Ideal for single-process applications and tests.

use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use switchyard_protocol::Message;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::readiness::{ConnectionState, ReadinessGate, ReadyCallback};
use crate::registry::SubscriptionRegistry;
use crate::topic::TopicInfo;
use crate::transport::{AdvertiseId, MessageCallback, SubscriptionId, Transport};

/// Transport backed purely by the event dispatch core.
#[derive(Debug)]
pub struct InMemoryTransport {
    registry: Arc<SubscriptionRegistry>,
    gate: Arc<ReadinessGate>,
    closed: Arc<AtomicBool>,
    advertised: DashSet<AdvertiseId>,
}

impl InMemoryTransport {
    /// A transport that is ready immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::with_readiness(Arc::new(ReadinessGate::connected()))
    }

    /// A transport driven by an external readiness gate.
    ///
    /// Useful to exercise deferred operations: nothing is delivered until the
    /// gate is marked connected.
    #[must_use]
    pub fn with_readiness(gate: Arc<ReadinessGate>) -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            gate,
            closed: Arc::new(AtomicBool::new(false)),
            advertised: DashSet::new(),
        }
    }

    /// The readiness gate.
    #[must_use]
    pub fn readiness(&self) -> &Arc<ReadinessGate> {
        &self.gate
    }

    /// Number of live advertisements on `topic`.
    #[must_use]
    pub fn advertiser_count(&self, topic: &TopicInfo) -> usize {
        self.advertised
            .iter()
            .filter(|id| id.topic() == topic.name())
            .count()
    }

    /// Total subscriptions across all topics.
    #[must_use]
    pub fn total_subscriptions(&self) -> usize {
        self.registry.len()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InMemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn state(&self) -> ConnectionState {
        self.gate.state()
    }

    fn on_ready(&self, callback: ReadyCallback) {
        if self.closed.load(Ordering::Acquire) {
            trace!("Dropping ready callback on closed transport");
            return;
        }
        self.gate.on_ready(callback);
    }

    fn advertise(&self, topic: &TopicInfo) -> Result<AdvertiseId, TransportError> {
        self.ensure_open()?;
        let id = AdvertiseId::new(topic.name_arc(), self.registry.next_id());
        self.advertised.insert(id.clone());
        debug!(topic = %topic, advertise = %id, "Advertised");
        Ok(id)
    }

    fn unadvertise(&self, id: &AdvertiseId) {
        if self.advertised.remove(id).is_some() {
            debug!(advertise = %id, "Unadvertised");
        }
    }

    fn publish(&self, topic: &TopicInfo, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;

        let registry = Arc::clone(&self.registry);
        let closed = Arc::clone(&self.closed);
        let name = topic.name_arc();
        self.gate.on_ready(move || {
            if closed.load(Ordering::Acquire) {
                trace!(topic = %name, "Dropping deferred publish on closed transport");
                return;
            }
            registry.dispatch(&name, &message);
        });
        Ok(())
    }

    fn subscribe(&self, topic: &TopicInfo, callback: MessageCallback) -> Result<SubscriptionId, TransportError> {
        self.ensure_open()?;

        let id = self.registry.mint(topic);
        let registry = Arc::clone(&self.registry);
        let pending = id.clone();
        self.gate.on_ready(move || {
            registry.activate(&pending, callback);
        });

        debug!(topic = %topic, subscription = %id, "Subscribed");
        Ok(id)
    }

    fn unsubscribe_by_id(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        self.registry.remove(id)?;
        debug!(subscription = %id, "Unsubscribed");
        Ok(())
    }

    fn unsubscribe(&self, topic: &TopicInfo) -> usize {
        let removed = self.registry.remove_topic(topic.name());
        debug!(topic = %topic, removed, "Unsubscribed topic");
        removed
    }

    fn subscription_count(&self, topic: &TopicInfo) -> usize {
        self.registry.count(topic.name())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let discarded = self.gate.discard_pending();
        let removed = self.registry.clear();
        self.advertised.clear();
        self.gate.mark_disconnected();
        debug!(discarded, removed, "In-memory transport closed");
    }
}
