//! Subscription bookkeeping shared by the local and networked transports.
//!
//! Subscribing is split in two steps: [`SubscriptionRegistry::mint`] hands
//! out the id immediately, [`SubscriptionRegistry::activate`] attaches the
//! callback once the transport is ready. Removing an id that is still pending
//! cancels its activation.

use dashmap::DashMap;
use switchyard_protocol::Message;
use tracing::debug;

use crate::error::TransportError;
use crate::event::{EmitReport, EventEmitter, ListenerId};
use crate::topic::{event_key, TopicInfo};
use crate::transport::{IdCounter, MessageCallback, SubscriptionId};

/// Subscription side table plus the dispatch core it feeds.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    events: EventEmitter<Message>,
    table: DashMap<SubscriptionId, Option<ListenerId>>,
    ids: IdCounter,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next value of the transport-wide id counter.
    pub fn next_id(&self) -> u64 {
        self.ids.next()
    }

    /// Reserve a new subscription id on `topic`.
    pub fn mint(&self, topic: &TopicInfo) -> SubscriptionId {
        let id = SubscriptionId::new(topic.name_arc(), self.ids.next());
        self.table.insert(id.clone(), None);
        id
    }

    /// Attach `callback` to a minted id.
    ///
    /// Returns `false` if the id was removed in the meantime.
    pub fn activate(&self, id: &SubscriptionId, callback: MessageCallback) -> bool {
        // The table guard is held across registration so a concurrent
        // `remove` either sees the listener or prevents it.
        let Some(mut slot) = self.table.get_mut(id) else {
            debug!(subscription = %id, "Subscription cancelled before activation");
            return false;
        };
        *slot = Some(self.events.on_shared(event_key(id.topic()), callback));
        true
    }

    /// Remove one subscription.
    ///
    /// Returns whether a callback had been attached.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotFound`] if `id` is unknown.
    pub fn remove(&self, id: &SubscriptionId) -> Result<bool, TransportError> {
        match self.table.remove(id) {
            Some((_, Some(listener))) => {
                self.events.off(&event_key(id.topic()), listener);
                Ok(true)
            }
            Some((_, None)) => Ok(false),
            None => Err(TransportError::NotFound(id.clone())),
        }
    }

    /// Remove every subscription on `topic`, pending ones included.
    pub fn remove_topic(&self, topic: &str) -> usize {
        let ids: Vec<SubscriptionId> = self
            .table
            .iter()
            .filter(|entry| entry.key().topic() == topic)
            .map(|entry| entry.key().clone())
            .collect();

        let removed = ids.iter().filter(|id| self.table.remove(*id).is_some()).count();
        self.events.remove_all_listeners(&event_key(topic));
        removed
    }

    /// Deliver `message` to every active callback on `topic`.
    pub fn dispatch(&self, topic: &str, message: &Message) -> EmitReport {
        self.events.emit(&event_key(topic), message)
    }

    /// Subscriptions on `topic`, pending ones included.
    #[must_use]
    pub fn count(&self, topic: &str) -> usize {
        self.table.iter().filter(|entry| entry.key().topic() == topic).count()
    }

    /// Callbacks currently attached on `topic`.
    #[must_use]
    pub fn active_count(&self, topic: &str) -> usize {
        self.events.listener_count(&event_key(topic))
    }

    /// Total subscriptions across all topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Drop every subscription.
    pub fn clear(&self) -> usize {
        let removed = self.table.len();
        self.table.clear();
        self.events.clear();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn counting(hits: &Arc<Mutex<usize>>) -> MessageCallback {
        let hits = Arc::clone(hits);
        Arc::new(move |_: &Message| {
            *hits.lock() += 1;
            Ok(())
        })
    }

    #[test]
    fn test_mint_then_activate() {
        let registry = SubscriptionRegistry::new();
        let topic = TopicInfo::new("t").unwrap();
        let hits = Arc::new(Mutex::new(0));

        let id = registry.mint(&topic);
        assert_eq!(registry.count("t"), 1);
        assert_eq!(registry.active_count("t"), 0);

        assert!(registry.activate(&id, counting(&hits)));
        registry.dispatch("t", &Message::new());
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_remove_pending_cancels_activation() {
        let registry = SubscriptionRegistry::new();
        let topic = TopicInfo::new("t").unwrap();
        let hits = Arc::new(Mutex::new(0));

        let id = registry.mint(&topic);
        assert!(!registry.remove(&id).unwrap());
        assert!(!registry.activate(&id, counting(&hits)));

        registry.dispatch("t", &Message::new());
        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let registry = SubscriptionRegistry::new();
        let topic = TopicInfo::new("t").unwrap();
        let id = registry.mint(&topic);
        let callback: MessageCallback = Arc::new(|_: &Message| Ok(()));
        registry.activate(&id, callback);

        assert!(registry.remove(&id).unwrap());
        assert!(matches!(registry.remove(&id), Err(TransportError::NotFound(_))));
    }

    #[test]
    fn test_remove_topic_leaves_other_topics() {
        let registry = SubscriptionRegistry::new();
        let a = TopicInfo::new("a").unwrap();
        let b = TopicInfo::new("b").unwrap();
        let hits = Arc::new(Mutex::new(0));

        for _ in 0..3 {
            let id = registry.mint(&a);
            registry.activate(&id, counting(&hits));
        }
        let kept = registry.mint(&b);
        registry.activate(&kept, counting(&hits));

        assert_eq!(registry.remove_topic("a"), 3);
        assert_eq!(registry.remove_topic("a"), 0);
        assert_eq!(registry.len(), 1);

        registry.dispatch("a", &Message::new());
        registry.dispatch("b", &Message::new());
        assert_eq!(*hits.lock(), 1);
    }
}
