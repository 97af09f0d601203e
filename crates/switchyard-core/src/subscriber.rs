//! Subscribing façade.
//!
//! A [`Subscriber`] parses every message its transport delivers into `M` and
//! hands it to a [`MessageHandler`]. Plain closures are handlers; types that
//! need their own state implement the trait directly.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use switchyard_protocol::{Message, MessageType};
use tracing::debug;

use crate::error::{ListenerError, TransportError};
use crate::global::default_transport;
use crate::topic::Topic;
use crate::transport::{MessageCallback, SubscriptionId, Transport};

/// Receives parsed messages.
pub trait MessageHandler<M>: Send + Sync + 'static {
    /// Called once per delivered message.
    ///
    /// # Errors
    ///
    /// A returned error is logged by the transport and does not affect other
    /// subscribers.
    fn message_received(&self, message: M) -> Result<(), ListenerError>;
}

impl<M, F> MessageHandler<M> for F
where
    F: Fn(M) + Send + Sync + 'static,
{
    fn message_received(&self, message: M) -> Result<(), ListenerError> {
        self(message);
        Ok(())
    }
}

/// Handler built from a closure that can fail.
pub struct Fallible<F>(F);

/// Wrap a fallible closure as a [`MessageHandler`].
pub fn fallible<M, F>(f: F) -> Fallible<F>
where
    F: Fn(M) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Fallible(f)
}

impl<M, F> MessageHandler<M> for Fallible<F>
where
    F: Fn(M) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    fn message_received(&self, message: M) -> Result<(), ListenerError> {
        (self.0)(message)
    }
}

/// Receives messages of type `M` from one topic.
pub struct Subscriber<M: MessageType = Message> {
    topic: Topic<M>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler<M>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl<M: MessageType> Subscriber<M> {
    /// Bind to the process-wide default transport as installed right now.
    #[must_use]
    pub fn new(topic: Topic<M>, handler: impl MessageHandler<M>) -> Self {
        Self::with_transport(topic, handler, default_transport())
    }

    /// Bind to an explicit transport.
    #[must_use]
    pub fn with_transport(topic: Topic<M>, handler: impl MessageHandler<M>, transport: Arc<dyn Transport>) -> Self {
        Self {
            topic,
            transport,
            handler: Arc::new(handler),
            subscription: Mutex::new(None),
        }
    }

    /// The topic.
    #[must_use]
    pub fn topic(&self) -> &Topic<M> {
        &self.topic
    }

    /// Whether a subscription is active.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// The active subscription id, if any.
    #[must_use]
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription.lock().clone()
    }

    /// Start receiving. Calling this while subscribed returns the existing id.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub fn subscribe(&self) -> Result<SubscriptionId, TransportError> {
        let mut slot = self.subscription.lock();
        if let Some(id) = slot.as_ref() {
            return Ok(id.clone());
        }

        let id = self.transport.subscribe(self.topic.info(), self.callback())?;
        *slot = Some(id.clone());
        Ok(id)
    }

    /// Stop receiving. A no-op if not subscribed.
    ///
    /// Local state is cleared even when the transport reports an error, so a
    /// later `subscribe` always starts fresh.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotFound`] if the transport already dropped
    /// the subscription, e.g. through a bulk unsubscribe.
    pub fn unsubscribe(&self) -> Result<(), TransportError> {
        let Some(id) = self.subscription.lock().take() else {
            return Ok(());
        };
        debug!(topic = %self.topic.info(), subscription = %id, "Subscriber leaving");
        self.transport.unsubscribe_by_id(&id)
    }

    fn callback(&self) -> MessageCallback {
        let handler = Arc::clone(&self.handler);
        let topic = self.topic.info().name_arc();
        Arc::new(move |message: &Message| -> Result<(), ListenerError> {
            let parsed = M::parse(message.data().clone()).map_err(|source| ListenerError::Parse {
                topic: topic.to_string(),
                source,
            })?;
            handler.message_received(parsed)
        })
    }
}

impl<M: MessageType> fmt::Debug for Subscriber<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.topic)
            .field("transport", &self.transport.name())
            .field("subscription", &*self.subscription.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTransport;
    use crate::publisher::Publisher;
    use serde::{Deserialize, Serialize};
    use switchyard_protocol::serde_message;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestMessage {
        name: String,
    }

    impl TestMessage {
        fn hello_name(&self) -> String {
            format!("Hello {}", self.name)
        }
    }

    serde_message!(TestMessage);

    #[derive(Debug, Serialize, Deserialize)]
    struct Reading {
        celsius: f64,
    }

    serde_message!(Reading);

    fn transport() -> Arc<dyn Transport> {
        Arc::new(InMemoryTransport::new())
    }

    fn collect<M: Send + 'static>() -> (Arc<Mutex<Vec<M>>>, impl Fn(M) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |m: M| sink.lock().push(m))
    }

    #[test]
    fn test_dict_like_publish() {
        let transport = transport();
        let topic: Topic = Topic::new("/messages_test/").unwrap();
        let (log, handler) = collect::<Message>();

        let subscriber = Subscriber::with_transport(topic.clone(), handler, transport.clone());
        subscriber.subscribe().unwrap();

        let publisher = Publisher::with_transport(topic, transport);
        publisher.publish(&Message::new().with("text", "hello#0")).unwrap();

        assert_eq!(log.lock()[0].get_str("text"), Some("hello#0"));
    }

    #[test]
    fn test_typed_message() {
        let transport = transport();
        let topic: Topic<TestMessage> = Topic::new("/typed/").unwrap();
        let (log, handler) = collect::<TestMessage>();

        Subscriber::with_transport(topic.clone(), handler, transport.clone())
            .subscribe()
            .unwrap();
        Publisher::with_transport(topic, transport)
            .publish(&TestMessage { name: "Jazz".into() })
            .unwrap();

        let received = log.lock();
        assert_eq!(received[0].name, "Jazz");
        assert_eq!(received[0].hello_name(), "Hello Jazz");
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let transport = transport();
        let topic: Topic = Topic::new("idem").unwrap();
        let (log, handler) = collect::<Message>();

        let subscriber = Subscriber::with_transport(topic.clone(), handler, transport.clone());
        let first = subscriber.subscribe().unwrap();
        let second = subscriber.subscribe().unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.subscription_count(topic.info()), 1);

        Publisher::with_transport(topic, transport).publish(&Message::new()).unwrap();
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_unsubscribe_isolation_and_fresh_ids() {
        let transport = transport();
        let topic: Topic = Topic::new("iso").unwrap();
        let (left_log, left) = collect::<Message>();
        let (right_log, right) = collect::<Message>();

        let leaving = Subscriber::with_transport(topic.clone(), left, transport.clone());
        let staying = Subscriber::with_transport(topic.clone(), right, transport.clone());
        let old = leaving.subscribe().unwrap();
        staying.subscribe().unwrap();

        leaving.unsubscribe().unwrap();
        leaving.unsubscribe().unwrap();
        assert!(!leaving.is_subscribed());

        let publisher = Publisher::with_transport(topic, transport);
        publisher.publish(&Message::new()).unwrap();
        assert!(left_log.lock().is_empty());
        assert_eq!(right_log.lock().len(), 1);

        let fresh = leaving.subscribe().unwrap();
        assert_ne!(old, fresh);
        publisher.publish(&Message::new()).unwrap();
        assert_eq!(left_log.lock().len(), 1);
    }

    #[test]
    fn test_unsubscribe_after_bulk_removal() {
        let transport = transport();
        let topic: Topic = Topic::new("bulk").unwrap();
        let subscriber = Subscriber::with_transport(topic.clone(), |_: Message| {}, transport.clone());
        subscriber.subscribe().unwrap();

        transport.unsubscribe(topic.info());
        assert!(matches!(subscriber.unsubscribe(), Err(TransportError::NotFound(_))));
        assert!(!subscriber.is_subscribed());
    }

    #[test]
    fn test_parse_failure_is_isolated() {
        let transport = transport();
        let readings: Topic<Reading> = Topic::new("sensor").unwrap();
        let (log, handler) = collect::<Reading>();
        let (raw_log, raw) = collect::<Message>();

        Subscriber::with_transport(readings.clone(), handler, transport.clone())
            .subscribe()
            .unwrap();
        Subscriber::with_transport(readings.retype::<Message>(), raw, transport.clone())
            .subscribe()
            .unwrap();

        let publisher = Publisher::with_transport(readings.retype::<Message>(), transport);
        publisher.publish(&Message::new().with("celsius", "warm")).unwrap();
        publisher.publish(&Message::new().with("celsius", 21.5)).unwrap();

        assert_eq!(raw_log.lock().len(), 2);
        let parsed = log.lock();
        assert_eq!(parsed.len(), 1);
        assert!((parsed[0].celsius - 21.5).abs() < f64::EPSILON);
    }

    struct Counter {
        seen: Mutex<usize>,
    }

    impl MessageHandler<Message> for Counter {
        fn message_received(&self, message: Message) -> Result<(), ListenerError> {
            if message.contains_key("reject") {
                return Err(ListenerError::failed("rejected"));
            }
            *self.seen.lock() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_custom_handler_and_fallible() {
        let transport = transport();
        let topic: Topic = Topic::new("custom").unwrap();

        let subscriber = Subscriber::with_transport(
            topic.clone(),
            Counter { seen: Mutex::new(0) },
            transport.clone(),
        );
        subscriber.subscribe().unwrap();

        let failures = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&failures);
        Subscriber::with_transport(
            topic.clone(),
            fallible(move |m: Message| {
                if m.is_empty() {
                    *sink.lock() += 1;
                    return Err(ListenerError::failed("empty"));
                }
                Ok(())
            }),
            transport.clone(),
        )
        .subscribe()
        .unwrap();

        let publisher = Publisher::with_transport(topic, transport);
        publisher.publish(&Message::new()).unwrap();
        publisher.publish(&Message::new().with("reject", true)).unwrap();

        assert_eq!(*failures.lock(), 1);
    }
}
