//! Publishing façade.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use switchyard_protocol::{Message, Serializable};
use tracing::trace;

use crate::error::TransportError;
use crate::global::default_transport;
use crate::topic::Topic;
use crate::transport::{AdvertiseId, Transport};

type PublishedHook<M> = Box<dyn Fn(&M) + Send + Sync>;

/// Publishes messages of type `M` on one topic.
///
/// The first `publish` advertises the topic; later ones reuse that
/// advertisement until [`Publisher::unadvertise`] is called.
pub struct Publisher<M = Message> {
    topic: Topic<M>,
    transport: Arc<dyn Transport>,
    advertise_id: Mutex<Option<AdvertiseId>>,
    on_published: Option<PublishedHook<M>>,
}

impl<M: Serializable> Publisher<M> {
    /// Bind to the process-wide default transport as installed right now.
    #[must_use]
    pub fn new(topic: Topic<M>) -> Self {
        Self::with_transport(topic, default_transport())
    }

    /// Bind to an explicit transport.
    #[must_use]
    pub fn with_transport(topic: Topic<M>, transport: Arc<dyn Transport>) -> Self {
        Self {
            topic,
            transport,
            advertise_id: Mutex::new(None),
            on_published: None,
        }
    }

    /// Run `hook` after every successful publish.
    #[must_use]
    pub fn on_published(mut self, hook: impl Fn(&M) + Send + Sync + 'static) -> Self {
        self.on_published = Some(Box::new(hook));
        self
    }

    /// The topic.
    #[must_use]
    pub fn topic(&self) -> &Topic<M> {
        &self.topic
    }

    /// The transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Whether the topic is currently advertised.
    #[must_use]
    pub fn is_advertised(&self) -> bool {
        self.advertise_id.lock().is_some()
    }

    /// Advertise the topic. A no-op while already advertised.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub fn advertise(&self) -> Result<(), TransportError> {
        let mut slot = self.advertise_id.lock();
        if slot.is_none() {
            *slot = Some(self.transport.advertise(self.topic.info())?);
        }
        Ok(())
    }

    /// Withdraw the advertisement. A no-op if not advertised.
    pub fn unadvertise(&self) {
        if let Some(id) = self.advertise_id.lock().take() {
            self.transport.unadvertise(&id);
        }
    }

    /// Publish `message`, advertising first if needed.
    ///
    /// # Errors
    ///
    /// Fails if the message cannot be exported or the transport rejects it.
    pub fn publish(&self, message: &M) -> Result<(), TransportError> {
        self.advertise()?;

        let data = message.export()?;
        self.transport.publish(self.topic.info(), Message::from_fields(data))?;
        trace!(topic = %self.topic.info(), transport = self.transport.name(), "Published");

        if let Some(hook) = &self.on_published {
            hook(message);
        }
        Ok(())
    }
}

impl<M> fmt::Debug for Publisher<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("transport", &self.transport.name())
            .field("advertise_id", &*self.advertise_id.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTransport;
    use crate::topic::TopicInfo;

    fn setup() -> (Arc<InMemoryTransport>, Publisher) {
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::with_transport(Topic::new("adv").unwrap(), transport.clone());
        (transport, publisher)
    }

    #[test]
    fn test_lazy_advertise_happens_once() {
        let (transport, publisher) = setup();
        let info = TopicInfo::new("adv").unwrap();
        assert!(!publisher.is_advertised());

        publisher.publish(&Message::new()).unwrap();
        publisher.publish(&Message::new()).unwrap();

        assert!(publisher.is_advertised());
        assert_eq!(transport.advertiser_count(&info), 1);
    }

    #[test]
    fn test_unadvertise_then_publish_readvertises() {
        let (transport, publisher) = setup();
        let info = TopicInfo::new("adv").unwrap();

        publisher.publish(&Message::new()).unwrap();
        publisher.unadvertise();
        publisher.unadvertise();
        assert_eq!(transport.advertiser_count(&info), 0);

        publisher.publish(&Message::new()).unwrap();
        assert_eq!(transport.advertiser_count(&info), 1);
    }

    #[test]
    fn test_published_hook() {
        let (_transport, publisher) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let publisher = publisher.on_published(move |m: &Message| {
            sink.lock().push(m.get_i64("n"));
        });

        publisher.publish(&Message::new().with("n", 4)).unwrap();
        assert_eq!(*seen.lock(), [Some(4)]);
    }

    #[test]
    fn test_publish_on_closed_transport_fails() {
        let (transport, publisher) = setup();
        transport.close();
        assert!(matches!(
            publisher.publish(&Message::new()),
            Err(TransportError::Closed)
        ));
    }
}
