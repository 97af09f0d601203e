//! Process-wide default transport.
//!
//! A convenience for applications that use a single backend. Publishers and
//! subscribers built with `new` read the slot once, at construction; swapping
//! the default later does not move them. Prefer `with_transport` wherever the
//! transport can be passed explicitly.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::memory::InMemoryTransport;
use crate::transport::Transport;

static DEFAULT_TRANSPORT: Lazy<RwLock<Arc<dyn Transport>>> =
    Lazy::new(|| RwLock::new(Arc::new(InMemoryTransport::new())));

/// The installed default transport. Starts as an [`InMemoryTransport`].
#[must_use]
pub fn default_transport() -> Arc<dyn Transport> {
    Arc::clone(&DEFAULT_TRANSPORT.read())
}

/// Install `transport` as the default, returning the one it replaces.
pub fn set_default_transport(transport: Arc<dyn Transport>) -> Arc<dyn Transport> {
    info!(transport = transport.name(), "Default transport installed");
    std::mem::replace(&mut *DEFAULT_TRANSPORT.write(), transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::Publisher;
    use crate::subscriber::Subscriber;
    use crate::topic::Topic;
    use parking_lot::Mutex;
    use switchyard_protocol::Message;

    // The only test touching the global slot.
    #[test]
    fn test_default_binds_at_construction() {
        let first: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let previous = set_default_transport(Arc::clone(&first));
        assert_eq!(previous.name(), "memory");

        let topic: Topic = Topic::new("global").unwrap();
        let hits = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&hits);
        let subscriber = Subscriber::new(topic.clone(), move |_: Message| *sink.lock() += 1);
        subscriber.subscribe().unwrap();

        let second: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        set_default_transport(Arc::clone(&second));

        // Bound to `second`: never reaches the subscriber on `first`.
        Publisher::new(topic.clone()).publish(&Message::new()).unwrap();
        assert_eq!(*hits.lock(), 0);

        Publisher::with_transport(topic, first).publish(&Message::new()).unwrap();
        assert_eq!(*hits.lock(), 1);

        assert!(Arc::ptr_eq(&default_transport(), &second));
        set_default_transport(previous);
    }
}
