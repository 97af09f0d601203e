//! Topics.
//!
//! A topic names a channel and the message type expected on it. Routing only
//! ever looks at the name; the message type is a decode hint carried in the
//! type system.

use serde_json::Value;
use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use switchyard_protocol::Message;

use crate::error::TransportError;

/// Prefix of every topic's event key in the dispatch core.
pub const EVENT_KEY_PREFIX: &str = "event:";

/// Event key a topic's messages are emitted under.
#[must_use]
pub fn event_key(topic: &str) -> String {
    format!("{EVENT_KEY_PREFIX}{topic}")
}

/// Backend-specific tuning knobs attached to a topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicOptions(BTreeMap<String, Value>);

impl TopicOptions {
    /// Create an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up an option.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no options are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the options.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The untyped part of a topic; this is what transports receive.
#[derive(Debug, Clone)]
pub struct TopicInfo {
    name: Arc<str>,
    options: TopicOptions,
}

impl TopicInfo {
    /// Create a topic description.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTopic`] if the name is empty.
    pub fn new(name: impl Into<Arc<str>>) -> Result<Self, TransportError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TransportError::InvalidTopic("Topic name cannot be empty"));
        }
        Ok(Self {
            name,
            options: TopicOptions::default(),
        })
    }

    /// The topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the name, cheap to move into callbacks.
    #[must_use]
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// The topic options.
    #[must_use]
    pub fn options(&self) -> &TopicOptions {
        &self.options
    }

    /// The key this topic's messages are emitted under.
    #[must_use]
    pub fn event_key(&self) -> String {
        event_key(&self.name)
    }
}

impl PartialEq for TopicInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TopicInfo {}

impl Hash for TopicInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for TopicInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A named channel carrying messages of type `M`.
pub struct Topic<M = Message> {
    info: TopicInfo,
    _message: PhantomData<fn() -> M>,
}

impl<M> Topic<M> {
    /// Create a topic.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTopic`] if the name is empty.
    pub fn new(name: impl Into<Arc<str>>) -> Result<Self, TransportError> {
        Ok(Self {
            info: TopicInfo::new(name)?,
            _message: PhantomData,
        })
    }

    /// Replace the option set.
    #[must_use]
    pub fn with_options(mut self, options: TopicOptions) -> Self {
        self.info.options = options;
        self
    }

    /// Add a single option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.info.options = self.info.options.with(key, value);
        self
    }

    /// The same channel, decoded as another message type.
    #[must_use]
    pub fn retype<N>(&self) -> Topic<N> {
        Topic {
            info: self.info.clone(),
            _message: PhantomData,
        }
    }

    /// The topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.info.name()
    }

    /// The topic options.
    #[must_use]
    pub fn options(&self) -> &TopicOptions {
        self.info.options()
    }

    /// The untyped description handed to transports.
    #[must_use]
    pub fn info(&self) -> &TopicInfo {
        &self.info
    }
}

impl<M> Clone for Topic<M> {
    fn clone(&self) -> Self {
        self.retype()
    }
}

impl<M> fmt::Debug for Topic<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.info.name)
            .field("message_type", &type_name::<M>())
            .field("options", &self.info.options)
            .finish()
    }
}

impl<M, N> PartialEq<Topic<N>> for Topic<M> {
    fn eq(&self, other: &Topic<N>) -> bool {
        self.info == other.info
    }
}

impl<M> Eq for Topic<M> {}

impl<M> AsRef<TopicInfo> for Topic<M> {
    fn as_ref(&self) -> &TopicInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Other;

    #[test]
    fn test_topic_requires_name() {
        assert!(matches!(
            Topic::<Message>::new(""),
            Err(TransportError::InvalidTopic(_))
        ));
        assert!(Topic::<Message>::new("/messages_test/").is_ok());
    }

    #[test]
    fn test_identity_is_name_only() {
        let plain: Topic = Topic::new("room:1").unwrap();
        let typed: Topic<Other> = Topic::new(String::from("room:1"))
            .unwrap()
            .with_option("qos", 1);

        assert_eq!(plain, typed);
        assert_ne!(plain, Topic::<Message>::new("room:2").unwrap());
    }

    #[test]
    fn test_options_and_event_key() {
        let topic: Topic = Topic::new("sensors")
            .unwrap()
            .with_options(TopicOptions::new().with("retain", true));

        assert_eq!(topic.options().get("retain"), Some(&Value::Bool(true)));
        assert_eq!(topic.info().event_key(), "event:sensors");
        assert_eq!(topic.retype::<Other>().options().len(), 1);
    }
}
