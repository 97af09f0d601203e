//! Relay routing table.
//!
//! Each session registers an outbox. Subscribing a session to a topic adds
//! one listener to the dispatch core that pushes encoded frames into that
//! outbox; publishing encodes the `publish` frame once and emits the shared
//! bytes to every listener.

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use switchyard_core::topic::event_key;
use switchyard_core::{EventEmitter, ListenerError, ListenerId};
use switchyard_protocol::frames::codes;
use switchyard_protocol::{wire, Frame, ProtocolError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Maximum topic name length.
pub const MAX_TOPIC_NAME_LENGTH: usize = 256;

/// Channel feeding encoded frames to one session's socket.
pub type Outbox = mpsc::UnboundedSender<Bytes>;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique session id.
#[must_use]
pub fn generate_session_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sess_{timestamp:x}_{counter}")
}

/// Validate a topic name received from the wire.
///
/// # Errors
///
/// Returns a description of the problem.
pub fn validate_topic(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic name cannot be empty");
    }
    if name.len() > MAX_TOPIC_NAME_LENGTH {
        return Err("Topic name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Topic name contains control characters");
    }
    Ok(())
}

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Invalid topic name.
    #[error("Invalid topic: {0}")]
    InvalidTopic(&'static str),

    /// Unsubscribe for a topic the session is not subscribed to.
    #[error("Not subscribed to topic: {0}")]
    NotSubscribed(String),

    /// Maximum number of topics reached.
    #[error("Maximum topics reached")]
    MaxTopicsReached,

    /// Maximum subscriptions for this session reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Payload over the configured limit.
    #[error("Message of {size} bytes exceeds limit of {max}")]
    MessageTooLarge {
        /// Payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Session was never registered or already left.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Frame encoding failed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl RouterError {
    /// Wire error code reported to the client.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RouterError::InvalidTopic(_) => codes::INVALID_TOPIC,
            RouterError::NotSubscribed(_) => codes::NOT_SUBSCRIBED,
            RouterError::MaxTopicsReached | RouterError::MaxSubscriptionsReached => codes::LIMIT_REACHED,
            RouterError::MessageTooLarge { .. } => codes::MESSAGE_TOO_LARGE,
            RouterError::UnknownSession(_) => codes::HANDSHAKE_REQUIRED,
            RouterError::Protocol(_) => codes::MALFORMED_FRAME,
        }
    }

    /// The matching `error` frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::error(self.code(), self.to_string())
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of topics with at least one subscriber.
    pub max_topics: usize,
    /// Maximum subscriptions per session.
    pub max_subscriptions_per_session: usize,
    /// Maximum payload size in bytes.
    pub max_message_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_topics: 10_000,
            max_subscriptions_per_session: 100,
            max_message_size: 64 * 1024,
        }
    }
}

struct Session {
    outbox: Outbox,
    topics: DashMap<String, ListenerId>,
    advertised: DashMap<String, usize>,
}

/// The relay's routing table.
pub struct Router {
    events: EventEmitter<Bytes>,
    sessions: DashMap<String, Session>,
    advertisers: DashMap<String, usize>,
    config: RouterConfig,
}

impl Router {
    /// Create a router with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with custom limits.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!(?config, "Creating router");
        Self {
            events: EventEmitter::new(),
            sessions: DashMap::new(),
            advertisers: DashMap::new(),
            config,
        }
    }

    /// Register a session and the outbox its frames go to.
    pub fn register_session(&self, session_id: &str, outbox: Outbox) {
        self.sessions.insert(
            session_id.to_owned(),
            Session {
                outbox,
                topics: DashMap::new(),
                advertised: DashMap::new(),
            },
        );
        debug!(session = %session_id, "Session registered");
    }

    /// Drop a session with all its subscriptions and advertisements.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unregister_session(&self, session_id: &str) -> usize {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return 0;
        };

        let mut removed = 0;
        for entry in session.topics.iter() {
            if self.events.off(&event_key(entry.key()), *entry.value()) {
                removed += 1;
            }
        }
        for entry in session.advertised.iter() {
            self.release_advertisements(entry.key(), *entry.value());
        }

        debug!(session = %session_id, removed, "Session unregistered");
        removed
    }

    /// Subscribe a session to `topic`.
    ///
    /// Returns `false` if it was already subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid, a limit is reached or the
    /// session is unknown.
    pub fn subscribe(&self, session_id: &str, topic: &str) -> Result<bool, RouterError> {
        validate_topic(topic).map_err(RouterError::InvalidTopic)?;

        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| RouterError::UnknownSession(session_id.to_owned()))?;

        if session.topics.contains_key(topic) {
            trace!(session = %session_id, topic = %topic, "Already subscribed");
            return Ok(false);
        }
        if session.topics.len() >= self.config.max_subscriptions_per_session {
            return Err(RouterError::MaxSubscriptionsReached);
        }

        let key = event_key(topic);
        if self.events.listener_count(&key) == 0 && self.events.key_count() >= self.config.max_topics {
            return Err(RouterError::MaxTopicsReached);
        }

        let outbox = session.outbox.clone();
        let owner = session_id.to_owned();
        let listener = self.events.on(key, move |frame: &Bytes| {
            outbox
                .send(frame.clone())
                .map_err(|_| ListenerError::failed(format!("Outbox of session {owner} is closed")))
        });
        session.topics.insert(topic.to_owned(), listener);

        debug!(session = %session_id, topic = %topic, "Subscribed");
        Ok(true)
    }

    /// Unsubscribe a session from `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotSubscribed`] if the session is not
    /// subscribed to the topic.
    pub fn unsubscribe(&self, session_id: &str, topic: &str) -> Result<(), RouterError> {
        let listener = self
            .sessions
            .get(session_id)
            .and_then(|session| session.topics.remove(topic))
            .map(|(_, listener)| listener)
            .ok_or_else(|| RouterError::NotSubscribed(topic.to_owned()))?;

        self.events.off(&event_key(topic), listener);
        debug!(session = %session_id, topic = %topic, "Unsubscribed");
        Ok(())
    }

    /// Record an advertisement by a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid or the session is unknown.
    pub fn advertise(&self, session_id: &str, topic: &str) -> Result<(), RouterError> {
        validate_topic(topic).map_err(RouterError::InvalidTopic)?;
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| RouterError::UnknownSession(session_id.to_owned()))?;

        *session.advertised.entry(topic.to_owned()).or_default() += 1;
        *self.advertisers.entry(topic.to_owned()).or_default() += 1;
        debug!(session = %session_id, topic = %topic, "Advertised");
        Ok(())
    }

    /// Withdraw one advertisement. Returns `false` if there was none.
    pub fn unadvertise(&self, session_id: &str, topic: &str) -> bool {
        let Some(session) = self.sessions.get(session_id) else {
            return false;
        };
        let withdrawn = match session.advertised.get_mut(topic) {
            Some(mut count) => {
                *count -= 1;
                true
            }
            None => false,
        };
        if withdrawn {
            session.advertised.remove_if(topic, |_, count| *count == 0);
            self.release_advertisements(topic, 1);
        }
        withdrawn
    }

    fn release_advertisements(&self, topic: &str, count: usize) {
        if let Some(mut total) = self.advertisers.get_mut(topic) {
            *total = total.saturating_sub(count);
        }
        self.advertisers.remove_if(topic, |_, total| *total == 0);
    }

    /// Route a payload to every session subscribed to `topic`.
    ///
    /// Returns the number of sessions reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid or the payload too large.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<usize, RouterError> {
        validate_topic(topic).map_err(RouterError::InvalidTopic)?;
        if payload.len() > self.config.max_message_size {
            return Err(RouterError::MessageTooLarge {
                size: payload.len(),
                max: self.config.max_message_size,
            });
        }

        let frame = wire::encode(&Frame::publish(topic, payload))?;
        let report = self.events.emit(&event_key(topic), &frame);
        trace!(topic = %topic, recipients = report.delivered, "Routed");
        Ok(report.delivered)
    }

    /// Topics a session is subscribed to.
    #[must_use]
    pub fn session_topics(&self, session_id: &str) -> Vec<String> {
        let mut topics: Vec<String> = self
            .sessions
            .get(session_id)
            .map(|s| s.topics.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Number of sessions subscribed to `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.events.listener_count(&event_key(topic))
    }

    /// Live advertisements on `topic` across all sessions.
    #[must_use]
    pub fn advertiser_count(&self, topic: &str) -> usize {
        self.advertisers.get(topic).map(|c| *c).unwrap_or(0)
    }

    /// Router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            topic_count: self.events.key_count(),
            session_count: self.sessions.len(),
            total_subscriptions: self.sessions.iter().map(|s| s.topics.len()).sum(),
            advertised_topics: self.advertisers.len(),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Topics with at least one subscriber.
    pub topic_count: usize,
    /// Registered sessions.
    pub session_count: usize,
    /// Subscriptions across all sessions.
    pub total_subscriptions: usize,
    /// Topics with at least one advertisement.
    pub advertised_topics: usize,
}
