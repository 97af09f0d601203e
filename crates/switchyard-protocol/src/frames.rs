//! Relay wire frames.
//!
//! Networked transports talk to a relay with these frames. A session opens
//! with `hello` / `welcome`, after which either side may send any of the
//! topic frames. Payloads are opaque bytes produced by a message codec; the
//! relay never decodes them.

use serde::{Deserialize, Serialize};

/// Current protocol version. Peers with a different version are rejected.
pub const PROTOCOL_VERSION: u8 = 1;

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// The peer speaks another protocol version.
    pub const INCOMPATIBLE_VERSION: u16 = 1001;
    /// The first frame of a session was not `hello`.
    pub const HANDSHAKE_REQUIRED: u16 = 1002;
    /// Malformed topic name.
    pub const INVALID_TOPIC: u16 = 1003;
    /// Unsubscribe for a topic the session never subscribed to.
    pub const NOT_SUBSCRIBED: u16 = 1004;
    /// A relay limit was hit.
    pub const LIMIT_REACHED: u16 = 1005;
    /// Payload over the configured maximum.
    pub const MESSAGE_TOO_LARGE: u16 = 1006;
    /// Bytes that do not decode as a frame.
    pub const MALFORMED_FRAME: u16 = 1007;
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Client greeting, always the first frame of a session.
    Hello {
        /// Protocol version spoken by the client.
        version: u8,
        /// Optional human-readable client name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client: Option<String>,
    },

    /// Relay reply to a compatible `hello`.
    Welcome {
        /// Identifier the relay assigned to this session.
        session_id: String,
        /// Protocol version spoken by the relay.
        version: u8,
    },

    /// Start receiving publishes for a topic.
    Subscribe {
        /// Topic name.
        topic: String,
    },

    /// Stop receiving publishes for a topic.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },

    /// Declare the intent to publish on a topic.
    Advertise {
        /// Topic name.
        topic: String,
    },

    /// Withdraw an advertisement.
    Unadvertise {
        /// Topic name.
        topic: String,
    },

    /// A codec-encoded message for a topic.
    Publish {
        /// Topic name.
        topic: String,
        /// Encoded message data.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Error report.
    Error {
        /// One of [`codes`].
        code: u16,
        /// Human-readable description.
        message: String,
    },
}

impl Frame {
    /// Short frame name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Welcome { .. } => "welcome",
            Frame::Subscribe { .. } => "subscribe",
            Frame::Unsubscribe { .. } => "unsubscribe",
            Frame::Advertise { .. } => "advertise",
            Frame::Unadvertise { .. } => "unadvertise",
            Frame::Publish { .. } => "publish",
            Frame::Error { .. } => "error",
        }
    }

    /// The topic a frame refers to, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Frame::Subscribe { topic }
            | Frame::Unsubscribe { topic }
            | Frame::Advertise { topic }
            | Frame::Unadvertise { topic }
            | Frame::Publish { topic, .. } => Some(topic),
            _ => None,
        }
    }

    /// Create a `hello` frame for the current protocol version.
    #[must_use]
    pub fn hello(client: Option<String>) -> Self {
        Frame::Hello {
            version: PROTOCOL_VERSION,
            client,
        }
    }

    /// Create a `welcome` frame.
    #[must_use]
    pub fn welcome(session_id: impl Into<String>) -> Self {
        Frame::Welcome {
            session_id: session_id.into(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Create a `subscribe` frame.
    #[must_use]
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Frame::Subscribe { topic: topic.into() }
    }

    /// Create an `unsubscribe` frame.
    #[must_use]
    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Frame::Unsubscribe { topic: topic.into() }
    }

    /// Create an `advertise` frame.
    #[must_use]
    pub fn advertise(topic: impl Into<String>) -> Self {
        Frame::Advertise { topic: topic.into() }
    }

    /// Create an `unadvertise` frame.
    #[must_use]
    pub fn unadvertise(topic: impl Into<String>) -> Self {
        Frame::Unadvertise { topic: topic.into() }
    }

    /// Create a `publish` frame.
    #[must_use]
    pub fn publish(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Publish {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Create an `error` frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_kind_and_topic() {
        let publish = Frame::publish("sensors/t-1", b"{}".to_vec());
        assert_eq!(publish.kind(), "publish");
        assert_eq!(publish.topic(), Some("sensors/t-1"));

        let hello = Frame::hello(None);
        assert_eq!(hello.kind(), "hello");
        assert_eq!(hello.topic(), None);
    }

    #[test]
    fn test_hello_carries_protocol_version() {
        match Frame::hello(Some("probe".into())) {
            Frame::Hello { version, client } => {
                assert_eq!(version, PROTOCOL_VERSION);
                assert_eq!(client.as_deref(), Some("probe"));
            }
            other => panic!("Expected hello, got {:?}", other),
        }
    }
}
