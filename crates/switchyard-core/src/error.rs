//! Error types shared by every transport.

use std::time::Duration;
use switchyard_protocol::ProtocolError;
use thiserror::Error;

use crate::transport::SubscriptionId;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Invalid topic.
    #[error("Invalid topic: {0}")]
    InvalidTopic(&'static str),

    /// Unknown or already removed subscription.
    #[error("Subscription not found: {0}")]
    NotFound(SubscriptionId),

    /// The transport did not become ready within the caller's deadline.
    #[error("Transport not ready after {0:?}")]
    NotReady(Duration),

    /// The transport was closed.
    #[error("Transport closed")]
    Closed,

    /// The backend cannot be used in this environment.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// Encoding or decoding failure.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// A failure inside a single listener during an emission.
///
/// Listener errors never abort delivery to the remaining listeners; they are
/// logged and collected in [`EmitReport`](crate::event::EmitReport).
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Received data did not parse into the subscriber's message type.
    #[error("Failed to parse message on topic {topic}: {source}")]
    Parse {
        /// Topic the message arrived on.
        topic: String,
        /// Underlying decoding error.
        #[source]
        source: ProtocolError,
    },

    /// The handler reported a failure.
    #[error("Listener failed: {0}")]
    Failed(String),
}

impl ListenerError {
    /// Create a handler failure.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        ListenerError::Failed(reason.into())
    }
}
