//! # switchyard-core
//!
//! Transport-agnostic publish/subscribe for Switchyard.
//!
//! Application code names [`Topic`]s and exchanges typed messages over them
//! through a [`Publisher`] and [`Subscriber`]; the [`Transport`] behind them
//! decides how messages actually move.
//!
//! - **Event** - named-event dispatch, the concurrency primitive every local
//!   transport is built on
//! - **Readiness** - connection state machine deferring work until connected
//! - **Transport** - the backend contract and [`InMemoryTransport`]
//! - **Publisher / Subscriber** - façades binding a topic to a transport
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Publisher  │────▶│  Transport  │────▶│  Subscriber  │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ EventEmitter│
//!                     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use switchyard_core::{InMemoryTransport, Message, Publisher, Subscriber, Topic, Transport};
//!
//! let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
//! let topic: Topic = Topic::new("/messages_test/").unwrap();
//!
//! let subscriber = Subscriber::with_transport(
//!     topic.clone(),
//!     |msg: Message| println!("received {msg}"),
//!     transport.clone(),
//! );
//! subscriber.subscribe().unwrap();
//!
//! let publisher = Publisher::with_transport(topic, transport);
//! publisher.publish(&Message::new().with("text", "hello#0")).unwrap();
//! ```

pub mod error;
pub mod event;
pub mod global;
pub mod memory;
pub mod publisher;
pub mod readiness;
pub mod registry;
pub mod subscriber;
pub mod topic;
pub mod transport;

pub use error::{ListenerError, TransportError};
pub use event::{EmitReport, EventEmitter, ListenerId};
pub use global::{default_transport, set_default_transport};
pub use memory::InMemoryTransport;
pub use publisher::Publisher;
pub use readiness::{ConnectionState, ReadinessGate, ReadyCallback};
pub use registry::SubscriptionRegistry;
pub use subscriber::{fallible, Fallible, MessageHandler, Subscriber};
pub use topic::{Topic, TopicInfo, TopicOptions};
pub use transport::{wait_ready, AdvertiseId, IdCounter, MessageCallback, SubscriptionId, Transport};

pub use switchyard_protocol::{serde_message, Fields, Message, MessageType, ProtocolError, Serializable};
