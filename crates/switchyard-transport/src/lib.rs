//! # switchyard-transport
//!
//! Networked implementations of the Switchyard [`Transport`] contract.
//!
//! - **WebSocket** - client of a `switchyard` relay, speaking the framed relay
//!   protocol over a single WebSocket connection
//!
//! Every networked transport owns one background task holding the socket.
//! Decoded inbound messages are pushed into the same dispatch core the
//! in-process transport uses, so subscribers see identical semantics.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchyard_core::{Message, Publisher, Topic};
//! use switchyard_transport::{WebSocketConfig, WebSocketTransport};
//!
//! let transport = Arc::new(WebSocketTransport::connect(WebSocketConfig::new("ws://127.0.0.1:7400/ws"))?);
//! let publisher = Publisher::with_transport(Topic::new("sensors")?, transport);
//! publisher.publish(&Message::new().with("celsius", 21.5))?;
//! ```

#[cfg(feature = "websocket")]
pub mod websocket;

pub use switchyard_core::Transport;

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
