//! # switchyard-protocol
//!
//! Data shapes shared by every Switchyard transport.
//!
//! - **Message** - key/value container plus the `Serializable` / `MessageType`
//!   capabilities typed messages implement
//! - **Codec** - strategies turning message data into bytes and back
//!   (JSON, MessagePack)
//! - **Frames** - the relay wire protocol spoken by networked transports
//!
//! ## Example
//!
//! ```rust
//! use switchyard_protocol::{CodecExt, JsonCodec, Message};
//!
//! let message = Message::new().with("text", "hello#0");
//!
//! let encoded = JsonCodec.encode_message(&message).unwrap();
//! let decoded: Message = JsonCodec.decode(&encoded).unwrap();
//! assert_eq!(decoded, message);
//! ```

pub mod codec;
pub mod error;
pub mod frames;
pub mod message;
pub mod wire;

pub use codec::{CodecExt, CodecKind, JsonCodec, MessageCodec, MessagePackCodec};
pub use error::ProtocolError;
pub use frames::{Frame, PROTOCOL_VERSION};
pub use message::{Fields, Message, MessageType, Serializable};
