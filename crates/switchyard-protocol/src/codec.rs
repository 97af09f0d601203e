//! Message codecs.
//!
//! A codec turns a message mapping into bytes and back. Codecs are stateless
//! and shared freely between threads; transports hold them as
//! `Arc<dyn MessageCodec>`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::ProtocolError;
use crate::message::{value_kind, Fields, MessageType, Serializable};

/// Strategy converting message data to and from an encoded representation.
pub trait MessageCodec: Send + Sync + fmt::Debug {
    /// Short codec name, e.g. `"json"`.
    fn name(&self) -> &'static str;

    /// Encode a mapping.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if the data cannot be represented.
    fn encode(&self, data: &Fields) -> Result<Bytes, ProtocolError>;

    /// Decode bytes back into a mapping.
    ///
    /// # Errors
    ///
    /// Returns a decoding error if the bytes are malformed or do not hold a
    /// mapping.
    fn decode_fields(&self, encoded: &[u8]) -> Result<Fields, ProtocolError>;
}

/// Typed helpers available on every codec, including `dyn MessageCodec`.
pub trait CodecExt: MessageCodec {
    /// Export and encode a message.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if export or encoding fails.
    fn encode_message<M: Serializable + ?Sized>(&self, message: &M) -> Result<Bytes, ProtocolError> {
        let data = message.export()?;
        self.encode(&data)
    }

    /// Decode bytes into the message type `M` through `M::parse`.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding or parsing fails.
    fn decode<M: MessageType>(&self, encoded: &[u8]) -> Result<M, ProtocolError> {
        M::parse(self.decode_fields(encoded)?)
    }
}

impl<C: MessageCodec + ?Sized> CodecExt for C {}

fn into_fields(value: Value) -> Result<Fields, ProtocolError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::Decoding(format!(
            "expected a mapping, got {}",
            value_kind(&other)
        ))),
    }
}

/// JSON text codec. The default for every transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, data: &Fields) -> Result<Bytes, ProtocolError> {
        let encoded = serde_json::to_vec(data).map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        Ok(Bytes::from(encoded))
    }

    fn decode_fields(&self, encoded: &[u8]) -> Result<Fields, ProtocolError> {
        into_fields(serde_json::from_slice(encoded)?)
    }
}

/// Binary MessagePack codec (named maps).
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackCodec;

impl MessageCodec for MessagePackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, data: &Fields) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(rmp_serde::to_vec_named(data)?))
    }

    fn decode_fields(&self, encoded: &[u8]) -> Result<Fields, ProtocolError> {
        into_fields(rmp_serde::from_slice(encoded)?)
    }
}

/// Codec selection, as it appears in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Json,
    #[serde(alias = "messagepack")]
    Msgpack,
}

impl CodecKind {
    /// Build the codec this kind names.
    #[must_use]
    pub fn codec(self) -> Arc<dyn MessageCodec> {
        match self {
            CodecKind::Json => Arc::new(JsonCodec),
            CodecKind::Msgpack => Arc::new(MessagePackCodec),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Json => f.write_str("json"),
            CodecKind::Msgpack => f.write_str("msgpack"),
        }
    }
}

impl FromStr for CodecKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(CodecKind::Json),
            "msgpack" | "messagepack" => Ok(CodecKind::Msgpack),
            other => Err(ProtocolError::Decoding(format!("unknown codec `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde_json::json;

    fn sample() -> Message {
        Message::new()
            .with("string_val", "hello world")
            .with("int_val", 123)
            .with("float_val", 3.14159)
            .with("bool_val", true)
            .with("null_val", Value::Null)
            .with("list_val", json!([1, 2, 3]))
            .with("dict_val", json!({"key": "value"}))
    }

    fn codecs() -> Vec<Arc<dyn MessageCodec>> {
        vec![CodecKind::Json.codec(), CodecKind::Msgpack.codec()]
    }

    #[test]
    fn test_roundtrip_law() {
        for codec in codecs() {
            let original = sample();
            let mut current = original.clone();
            for _ in 0..3 {
                let encoded = codec.encode_message(&current).unwrap();
                current = codec.decode(&encoded).unwrap();
            }
            assert_eq!(current, original, "codec {}", codec.name());
            assert!(current["null_val"].is_null());
        }
    }

    #[test]
    fn test_nested_data() {
        let original = Message::new()
            .with("coordinates", json!([1.0, 2.0, 3.0]))
            .with("metadata", json!({"author": "test", "version": 1}))
            .with("tags", json!(["geometry", "point"]));

        for codec in codecs() {
            let decoded: Message = codec.decode(&codec.encode_message(&original).unwrap()).unwrap();
            assert_eq!(decoded["metadata"]["author"], "test");
            assert_eq!(decoded["metadata"]["version"], 1);
            assert_eq!(decoded.get_as::<Vec<f64>>("coordinates").unwrap().unwrap(), [1.0, 2.0, 3.0]);
        }
    }

    #[test]
    fn test_empty_message() {
        let encoded = JsonCodec.encode_message(&Message::new()).unwrap();
        assert_eq!(&encoded[..], b"{}");

        let decoded: Message = JsonCodec.decode(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_codecs_agree() {
        let original = Message::new()
            .with("name", "compatibility_test")
            .with("count", 100)
            .with("enabled", false)
            .with("data", json!([1, 2, 3, 4, 5]));

        let json: Message = JsonCodec.decode(&JsonCodec.encode_message(&original).unwrap()).unwrap();
        let msgpack: Message = MessagePackCodec
            .decode(&MessagePackCodec.encode_message(&original).unwrap())
            .unwrap();
        assert_eq!(json, msgpack);
    }

    #[test]
    fn test_decode_rejects_non_mapping() {
        match JsonCodec.decode_fields(b"[1, 2]") {
            Err(ProtocolError::Decoding(msg)) => assert!(msg.contains("an array")),
            other => panic!("Expected Decoding error, got {:?}", other),
        }
        assert!(matches!(JsonCodec.decode_fields(b"{not json"), Err(ProtocolError::Json(_))));
        assert!(MessagePackCodec.decode_fields(&[0xc1]).is_err());
    }

    #[test]
    fn test_codec_kind_parsing() {
        assert_eq!("json".parse::<CodecKind>().unwrap(), CodecKind::Json);
        assert_eq!("MessagePack".parse::<CodecKind>().unwrap(), CodecKind::Msgpack);
        assert!("protobuf".parse::<CodecKind>().is_err());
        assert_eq!(CodecKind::Msgpack.codec().name(), "msgpack");
        assert_eq!(CodecKind::default().to_string(), "json");
    }
}
