//! Message model.
//!
//! A [`Message`] is a string-keyed map of JSON values. Every accessor reads the
//! same backing map, so `message.get("name")` and `message["name"]` always
//! agree.
//!
//! Typed messages implement [`Serializable`] (export to a mapping) and
//! [`MessageType`] (parse from a mapping). Types that already derive serde's
//! traits can get both with [`serde_message!`](crate::serde_message).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Index;

use crate::error::ProtocolError;

/// The backing mapping of every message.
pub type Fields = Map<String, Value>;

static NULL: Value = Value::Null;

/// Capability of exporting a value as a message mapping.
pub trait Serializable {
    /// Export the value's fields.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encoding`] if the value cannot be represented
    /// as a mapping.
    fn export(&self) -> Result<Fields, ProtocolError>;
}

/// A message shape that can be rebuilt from decoded data.
pub trait MessageType: Serializable + Sized + Send + 'static {
    /// Build an instance from decoded fields, applying the shape's own
    /// projection or validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields do not describe a valid instance.
    fn parse(data: Fields) -> Result<Self, ProtocolError>;
}

/// Coerce any serde-serializable value into a mapping.
///
/// # Errors
///
/// Fails with [`ProtocolError::Encoding`] when the value does not serialize to
/// a JSON object.
pub fn to_fields<T: Serialize + ?Sized>(value: &T) -> Result<Fields, ProtocolError> {
    let value = serde_json::to_value(value).map_err(|e| ProtocolError::Encoding(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::Encoding(format!(
            "expected a mapping, got {}",
            value_kind(&other)
        ))),
    }
}

/// Deserialize a typed value from a mapping.
///
/// # Errors
///
/// Fails with [`ProtocolError::Decoding`] if the fields do not match `T`.
pub fn from_fields<T: DeserializeOwned>(data: Fields) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(data)).map_err(|e| ProtocolError::Decoding(e.to_string()))
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Implement [`Serializable`] and [`MessageType`] for types deriving
/// `Serialize` and `Deserialize`.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use switchyard_protocol::{serde_message, MessageType, Serializable};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Greeting {
///     name: String,
/// }
///
/// serde_message!(Greeting);
///
/// let data = Greeting { name: "Jazz".into() }.export().unwrap();
/// let parsed = Greeting::parse(data).unwrap();
/// assert_eq!(parsed.name, "Jazz");
/// ```
#[macro_export]
macro_rules! serde_message {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Serializable for $ty {
                fn export(&self) -> ::std::result::Result<$crate::Fields, $crate::ProtocolError> {
                    $crate::message::to_fields(self)
                }
            }

            impl $crate::MessageType for $ty {
                fn parse(data: $crate::Fields) -> ::std::result::Result<Self, $crate::ProtocolError> {
                    $crate::message::from_fields(data)
                }
            }
        )+
    };
}

/// The generic, untyped message container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    data: Fields,
}

impl Message {
    /// Create an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing mapping.
    #[must_use]
    pub fn from_fields(data: Fields) -> Self {
        Self { data }
    }

    /// Builder-style `set`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Get a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a string field.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Get an integer field.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Get a floating point field. Integers are widened.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    /// Get a boolean field.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Deserialize a field into `T`.
    ///
    /// Returns `Ok(None)` when the field is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decoding`] if the field does not match `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ProtocolError> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| ProtocolError::Decoding(e.to_string()))
            })
            .transpose()
    }

    /// Set a field, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    /// Remove a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check whether a field is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the message has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over the field names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Iterate over the fields.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The whole backing mapping.
    #[must_use]
    pub fn data(&self) -> &Fields {
        &self.data
    }

    /// Consume the message, returning its mapping.
    #[must_use]
    pub fn into_data(self) -> Fields {
        self.data
    }
}

impl Index<&str> for Message {
    type Output = Value;

    /// Missing keys index to `Value::Null`, matching `serde_json::Value`.
    fn index(&self, key: &str) -> &Value {
        self.data.get(key).unwrap_or(&NULL)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(&self.data).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl From<Fields> for Message {
    fn from(data: Fields) -> Self {
        Self::from_fields(data)
    }
}

impl From<Message> for Fields {
    fn from(message: Message) -> Self {
        message.data
    }
}

impl TryFrom<Value> for Message {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(data) => Ok(Self { data }),
            other => Err(ProtocolError::Decoding(format!(
                "expected a mapping, got {}",
                value_kind(&other)
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Message {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Serializable for Message {
    fn export(&self) -> Result<Fields, ProtocolError> {
        Ok(self.data.clone())
    }
}

impl MessageType for Message {
    fn parse(data: Fields) -> Result<Self, ProtocolError> {
        Ok(Self::from_fields(data))
    }
}

impl Serializable for Fields {
    fn export(&self) -> Result<Fields, ProtocolError> {
        Ok(self.clone())
    }
}

impl Serializable for Value {
    fn export(&self) -> Result<Fields, ProtocolError> {
        match self {
            Value::Object(map) => Ok(map.clone()),
            other => Err(ProtocolError::Encoding(format!(
                "expected a mapping, got {}",
                value_kind(other)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        celsius: f64,
    }

    crate::serde_message!(Reading);

    #[test]
    fn test_accessor_and_subscript_agree() {
        let mut msg = Message::new().with("name", "Jazz").with("count", 3);
        msg.set("done", true);

        for key in ["name", "count", "done", "missing"] {
            assert_eq!(msg.get(key).unwrap_or(&Value::Null), &msg[key]);
        }
        assert_eq!(msg.get_str("name"), Some("Jazz"));
        assert_eq!(msg.get_i64("count"), Some(3));
        assert_eq!(msg.get_f64("count"), Some(3.0));
        assert_eq!(msg.get_bool("done"), Some(true));
        assert!(msg["missing"].is_null());
    }

    #[test]
    fn test_message_display() {
        let msg = Message::new().with("a", 3);
        assert_eq!(msg.to_string(), r#"{"a":3}"#);
        assert_eq!(Message::new().to_string(), "{}");
    }

    #[test]
    fn test_get_as() {
        let msg = Message::new().with("tags", json!(["geometry", "point"]));
        let tags: Option<Vec<String>> = msg.get_as("tags").unwrap();
        assert_eq!(tags.unwrap(), vec!["geometry", "point"]);

        assert!(msg.get_as::<Vec<String>>("absent").unwrap().is_none());
        assert!(msg.get_as::<u32>("tags").is_err());
    }

    #[test]
    fn test_from_iterator_and_try_from() {
        let msg: Message = [("x", 1), ("y", 2)].into_iter().collect();
        assert_eq!(msg.len(), 2);

        let from_value = Message::try_from(json!({"x": 1, "y": 2})).unwrap();
        assert_eq!(msg, from_value);

        assert!(Message::try_from(json!([1, 2])).is_err());
    }

    #[test]
    fn test_typed_message_roundtrip() {
        let reading = Reading {
            sensor: "t-1".into(),
            celsius: 21.5,
        };
        let data = reading.export().unwrap();
        assert_eq!(data.get("sensor"), Some(&json!("t-1")));

        let parsed = Reading::parse(data).unwrap();
        assert_eq!(parsed, reading);
    }

    #[test]
    fn test_typed_message_rejects_bad_shape() {
        let data = Message::new().with("sensor", "t-1").into_data();
        match Reading::parse(data) {
            Err(ProtocolError::Decoding(_)) => {}
            other => panic!("Expected Decoding error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_mapping_export_fails() {
        match to_fields(&vec![1, 2, 3]) {
            Err(ProtocolError::Encoding(msg)) => assert!(msg.contains("an array")),
            other => panic!("Expected Encoding error, got {:?}", other),
        }
        assert!(json!("text").export().is_err());
        assert!(json!({"k": "v"}).export().is_ok());
    }
}
