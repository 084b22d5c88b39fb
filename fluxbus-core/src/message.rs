//! Message types and utilities for the bus runtime.

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::types::Timestamp;

/// Well-known message header names carried on the wire.
pub mod headers {
    /// Mime type of the payload.
    pub const CONTENT_TYPE: &str = "contentType";

    /// Content type the payload had before octet-stream conversion;
    /// restored on the consuming side.
    pub const ORIGINAL_CONTENT_TYPE: &str = "originalContentType";

    /// Integer partition index assigned by partition routing.
    pub const PARTITION: &str = "partition";
}

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a new unique message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a message ID from a UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message payload in one of three representations.
///
/// `Bytes` is what travels over a transport; `Text` and `Object` are the
/// in-process forms that the codec converts to and from octets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Raw octets.
    Bytes(Bytes),

    /// UTF-8 text.
    Text(String),

    /// An arbitrary structured value tagged with its logical type name.
    Object {
        /// Logical type name used by the codec to re-instantiate the value.
        type_name: String,
        /// Structured representation of the value.
        value: serde_json::Value,
    },
}

impl Payload {
    /// Build an object payload from any serializable value.
    ///
    /// # Errors
    /// Returns an error if the value cannot be represented as a structured
    /// payload.
    pub fn object<T: Serialize>(type_name: impl Into<String>, value: &T) -> crate::Result<Self> {
        let type_name = type_name.into();
        let value = serde_json::to_value(value).map_err(|e| crate::Error::Serialization {
            type_name: type_name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self::Object { type_name, value })
    }

    /// Payload size in bytes, where one is defined.
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::Text(s) => s.len(),
            Self::Object { value, .. } => value.to_string().len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name describing the payload representation, used in diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "string",
            Self::Object { type_name, .. } => type_name,
        }
    }
}

/// Core message structure: identity, payload, and string headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: MessageId,

    /// Message payload
    pub payload: Payload,

    /// Message headers
    pub headers: HashMap<String, String>,

    /// Message timestamp
    pub timestamp: Timestamp,
}

impl Message {
    /// Create a new message with the given payload and no headers.
    pub fn new(payload: Payload) -> Self {
        Self { id: MessageId::new(), payload, headers: HashMap::new(), timestamp: Utc::now() }
    }

    /// Create a message builder for more complex construction.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Get a header value by key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Set a header value, replacing any previous one.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Remove a header, returning its previous value.
    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        self.headers.remove(key)
    }

    /// Check if the message has any headers.
    pub fn has_headers(&self) -> bool {
        !self.headers.is_empty()
    }
}

/// Builder pattern for constructing messages.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    id: Option<MessageId>,
    payload: Option<Payload>,
    headers: HashMap<String, String>,
    timestamp: Option<Timestamp>,
}

impl MessageBuilder {
    /// Set the message ID.
    pub fn id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the payload.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Add a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Copy all headers from an existing message.
    pub fn copy_headers(mut self, message: &Message) -> Self {
        self.headers.extend(message.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Set the timestamp.
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Build the message.
    ///
    /// # Errors
    /// Returns an error if no payload was supplied.
    pub fn build(self) -> crate::Result<Message> {
        let payload = self.payload.ok_or_else(|| crate::Error::InvalidMessage {
            message: "Payload is required".to_string(),
        })?;

        Ok(Message {
            id: self.id.unwrap_or_default(),
            payload,
            headers: self.headers,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_headers() {
        let mut message = Message::new(Payload::Text("hello".to_string()));
        assert!(!message.has_headers());

        message.set_header(headers::CONTENT_TYPE, "text/plain");
        assert_eq!(message.header(headers::CONTENT_TYPE), Some("text/plain"));

        let removed = message.remove_header(headers::CONTENT_TYPE);
        assert_eq!(removed.as_deref(), Some("text/plain"));
        assert!(!message.has_headers());
    }

    #[test]
    fn test_builder_requires_payload() {
        assert!(Message::builder().build().is_err());

        let message = Message::builder()
            .payload(Payload::Bytes(Bytes::from_static(b"abc")))
            .header("partition", "2")
            .build()
            .unwrap();
        assert_eq!(message.header("partition"), Some("2"));
        assert_eq!(message.payload.len(), 3);
    }

    #[test]
    fn test_object_payload() {
        #[derive(Serialize)]
        struct Order {
            id: u32,
        }

        let payload = Payload::object("Order", &Order { id: 7 }).unwrap();
        match &payload {
            Payload::Object { type_name, value } => {
                assert_eq!(type_name, "Order");
                assert_eq!(value["id"], 7);
            },
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
