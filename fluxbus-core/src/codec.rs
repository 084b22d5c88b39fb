//! Payload serialization with content-type negotiation.
//!
//! Producers convert payloads to octets before handing a message to a
//! transport; consumers convert octets back using the content-type header.
//! The original content type is preserved under a dedicated header across
//! the octet-stream hop and restored on the consuming side.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::message::{headers, Message, Payload};
use crate::{Error, Result};

/// Wildcard mime accepting any payload unchanged.
pub const MIME_ALL: &str = "*/*";

/// Raw octets.
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// UTF-8 text.
pub const MIME_TEXT_PLAIN: &str = "text/plain";

/// Mime prefix for arbitrary structured payloads carrying a type tag.
pub const MIME_OBJECT_PREFIX: &str = "application/x-rust-object";

/// Compute the synthetic content type describing a payload's representation.
pub fn mime_type_for_payload(payload: &Payload) -> String {
    match payload {
        Payload::Bytes(_) => MIME_OCTET_STREAM.to_string(),
        Payload::Text(_) => MIME_TEXT_PLAIN.to_string(),
        Payload::Object { type_name, .. } => object_mime_type(type_name),
    }
}

/// Render an object content type of the form
/// `application/x-rust-object;type=<name>`.
///
/// Type names containing characters outside the mime token set are
/// double-quoted, and [`type_name_from_mime`] unquotes them.
pub fn object_mime_type(type_name: &str) -> String {
    if is_mime_token(type_name) {
        format!("{MIME_OBJECT_PREFIX};type={type_name}")
    } else {
        format!("{MIME_OBJECT_PREFIX};type=\"{type_name}\"")
    }
}

/// Parse the `type` parameter out of an object content type.
///
/// Returns `None` when the mime is not of the object form or carries no
/// `type` parameter.
pub fn type_name_from_mime(mime: &str) -> Option<String> {
    let rest = mime.strip_prefix(MIME_OBJECT_PREFIX)?;
    if !rest.is_empty() && !rest.starts_with(';') {
        return None;
    }
    for param in rest.split(';') {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("type=") {
            let value = value.trim();
            let value = value.strip_prefix('"').unwrap_or(value);
            let value = value.strip_suffix('"').unwrap_or(value);
            if value.is_empty() {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

fn is_mime_token(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
}

/// Converts structured payload values to and from octets.
///
/// A codec owns the wire form of `Payload::Object` values; byte and text
/// payloads never reach it.
pub trait Codec: Send + Sync {
    /// Encode a structured value to octets.
    ///
    /// # Errors
    /// Returns a serialization error naming the attempted type.
    fn encode(&self, type_name: &str, value: &serde_json::Value) -> Result<Bytes>;

    /// Decode octets back into a structured value of the named type.
    ///
    /// # Errors
    /// Returns a serialization error naming the attempted type.
    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// Default codec using JSON as the wire representation.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, type_name: &str, value: &serde_json::Value) -> Result<Bytes> {
        let encoded = serde_json::to_vec(value).map_err(|e| Error::Serialization {
            type_name: type_name.to_string(),
            message: e.to_string(),
        })?;
        Ok(Bytes::from(encoded))
    }

    fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<serde_json::Value> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization {
            type_name: type_name.to_string(),
            message: e.to_string(),
        })
    }
}

/// Applies payload serialization and deserialization around transport hops.
#[derive(Clone)]
pub struct PayloadConverter {
    codec: Arc<dyn Codec>,
}

impl fmt::Debug for PayloadConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadConverter").finish_non_exhaustive()
    }
}

impl Default for PayloadConverter {
    fn default() -> Self {
        Self::new(Arc::new(JsonCodec))
    }
}

impl PayloadConverter {
    /// Create a converter around the given codec.
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    /// Convert the payload to octets if the target content type requires it.
    ///
    /// A target of `*/*` returns the message unchanged. A target of
    /// `application/octet-stream` converts the payload to octets, stamps the
    /// synthetic content type describing the original representation, and
    /// preserves any previous content type under `originalContentType`.
    ///
    /// # Errors
    /// Rejects any other target, and surfaces codec failures naming the
    /// payload type.
    pub fn serialize_if_necessary(&self, message: &Message, target: &str) -> Result<Message> {
        if target == MIME_ALL {
            return Ok(message.clone());
        }
        if target != MIME_OCTET_STREAM {
            return Err(Error::UnsupportedContentType { mime: target.to_string() });
        }

        let synthetic = mime_type_for_payload(&message.payload);
        let encoded = match &message.payload {
            Payload::Bytes(bytes) => bytes.clone(),
            Payload::Text(text) => Bytes::from(text.clone().into_bytes()),
            Payload::Object { type_name, value } => self.codec.encode(type_name, value)?,
        };

        let mut converted = message.clone();
        converted.payload = Payload::Bytes(encoded);
        if let Some(original) = message.header(headers::CONTENT_TYPE) {
            converted.set_header(headers::ORIGINAL_CONTENT_TYPE, original.to_string());
        }
        converted.set_header(headers::CONTENT_TYPE, synthetic);
        Ok(converted)
    }

    /// Convert an octet payload back to its original representation.
    ///
    /// Byte payloads whose content type is absent or `application/octet-stream`
    /// pass through unchanged. `text/plain` decodes to UTF-8 text; object
    /// content types are decoded by the codec using the embedded type name.
    /// On successful decode the content type saved under `originalContentType`
    /// is restored and that header is cleared.
    ///
    /// # Errors
    /// Surfaces decode failures naming the attempted type.
    pub fn deserialize_if_necessary(&self, message: &Message) -> Result<Message> {
        let bytes = match &message.payload {
            Payload::Bytes(bytes) => bytes,
            _ => return Ok(message.clone()),
        };
        let content_type = match message.header(headers::CONTENT_TYPE) {
            Some(ct) if ct != MIME_OCTET_STREAM => ct.to_string(),
            _ => return Ok(message.clone()),
        };

        let payload = if content_type == MIME_TEXT_PLAIN {
            let text =
                String::from_utf8(bytes.to_vec()).map_err(|e| Error::Serialization {
                    type_name: "string".to_string(),
                    message: e.to_string(),
                })?;
            Payload::Text(text)
        } else if let Some(type_name) = type_name_from_mime(&content_type) {
            let value = self.codec.decode(&type_name, bytes)?;
            Payload::Object { type_name, value }
        } else {
            return Err(Error::Serialization {
                type_name: content_type,
                message: "content type carries no decodable type parameter".to_string(),
            });
        };

        let mut converted = message.clone();
        converted.payload = payload;
        match converted.remove_header(headers::ORIGINAL_CONTENT_TYPE) {
            Some(original) => converted.set_header(headers::CONTENT_TYPE, original),
            None => {
                converted.remove_header(headers::CONTENT_TYPE);
            },
        }
        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn converter() -> PayloadConverter {
        PayloadConverter::default()
    }

    #[test]
    fn test_all_target_is_identity() {
        let message = Message::new(Payload::Text("abc".to_string()));
        let out = converter().serialize_if_necessary(&message, MIME_ALL).unwrap();
        assert_eq!(out, message);
    }

    #[test]
    fn test_unsupported_target_rejected() {
        let message = Message::new(Payload::Text("abc".to_string()));
        let err = converter().serialize_if_necessary(&message, "text/html").unwrap_err();
        assert!(matches!(err, Error::UnsupportedContentType { .. }));
    }

    #[test]
    fn test_text_round_trip_preserves_content_type() {
        let mut message = Message::new(Payload::Text("hello".to_string()));
        message.set_header(headers::CONTENT_TYPE, MIME_TEXT_PLAIN);

        let serialized = converter().serialize_if_necessary(&message, MIME_OCTET_STREAM).unwrap();
        assert!(matches!(serialized.payload, Payload::Bytes(_)));
        assert_eq!(serialized.header(headers::CONTENT_TYPE), Some(MIME_TEXT_PLAIN));
        assert_eq!(serialized.header(headers::ORIGINAL_CONTENT_TYPE), Some(MIME_TEXT_PLAIN));

        let deserialized = converter().deserialize_if_necessary(&serialized).unwrap();
        assert_eq!(deserialized.payload, message.payload);
        assert_eq!(deserialized.header(headers::CONTENT_TYPE), Some(MIME_TEXT_PLAIN));
        assert_eq!(deserialized.header(headers::ORIGINAL_CONTENT_TYPE), None);
    }

    #[test]
    fn test_bytes_pass_through() {
        let message = Message::new(Payload::Bytes(Bytes::from_static(b"\x01\x02")));
        let serialized = converter().serialize_if_necessary(&message, MIME_OCTET_STREAM).unwrap();
        assert_eq!(serialized.payload, message.payload);
        assert_eq!(serialized.header(headers::CONTENT_TYPE), Some(MIME_OCTET_STREAM));

        let deserialized = converter().deserialize_if_necessary(&serialized).unwrap();
        assert_eq!(deserialized.payload, message.payload);
    }

    #[test]
    fn test_object_round_trip() {
        let payload = Payload::Object {
            type_name: "orders::Order".to_string(),
            value: serde_json::json!({"id": 42, "total": 12.5}),
        };
        let message = Message::new(payload.clone());

        let serialized = converter().serialize_if_necessary(&message, MIME_OCTET_STREAM).unwrap();
        let content_type = serialized.header(headers::CONTENT_TYPE).unwrap();
        assert!(content_type.starts_with(MIME_OBJECT_PREFIX));
        assert_eq!(type_name_from_mime(content_type).as_deref(), Some("orders::Order"));

        let deserialized = converter().deserialize_if_necessary(&serialized).unwrap();
        assert_eq!(deserialized.payload, payload);
        assert_eq!(deserialized.header(headers::CONTENT_TYPE), None);
    }

    #[test]
    fn test_decode_failure_names_type() {
        let mut message = Message::new(Payload::Bytes(Bytes::from_static(b"not-json")));
        message.set_header(headers::CONTENT_TYPE, object_mime_type("orders::Order"));

        let err = converter().deserialize_if_necessary(&message).unwrap_err();
        match err {
            Error::Serialization { type_name, .. } => assert_eq!(type_name, "orders::Order"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_quoted_type_names() {
        let mime = object_mime_type("Vec<orders::Order>");
        assert!(mime.contains('"'));
        assert_eq!(type_name_from_mime(&mime).as_deref(), Some("Vec<orders::Order>"));
    }

    proptest! {
        #[test]
        fn prop_text_round_trip(text in ".*") {
            let message = Message::new(Payload::Text(text));
            let converter = converter();
            let serialized = converter.serialize_if_necessary(&message, MIME_OCTET_STREAM).unwrap();
            let deserialized = converter.deserialize_if_necessary(&serialized).unwrap();
            prop_assert_eq!(deserialized.payload, message.payload);
        }
    }
}
