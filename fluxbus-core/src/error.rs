//! Error types for the fluxbus core library.

use thiserror::Error;

/// Main error type for fluxbus core operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Invalid message format or content
    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    /// Payload encode/decode failure, naming the attempted payload type
    #[error("Serialization of [{type_name}] failed: {message}")]
    Serialization { type_name: String, message: String },

    /// A content-type target outside the supported set
    #[error("Unsupported content-type target: {mime}")]
    UnsupportedContentType { mime: String },

    /// Message dispatch failure on a channel
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for fluxbus core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization { type_name: "serde_json::Value".to_string(), message: err.to_string() }
    }
}
