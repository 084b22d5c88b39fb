//! # Fluxbus Core
//!
//! Core primitives for the fluxbus stream message-bus runtime:
//! - Message definitions with string headers and a three-form payload model
//! - Payload serialization with content-type negotiation
//! - Synchronous in-process channels (point-to-point and pub-sub)
//!
//! The binding engine and property planner live in `fluxbus-runtime`; this
//! crate knows nothing about streams, modules, or transports.
//!
//! ## Examples
//!
//! ```rust
//! use fluxbus_core::{Message, Payload};
//!
//! let message = Message::builder()
//!     .payload(Payload::Text("hello".to_string()))
//!     .header("contentType", "text/plain")
//!     .build()
//!     .unwrap();
//! assert_eq!(message.header("contentType"), Some("text/plain"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod codec;
pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, Result};
pub use message::{Message, MessageBuilder, MessageId, Payload};
pub use types::{ChannelId, SubscriptionId, Timestamp};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::channel::{
        is_named_channel, ChannelMode, DirectChannel, ForwardingHandler, MessageChannel,
        MessageHandler, PubSubChannel, SubscribableChannel,
    };
    pub use crate::codec::{Codec, JsonCodec, PayloadConverter};
    pub use crate::{ChannelId, Error, Message, MessageId, Payload, Result, SubscriptionId};
    pub use bytes::Bytes;
}
