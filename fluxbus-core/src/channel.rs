//! Message channels: synchronous in-process conduits between modules.
//!
//! Channels come in two dispatch modes. A point-to-point channel hands each
//! message to exactly one subscriber (round-robin when several are attached);
//! a pub-sub channel delivers every message to every subscriber. Delivery is
//! synchronous on the sending thread.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::message::Message;
use crate::types::{ChannelId, SubscriptionId};
use crate::{Error, Result};

/// Name prefix of point-to-point named channels.
pub const QUEUE_CHANNEL_PREFIX: &str = "queue:";

/// Name prefix of pub-sub named channels.
pub const TOPIC_CHANNEL_PREFIX: &str = "topic:";

/// Name prefix of job channels.
pub const JOB_CHANNEL_PREFIX: &str = "job:";

/// Whether a channel name refers to an explicitly named channel rather than
/// a dynamic pipeline edge.
pub fn is_named_channel(name: &str) -> bool {
    name.starts_with(QUEUE_CHANNEL_PREFIX)
        || name.starts_with(TOPIC_CHANNEL_PREFIX)
        || name.starts_with(JOB_CHANNEL_PREFIX)
}

/// Dispatch mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Each message reaches exactly one subscriber.
    PointToPoint,
    /// Each message reaches every subscriber.
    PubSub,
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PointToPoint => write!(f, "point-to-point"),
            Self::PubSub => write!(f, "pub-sub"),
        }
    }
}

/// Receives messages dispatched by a channel.
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    ///
    /// # Errors
    /// Returns an error if the message cannot be processed; the error
    /// surfaces to the sender.
    fn handle(&self, message: Message) -> Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(Message) -> Result<()> + Send + Sync,
{
    fn handle(&self, message: Message) -> Result<()> {
        self(message)
    }
}

/// A message conduit with identity and a dispatch mode.
pub trait MessageChannel: Send + Sync {
    /// Stable identity of this channel instance.
    fn id(&self) -> ChannelId;

    /// Dispatch mode.
    fn mode(&self) -> ChannelMode;

    /// Send a message, synchronously, on the calling thread.
    ///
    /// # Errors
    /// Returns an error if no subscriber is attached or a handler fails.
    fn send(&self, message: Message) -> Result<()>;
}

/// A channel that handlers can attach to.
pub trait SubscribableChannel: MessageChannel {
    /// Attach a handler; returns an id usable for [`Self::unsubscribe`].
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId;

    /// Detach a previously attached handler. Returns whether it was present.
    fn unsubscribe(&self, subscription: SubscriptionId) -> bool;

    /// Number of attached handlers.
    fn subscriber_count(&self) -> usize;
}

struct Subscriber {
    id: SubscriptionId,
    handler: Arc<dyn MessageHandler>,
}

/// Point-to-point channel dispatching round-robin over subscribers.
pub struct DirectChannel {
    id: ChannelId,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscription: AtomicU64,
    cursor: AtomicUsize,
}

impl DirectChannel {
    /// Create a new direct channel with no subscribers.
    pub fn new() -> Self {
        Self {
            id: ChannelId::new(),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for DirectChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DirectChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectChannel")
            .field("id", &self.id)
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}

impl MessageChannel for DirectChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn mode(&self) -> ChannelMode {
        ChannelMode::PointToPoint
    }

    fn send(&self, message: Message) -> Result<()> {
        let handler = {
            let subscribers = self.subscribers.read();
            if subscribers.is_empty() {
                return Err(Error::Channel {
                    message: format!("channel {} has no subscribers", self.id),
                });
            }
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % subscribers.len();
            subscribers[index].handler.clone()
        };
        handler.handle(message)
    }
}

impl SubscribableChannel for DirectChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber { id, handler });
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != subscription);
        subscribers.len() < before
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// Pub-sub channel delivering each message to every subscriber.
pub struct PubSubChannel {
    id: ChannelId,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscription: AtomicU64,
}

impl PubSubChannel {
    /// Create a new pub-sub channel with no subscribers.
    pub fn new() -> Self {
        Self {
            id: ChannelId::new(),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }
}

impl Default for PubSubChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PubSubChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubChannel")
            .field("id", &self.id)
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}

impl MessageChannel for PubSubChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn mode(&self) -> ChannelMode {
        ChannelMode::PubSub
    }

    fn send(&self, message: Message) -> Result<()> {
        let handlers: Vec<Arc<dyn MessageHandler>> =
            self.subscribers.read().iter().map(|s| s.handler.clone()).collect();
        if handlers.is_empty() {
            return Err(Error::Channel {
                message: format!("channel {} has no subscribers", self.id),
            });
        }
        let mut first_error = None;
        for handler in handlers {
            if let Err(e) = handler.handle(message.clone()) {
                warn!(channel = %self.id, error = %e, "subscriber failed to handle message");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl SubscribableChannel for PubSubChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber { id, handler });
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != subscription);
        subscribers.len() < before
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// Handler forwarding every message into a target channel.
///
/// Used to short-circuit a producer channel into a co-located consumer
/// channel and to bridge module channels into transport edges.
pub struct ForwardingHandler {
    target: Arc<dyn MessageChannel>,
}

impl ForwardingHandler {
    /// Create a handler forwarding into `target`.
    pub fn new(target: Arc<dyn MessageChannel>) -> Self {
        Self { target }
    }
}

impl fmt::Debug for ForwardingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardingHandler").field("target", &self.target.id()).finish()
    }
}

impl MessageHandler for ForwardingHandler {
    fn handle(&self, message: Message) -> Result<()> {
        self.target.send(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use parking_lot::Mutex;

    struct Collector {
        received: Mutex<Vec<Message>>,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self { received: Mutex::new(Vec::new()) })
        }

        fn count(&self) -> usize {
            self.received.lock().len()
        }
    }

    impl MessageHandler for Collector {
        fn handle(&self, message: Message) -> Result<()> {
            self.received.lock().push(message);
            Ok(())
        }
    }

    fn text(content: &str) -> Message {
        Message::new(Payload::Text(content.to_string()))
    }

    #[test]
    fn test_named_channel_grammar() {
        assert!(is_named_channel("queue:orders"));
        assert!(is_named_channel("topic:alerts"));
        assert!(is_named_channel("job:cleanup"));
        assert!(!is_named_channel("ticktock.0"));
    }

    #[test]
    fn test_direct_channel_requires_subscriber() {
        let channel = DirectChannel::new();
        assert!(channel.send(text("a")).is_err());
    }

    #[test]
    fn test_direct_channel_round_robin() {
        let channel = DirectChannel::new();
        let first = Collector::new();
        let second = Collector::new();
        channel.subscribe(first.clone());
        channel.subscribe(second.clone());

        for i in 0..4 {
            channel.send(text(&i.to_string())).unwrap();
        }
        assert_eq!(first.count(), 2);
        assert_eq!(second.count(), 2);
    }

    #[test]
    fn test_unsubscribe_detaches_handler() {
        let channel = DirectChannel::new();
        let collector = Collector::new();
        let subscription = channel.subscribe(collector.clone());
        channel.send(text("a")).unwrap();

        assert!(channel.unsubscribe(subscription));
        assert!(!channel.unsubscribe(subscription));
        assert!(channel.send(text("b")).is_err());
        assert_eq!(collector.count(), 1);
    }

    #[test]
    fn test_pubsub_delivers_to_all() {
        let channel = PubSubChannel::new();
        let first = Collector::new();
        let second = Collector::new();
        channel.subscribe(first.clone());
        channel.subscribe(second.clone());

        channel.send(text("a")).unwrap();
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
    }

    #[test]
    fn test_forwarding_handler_bridges_channels() {
        let upstream = DirectChannel::new();
        let downstream: Arc<DirectChannel> = Arc::new(DirectChannel::new());
        let collector = Collector::new();
        downstream.subscribe(collector.clone());
        upstream.subscribe(Arc::new(ForwardingHandler::new(downstream)));

        upstream.send(text("a")).unwrap();
        assert_eq!(collector.count(), 1);
    }
}
