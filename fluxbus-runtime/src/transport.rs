//! Transport SPI and the in-memory transport.
//!
//! A transport carries bytes between the producer and consumer sides of an
//! edge. The bus core computes every binding decision and hands the
//! transport a channel plus validated properties; the transport returns a
//! lifecycle handle for the endpoint it set up.

use dashmap::DashMap;
use fluxbus_core::channel::{
    DirectChannel, ForwardingHandler, MessageChannel, MessageHandler, PubSubChannel,
    SubscribableChannel,
};
use fluxbus_core::SubscriptionId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::binding::BindingEndpoint;
use crate::error::{Error, Result};
use crate::properties::BusPropertiesAccessor;

/// A pluggable message transport.
///
/// Implementations may extend the set of properties the bus accepts at
/// bind time via the `supported_*` hooks.
pub trait Transport: Send + Sync {
    /// Attach a producer channel to the edge `name`.
    ///
    /// # Errors
    /// Returns a binding failure if the transport cannot set up the edge.
    fn bind_producer(
        &self,
        name: &str,
        channel: Arc<dyn SubscribableChannel>,
        properties: &BusPropertiesAccessor,
    ) -> Result<Box<dyn BindingEndpoint>>;

    /// Attach a consumer channel to the edge `name`.
    ///
    /// # Errors
    /// Returns a binding failure if the transport cannot set up the edge.
    fn bind_consumer(
        &self,
        name: &str,
        channel: Arc<dyn MessageChannel>,
        properties: &BusPropertiesAccessor,
    ) -> Result<Box<dyn BindingEndpoint>>;

    /// Attach a producer channel to the pub-sub edge `name`.
    ///
    /// # Errors
    /// Returns a binding failure if the transport cannot set up the edge.
    fn bind_pubsub_producer(
        &self,
        name: &str,
        channel: Arc<dyn SubscribableChannel>,
        properties: &BusPropertiesAccessor,
    ) -> Result<Box<dyn BindingEndpoint>>;

    /// Attach a consumer channel to the pub-sub edge `name`.
    ///
    /// # Errors
    /// Returns a binding failure if the transport cannot set up the edge.
    fn bind_pubsub_consumer(
        &self,
        name: &str,
        channel: Arc<dyn MessageChannel>,
        properties: &BusPropertiesAccessor,
    ) -> Result<Box<dyn BindingEndpoint>>;

    /// Consumer property keys this transport supports beyond the core set.
    fn supported_consumer_properties(&self) -> &[&str] {
        &[]
    }

    /// Producer property keys this transport supports beyond the core set.
    fn supported_producer_properties(&self) -> &[&str] {
        &[]
    }
}

/// Endpoint that attaches a handler to a source channel on start and
/// detaches it on stop.
pub struct SubscriptionEndpoint {
    source: Arc<dyn SubscribableChannel>,
    handler: Arc<dyn MessageHandler>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl SubscriptionEndpoint {
    /// Create an endpoint subscribing `handler` to `source`.
    pub fn new(source: Arc<dyn SubscribableChannel>, handler: Arc<dyn MessageHandler>) -> Self {
        Self { source, handler, subscription: Mutex::new(None) }
    }
}

impl fmt::Debug for SubscriptionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEndpoint")
            .field("source", &self.source.id())
            .field("active", &self.subscription.lock().is_some())
            .finish()
    }
}

impl BindingEndpoint for SubscriptionEndpoint {
    fn start(&self) -> Result<()> {
        let mut subscription = self.subscription.lock();
        if subscription.is_none() {
            *subscription = Some(self.source.subscribe(self.handler.clone()));
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if let Some(id) = self.subscription.lock().take() {
            self.source.unsubscribe(id);
        }
        Ok(())
    }
}

/// Transport that carries messages through per-edge in-process channels.
///
/// Point-to-point edges bridge through a direct channel; pub-sub edges
/// fan out through a pub-sub channel. Once an endpoint is stopped its
/// subscription is gone, so sends into a consumerless edge fail.
#[derive(Default)]
pub struct InMemoryTransport {
    bridges: DashMap<String, Arc<DirectChannel>>,
    topics: DashMap<String, Arc<PubSubChannel>>,
}

impl fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("bridges", &self.bridges.len())
            .field("topics", &self.topics.len())
            .finish()
    }
}

impl InMemoryTransport {
    /// Create a transport with no edges.
    pub fn new() -> Self {
        Self::default()
    }

    fn bridge(&self, name: &str) -> Arc<DirectChannel> {
        self.bridges.entry(name.to_string()).or_insert_with(|| Arc::new(DirectChannel::new())).value().clone()
    }

    fn topic(&self, name: &str) -> Arc<PubSubChannel> {
        self.topics.entry(name.to_string()).or_insert_with(|| Arc::new(PubSubChannel::new())).value().clone()
    }

    /// Send a message into the point-to-point edge `name`, as a remote
    /// producer would.
    ///
    /// # Errors
    /// Returns an error when the edge has no bound consumer.
    pub fn send(&self, name: &str, message: fluxbus_core::Message) -> Result<()> {
        let bridge = self.bridges.get(name).ok_or_else(|| Error::Binding {
            name: name.to_string(),
            message: "edge has no bindings".to_string(),
        })?;
        bridge.send(message).map_err(Into::into)
    }
}

impl Transport for InMemoryTransport {
    fn bind_producer(
        &self,
        name: &str,
        channel: Arc<dyn SubscribableChannel>,
        _properties: &BusPropertiesAccessor,
    ) -> Result<Box<dyn BindingEndpoint>> {
        let bridge: Arc<dyn MessageChannel> = self.bridge(name);
        let handler = Arc::new(ForwardingHandler::new(bridge));
        Ok(Box::new(SubscriptionEndpoint::new(channel, handler)))
    }

    fn bind_consumer(
        &self,
        name: &str,
        channel: Arc<dyn MessageChannel>,
        _properties: &BusPropertiesAccessor,
    ) -> Result<Box<dyn BindingEndpoint>> {
        let bridge: Arc<dyn SubscribableChannel> = self.bridge(name);
        let handler = Arc::new(ForwardingHandler::new(channel));
        Ok(Box::new(SubscriptionEndpoint::new(bridge, handler)))
    }

    fn bind_pubsub_producer(
        &self,
        name: &str,
        channel: Arc<dyn SubscribableChannel>,
        _properties: &BusPropertiesAccessor,
    ) -> Result<Box<dyn BindingEndpoint>> {
        let topic: Arc<dyn MessageChannel> = self.topic(name);
        let handler = Arc::new(ForwardingHandler::new(topic));
        Ok(Box::new(SubscriptionEndpoint::new(channel, handler)))
    }

    fn bind_pubsub_consumer(
        &self,
        name: &str,
        channel: Arc<dyn MessageChannel>,
        _properties: &BusPropertiesAccessor,
    ) -> Result<Box<dyn BindingEndpoint>> {
        let topic: Arc<dyn SubscribableChannel> = self.topic(name);
        let handler = Arc::new(ForwardingHandler::new(channel));
        Ok(Box::new(SubscriptionEndpoint::new(topic, handler)))
    }
}
