//! Binding records and the thread-safe binding table.
//!
//! A binding is a live attachment of a local channel to a symbolic edge
//! name, as producer, consumer, or direct short-circuit. Records move
//! through `pending -> active -> stopped` and are never resurrected.

use fluxbus_core::channel::{MessageChannel, SubscribableChannel};
use fluxbus_core::ChannelId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::properties::BusPropertiesAccessor;

/// Role of a binding on its edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingRole {
    /// Local channel feeds the edge through a transport.
    Producer,
    /// Local channel receives from the edge through a transport.
    Consumer,
    /// In-process short-circuit from a producer channel to a co-located
    /// consumer channel, bypassing the transport.
    Direct,
}

impl fmt::Display for BindingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer => write!(f, "producer"),
            Self::Consumer => write!(f, "consumer"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// Lifecycle state of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Created but not yet started.
    Pending,
    /// Started; the endpoint is live.
    Active,
    /// Stopped; terminal.
    Stopped,
}

/// Lifecycle handle of the transport- or bus-side endpoint backing a
/// binding.
pub trait BindingEndpoint: Send + Sync {
    /// Make the endpoint live.
    ///
    /// # Errors
    /// Returns an error if the endpoint cannot start.
    fn start(&self) -> Result<()>;

    /// Tear the endpoint down; in-flight sends fail afterwards.
    ///
    /// # Errors
    /// Returns an error if teardown fails.
    fn stop(&self) -> Result<()>;
}

/// The channel a binding is attached to.
///
/// Producer-side bindings hold subscribable channels (the endpoint taps the
/// channel's output); consumer-side bindings only need to send into theirs.
#[derive(Clone)]
pub enum ChannelRef {
    /// A channel that can only be sent into.
    Sendable(Arc<dyn MessageChannel>),
    /// A channel that handlers can also attach to.
    Subscribable(Arc<dyn SubscribableChannel>),
}

impl ChannelRef {
    /// Identity of the underlying channel.
    pub fn id(&self) -> ChannelId {
        match self {
            Self::Sendable(channel) => channel.id(),
            Self::Subscribable(channel) => channel.id(),
        }
    }

    /// View the channel as a plain message channel.
    pub fn as_message_channel(&self) -> Arc<dyn MessageChannel> {
        match self {
            Self::Sendable(channel) => channel.clone(),
            Self::Subscribable(channel) => channel.clone(),
        }
    }

    /// View the channel as subscribable, when it is.
    pub fn as_subscribable(&self) -> Option<Arc<dyn SubscribableChannel>> {
        match self {
            Self::Sendable(_) => None,
            Self::Subscribable(channel) => Some(channel.clone()),
        }
    }
}

impl fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sendable(channel) => write!(f, "Sendable({})", channel.id()),
            Self::Subscribable(channel) => write!(f, "Subscribable({})", channel.id()),
        }
    }
}

/// A live attachment record for one edge.
pub struct Binding {
    name: String,
    role: BindingRole,
    channel: ChannelRef,
    endpoint: Box<dyn BindingEndpoint>,
    properties: BusPropertiesAccessor,
    state: Mutex<BindingState>,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("channel", &self.channel)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} binding '{}'", self.role, self.name)
    }
}

impl Binding {
    /// Create a pending binding record.
    pub fn new(
        name: impl Into<String>,
        role: BindingRole,
        channel: ChannelRef,
        endpoint: Box<dyn BindingEndpoint>,
        properties: BusPropertiesAccessor,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            channel,
            endpoint,
            properties,
            state: Mutex::new(BindingState::Pending),
        }
    }

    /// Symbolic edge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role on the edge.
    pub fn role(&self) -> BindingRole {
        self.role
    }

    /// The bound channel.
    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    /// The property snapshot taken at bind time.
    pub fn properties(&self) -> &BusPropertiesAccessor {
        &self.properties
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BindingState {
        *self.state.lock()
    }

    /// Start the binding's endpoint.
    ///
    /// # Errors
    /// Returns an error if the endpoint fails to start or the binding was
    /// already stopped; stopped bindings are never resurrected.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            BindingState::Active => Ok(()),
            BindingState::Stopped => Err(Error::Binding {
                name: self.name.clone(),
                message: "stopped bindings cannot be restarted".to_string(),
            }),
            BindingState::Pending => {
                self.endpoint.start()?;
                *state = BindingState::Active;
                Ok(())
            },
        }
    }

    /// Stop the binding's endpoint. Idempotent.
    ///
    /// # Errors
    /// Returns an error if the endpoint fails to stop; the binding is
    /// marked stopped regardless.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == BindingState::Stopped {
            return Ok(());
        }
        *state = BindingState::Stopped;
        self.endpoint.stop()
    }
}

/// Thread-safe registry of active bindings.
///
/// A single monitor covers every read, write, and scan so callers always
/// observe a consistent view; iteration never escapes the lock. Stop
/// dispatch works on a snapshot so bindings can be stopped concurrently
/// with table access.
#[derive(Debug, Default)]
pub struct BindingTable {
    bindings: Mutex<Vec<Arc<Binding>>>,
}

impl BindingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding.
    pub fn add(&self, binding: Arc<Binding>) {
        self.bindings.lock().push(binding);
    }

    /// Remove a specific binding record. Returns whether it was present.
    pub fn remove(&self, binding: &Arc<Binding>) -> bool {
        let mut bindings = self.bindings.lock();
        let before = bindings.len();
        bindings.retain(|b| !Arc::ptr_eq(b, binding));
        bindings.len() < before
    }

    /// First binding with the given name and role.
    pub fn find_by_name(&self, name: &str, role: BindingRole) -> Option<Arc<Binding>> {
        self.bindings.lock().iter().find(|b| b.name() == name && b.role() == role).cloned()
    }

    /// Binding with the given name, role, and channel identity.
    pub fn find_by_channel(
        &self,
        name: &str,
        role: BindingRole,
        channel: ChannelId,
    ) -> Option<Arc<Binding>> {
        self.bindings
            .lock()
            .iter()
            .find(|b| b.name() == name && b.role() == role && b.channel().id() == channel)
            .cloned()
    }

    /// All bindings with the given name, any role.
    pub fn find_all(&self, name: &str) -> Vec<Arc<Binding>> {
        self.bindings.lock().iter().filter(|b| b.name() == name).cloned().collect()
    }

    /// Snapshot of every binding, for stop dispatch outside the lock.
    pub fn snapshot(&self) -> Vec<Arc<Binding>> {
        self.bindings.lock().clone()
    }

    /// Number of registered bindings.
    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxbus_core::channel::DirectChannel;

    struct NoopEndpoint;

    impl BindingEndpoint for NoopEndpoint {
        fn start(&self) -> Result<()> {
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    fn binding(name: &str, role: BindingRole) -> Arc<Binding> {
        let channel: Arc<dyn SubscribableChannel> = Arc::new(DirectChannel::new());
        Arc::new(Binding::new(
            name,
            role,
            ChannelRef::Subscribable(channel),
            Box::new(NoopEndpoint),
            BusPropertiesAccessor::default(),
        ))
    }

    #[test]
    fn test_binding_lifecycle() {
        let binding = binding("ticktock.0", BindingRole::Producer);
        assert_eq!(binding.state(), BindingState::Pending);

        binding.start().unwrap();
        assert_eq!(binding.state(), BindingState::Active);

        binding.stop().unwrap();
        assert_eq!(binding.state(), BindingState::Stopped);

        // Stopped bindings are never resurrected.
        assert!(binding.start().is_err());
        assert!(binding.stop().is_ok());
    }

    #[test]
    fn test_table_lookup_by_role() {
        let table = BindingTable::new();
        let producer = binding("edge", BindingRole::Producer);
        let consumer = binding("edge", BindingRole::Consumer);
        table.add(producer.clone());
        table.add(consumer.clone());

        let found = table.find_by_name("edge", BindingRole::Consumer).unwrap();
        assert!(Arc::ptr_eq(&found, &consumer));
        assert_eq!(table.find_all("edge").len(), 2);
        assert!(table.find_by_name("other", BindingRole::Producer).is_none());
    }

    #[test]
    fn test_table_remove_is_identity_based() {
        let table = BindingTable::new();
        let first = binding("edge", BindingRole::Producer);
        let second = binding("edge", BindingRole::Producer);
        table.add(first.clone());
        table.add(second.clone());

        assert!(table.remove(&first));
        assert!(!table.remove(&first));
        assert_eq!(table.len(), 1);
        assert!(Arc::ptr_eq(&table.find_by_name("edge", BindingRole::Producer).unwrap(), &second));
    }
}
