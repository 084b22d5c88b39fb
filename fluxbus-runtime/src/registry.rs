//! Shared channel registry: name -> channel lookup and creation.

use fluxbus_core::channel::{ChannelMode, DirectChannel, MessageChannel, SubscribableChannel};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};

/// Registry of shared channels keyed by symbolic name.
///
/// Used for dynamically created pipeline edges: the first bind creates and
/// registers the channel, subsequent binds observe the same instance. One
/// monitor spans the whole lookup-then-create sequence.
pub struct SharedChannelRegistry {
    channels: Mutex<HashMap<String, Arc<dyn SubscribableChannel>>>,
}

impl fmt::Debug for SharedChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedChannelRegistry")
            .field("channels", &self.channels.lock().len())
            .finish()
    }
}

impl Default for SharedChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedChannelRegistry {
    /// Create an empty registry. Channels it creates are point-to-point.
    pub fn new() -> Self {
        Self { channels: Mutex::new(HashMap::new()) }
    }

    /// Look up a registered channel by name.
    ///
    /// # Errors
    /// Returns a configuration error if a channel is registered under the
    /// name but is not point-to-point.
    pub fn lookup(&self, name: &str) -> Result<Option<Arc<dyn SubscribableChannel>>> {
        let channels = self.channels.lock();
        Self::checked(name, channels.get(name).cloned())
    }

    /// Create a channel, register it under `name`, and return it.
    ///
    /// Idempotent: if a channel is already registered under the name, that
    /// channel is returned instead of creating a second one.
    pub fn create_and_register(&self, name: &str) -> Arc<dyn SubscribableChannel> {
        let mut channels = self.channels.lock();
        channels
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(name, "registered shared channel");
                Arc::new(DirectChannel::new())
            })
            .clone()
    }

    /// Look up the channel, creating and registering it if absent.
    ///
    /// # Errors
    /// Returns a configuration error if a channel of a different mode is
    /// already registered under the name.
    pub fn lookup_or_create(&self, name: &str) -> Result<Arc<dyn SubscribableChannel>> {
        let mut channels = self.channels.lock();
        if let Some(existing) = Self::checked(name, channels.get(name).cloned())? {
            return Ok(existing);
        }
        let channel: Arc<dyn SubscribableChannel> = Arc::new(DirectChannel::new());
        channels.insert(name.to_string(), channel.clone());
        debug!(name, "registered shared channel");
        Ok(channel)
    }

    /// Register an externally created channel under a name, replacing any
    /// previous registration.
    pub fn register(&self, name: impl Into<String>, channel: Arc<dyn SubscribableChannel>) {
        self.channels.lock().insert(name.into(), channel);
    }

    /// Remove and return the channel registered under `name`, e.g. to tear
    /// down a dynamically created channel after a failed bind.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn SubscribableChannel>> {
        self.channels.lock().remove(name)
    }

    fn checked(
        name: &str,
        found: Option<Arc<dyn SubscribableChannel>>,
    ) -> Result<Option<Arc<dyn SubscribableChannel>>> {
        match found {
            Some(channel) if channel.mode() != ChannelMode::PointToPoint => {
                Err(Error::Configuration {
                    message: format!(
                        "channel '{name}' is already registered but is {} rather than {}",
                        channel.mode(),
                        ChannelMode::PointToPoint
                    ),
                })
            },
            other => Ok(other),
        }
    }
}
