//! # Fluxbus Runtime
//!
//! The stream message-bus runtime: given a declarative pipeline of modules
//! (source -> processors -> sink), this crate derives each module's runtime
//! deployment properties and binds adjacent module pairs through a pluggable
//! transport.
//!
//! The two central pieces are:
//! - [`plan::StreamRuntimePlanner`], which walks a stream and emits, per
//!   module replica, the consumer- and producer-side properties encoding
//!   sequence position, partition assignments, next-hop fan-out, and
//!   direct-binding eligibility.
//! - [`bus::MessageBus`], the binding engine: bind/unbind of producer and
//!   consumer channels under symbolic edge names, property validation,
//!   partition routing, retry construction, and the direct-binding
//!   short-circuit when producer and consumer co-locate.
//!
//! ## Examples
//!
//! ```rust
//! use fluxbus_runtime::bus::MessageBus;
//! use fluxbus_runtime::transport::InMemoryTransport;
//! use std::sync::Arc;
//!
//! let bus = MessageBus::builder(Arc::new(InMemoryTransport::new())).build();
//! bus.start().unwrap();
//! let channel = bus.bind_dynamic_producer("ticktock.0", &Default::default()).unwrap();
//! assert_eq!(bus.bindings().len(), 1);
//! # drop(channel);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binding;
pub mod bus;
pub mod error;
pub mod expr;
pub mod partition;
pub mod plan;
pub mod properties;
pub mod registry;
pub mod retry;
pub mod transport;

pub use binding::{Binding, BindingRole, BindingState, BindingTable};
pub use bus::{BusConfig, MessageBus, MessageBusBuilder};
pub use error::{Error, Result};
pub use partition::{PartitionKeyExtractor, PartitionSelector, PartitioningMetadata};
pub use plan::{ModuleDescriptor, StreamDefinition, StreamRuntimePlanner};
pub use properties::{
    BusPropertiesAccessor, ModuleDeploymentProperties, RuntimeModuleDeploymentProperties,
};
pub use transport::{InMemoryTransport, Transport};
