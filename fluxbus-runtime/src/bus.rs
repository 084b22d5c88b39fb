//! The binding engine.
//!
//! The bus accepts bind and unbind requests for producer and consumer
//! channels under symbolic edge names, validates properties, and delegates
//! transport setup to the configured [`Transport`]. When the producer and
//! consumer of a plain pipeline edge co-locate, the bus short-circuits the
//! transport with a direct in-process binding; unbinding the consumer
//! reverts the short-circuit by re-binding the producer through the
//! transport.

use fluxbus_core::channel::{
    is_named_channel, ForwardingHandler, MessageChannel, SubscribableChannel,
};
use fluxbus_core::codec::{Codec, PayloadConverter};
use fluxbus_core::message::headers;
use fluxbus_core::Message;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::binding::{Binding, BindingRole, BindingTable, ChannelRef};
use crate::error::{Error, Result};
use crate::expr::{ExpressionEvaluator, FieldPathEvaluator};
use crate::partition::{
    DefaultPartitionSelector, PartitionSelector, PartitioningMetadata, StrategyRegistry,
};
use crate::properties::{keys, BusPropertiesAccessor, PropertyBag};
use crate::registry::SharedChannelRegistry;
use crate::retry::RetryTemplate;
use crate::transport::{SubscriptionEndpoint, Transport};

/// Consumer property keys every transport must support.
pub const CONSUMER_STANDARD_PROPERTIES: &[&str] =
    &[keys::COUNT, keys::SEQUENCE, keys::PARTITION_INDEX, keys::CONCURRENCY];

/// Consumer retry property keys.
pub const CONSUMER_RETRY_PROPERTIES: &[&str] = &[
    keys::MAX_ATTEMPTS,
    keys::BACK_OFF_INITIAL_INTERVAL,
    keys::BACK_OFF_MAX_INTERVAL,
    keys::BACK_OFF_MULTIPLIER,
];

/// Producer property keys every transport must support.
pub const PRODUCER_STANDARD_PROPERTIES: &[&str] = &[
    keys::NEXT_MODULE_COUNT,
    keys::NEXT_MODULE_CONCURRENCY,
    keys::DIRECT_BINDING_ALLOWED,
    keys::COMPRESS,
];

/// Producer partitioning property keys.
pub const PRODUCER_PARTITIONING_PROPERTIES: &[&str] = &[
    keys::PARTITION_COUNT,
    keys::PARTITION_KEY_EXPRESSION,
    keys::PARTITION_KEY_EXTRACTOR_CLASS,
    keys::PARTITION_SELECTOR_CLASS,
    keys::PARTITION_SELECTOR_EXPRESSION,
];

/// Producer batching property keys.
pub const PRODUCER_BATCHING_PROPERTIES: &[&str] =
    &[keys::BATCHING_ENABLED, keys::BATCH_SIZE, keys::BATCH_BUFFER_LIMIT, keys::BATCH_TIMEOUT];

const DEFAULT_BACK_OFF_INITIAL_INTERVAL: u64 = 1000;
const DEFAULT_BACK_OFF_MAX_INTERVAL: u64 = 10_000;
const DEFAULT_BACK_OFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_CONCURRENCY: u32 = 1;
const DEFAULT_BATCH_SIZE: u32 = 50;
const DEFAULT_BATCH_BUFFER_LIMIT: u32 = 10_000;
const DEFAULT_BATCH_TIMEOUT: u64 = 5000;

/// Bus-wide defaults, overridable per binding via properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Initial retry backoff in milliseconds.
    pub back_off_initial_interval_ms: u64,
    /// Maximum retry backoff in milliseconds.
    pub back_off_max_interval_ms: u64,
    /// Backoff multiplier between attempts.
    pub back_off_multiplier: f64,
    /// Maximum delivery attempts; values below 2 disable retry.
    pub max_attempts: u32,
    /// Consumer concurrency.
    pub concurrency: u32,
    /// Whether producers batch sends by default.
    pub batching_enabled: bool,
    /// Messages per batch.
    pub batch_size: u32,
    /// Buffer size forcing an early batch send.
    pub batch_buffer_limit: u32,
    /// Idle milliseconds forcing a batch send.
    pub batch_timeout_ms: u64,
    /// Whether producers compress payloads by default.
    pub compress: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            back_off_initial_interval_ms: DEFAULT_BACK_OFF_INITIAL_INTERVAL,
            back_off_max_interval_ms: DEFAULT_BACK_OFF_MAX_INTERVAL,
            back_off_multiplier: DEFAULT_BACK_OFF_MULTIPLIER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            concurrency: DEFAULT_CONCURRENCY,
            batching_enabled: false,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_buffer_limit: DEFAULT_BATCH_BUFFER_LIMIT,
            batch_timeout_ms: DEFAULT_BATCH_TIMEOUT,
            compress: false,
        }
    }
}

impl BusConfig {
    fn validate(&self) -> Result<()> {
        if self.back_off_max_interval_ms < self.back_off_initial_interval_ms {
            return Err(Error::Configuration {
                message: format!(
                    "maximum backoff interval {}ms is below the initial interval {}ms",
                    self.back_off_max_interval_ms, self.back_off_initial_interval_ms
                ),
            });
        }
        if self.back_off_multiplier < 1.0 {
            return Err(Error::Configuration {
                message: format!(
                    "backoff multiplier must be at least 1.0, found {}",
                    self.back_off_multiplier
                ),
            });
        }
        Ok(())
    }
}

/// Builder for [`MessageBus`]; collaborators default to the built-in
/// implementations.
pub struct MessageBusBuilder {
    transport: Arc<dyn Transport>,
    config: BusConfig,
    codec: Option<Arc<dyn Codec>>,
    strategies: Option<Arc<StrategyRegistry>>,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    partition_selector: Option<Arc<dyn PartitionSelector>>,
}

impl fmt::Debug for MessageBusBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBusBuilder").field("config", &self.config).finish_non_exhaustive()
    }
}

impl MessageBusBuilder {
    /// Start building a bus over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: BusConfig::default(),
            codec: None,
            strategies: None,
            evaluator: None,
            partition_selector: None,
        }
    }

    /// Use the given bus defaults.
    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Use the given payload codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Use the given strategy registry.
    #[must_use]
    pub fn strategies(mut self, strategies: Arc<StrategyRegistry>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    /// Use the given expression evaluator.
    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Use the given fallback partition selector.
    #[must_use]
    pub fn partition_selector(mut self, selector: Arc<dyn PartitionSelector>) -> Self {
        self.partition_selector = Some(selector);
        self
    }

    /// Assemble the bus. It must be started before use.
    pub fn build(self) -> MessageBus {
        MessageBus {
            transport: self.transport,
            bindings: BindingTable::new(),
            shared_channels: SharedChannelRegistry::new(),
            converter: match self.codec {
                Some(codec) => PayloadConverter::new(codec),
                None => PayloadConverter::default(),
            },
            strategies: self.strategies.unwrap_or_default(),
            evaluator: self.evaluator.unwrap_or_else(|| Arc::new(FieldPathEvaluator)),
            partition_selector: self
                .partition_selector
                .unwrap_or_else(|| Arc::new(DefaultPartitionSelector)),
            config: self.config,
            dynamic_bind_lock: Mutex::new(()),
            started: AtomicBool::new(false),
        }
    }
}

/// The message bus core: binding engine, partition router, and retry
/// builder over a pluggable transport.
pub struct MessageBus {
    transport: Arc<dyn Transport>,
    bindings: BindingTable,
    shared_channels: SharedChannelRegistry,
    converter: PayloadConverter,
    strategies: Arc<StrategyRegistry>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    partition_selector: Arc<dyn PartitionSelector>,
    config: BusConfig,
    dynamic_bind_lock: Mutex<()>,
    started: AtomicBool,
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("bindings", &self.bindings.len())
            .field("started", &self.started.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl MessageBus {
    /// Start building a bus over the given transport.
    pub fn builder(transport: Arc<dyn Transport>) -> MessageBusBuilder {
        MessageBusBuilder::new(transport)
    }

    /// Make the bus live. Binds are rejected until this succeeds.
    ///
    /// # Errors
    /// Returns a configuration error when the bus defaults are inconsistent.
    pub fn start(&self) -> Result<()> {
        self.config.validate()?;
        self.started.store(true, Ordering::Release);
        info!("message bus started");
        Ok(())
    }

    /// The strategy registry used to resolve partition extractors and
    /// selectors by name.
    pub fn strategies(&self) -> &Arc<StrategyRegistry> {
        &self.strategies
    }

    /// The bus defaults.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The active binding table.
    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Configuration { message: "the bus has not been started".to_string() })
        }
    }

    /// Bind a producer channel to the edge `name`.
    ///
    /// If `name` is a plain pipeline edge and a local consumer binding for
    /// it already exists, the pair collapses into a direct binding and no
    /// transport resources are allocated.
    ///
    /// # Errors
    /// Returns a validation error for unsupported properties or a binding
    /// failure from the transport.
    pub fn bind_producer(
        &self,
        name: &str,
        channel: Arc<dyn SubscribableChannel>,
        properties: &PropertyBag,
    ) -> Result<()> {
        self.do_bind_producer(name, channel, properties, false)
    }

    fn do_bind_producer(
        &self,
        name: &str,
        channel: Arc<dyn SubscribableChannel>,
        properties: &PropertyBag,
        reverting: bool,
    ) -> Result<()> {
        self.ensure_started()?;
        self.validate_producer_properties(name, properties)?;
        let accessor = BusPropertiesAccessor::new(properties.clone());

        // While reverting a direct binding the producer must go back through
        // the transport rather than re-collapse.
        if !reverting && self.bind_new_producer_directly_if_possible(name, &channel, &accessor)? {
            return Ok(());
        }

        let endpoint = self.transport.bind_producer(name, channel.clone(), &accessor)?;
        let binding = Arc::new(Binding::new(
            name,
            BindingRole::Producer,
            ChannelRef::Subscribable(channel),
            endpoint,
            accessor,
        ));
        binding.start()?;
        self.bindings.add(binding);
        Ok(())
    }

    /// Bind a consumer channel to the edge `name`.
    ///
    /// After the consumer is registered, an existing local producer binding
    /// for the same plain edge is converted into a direct binding.
    ///
    /// # Errors
    /// Returns a validation error for unsupported properties or a binding
    /// failure from the transport.
    pub fn bind_consumer(
        &self,
        name: &str,
        channel: Arc<dyn MessageChannel>,
        properties: &PropertyBag,
    ) -> Result<()> {
        self.ensure_started()?;
        self.validate_consumer_properties(name, properties)?;
        let accessor = BusPropertiesAccessor::new(properties.clone());

        let endpoint = self.transport.bind_consumer(name, channel.clone(), &accessor)?;
        let binding = Arc::new(Binding::new(
            name,
            BindingRole::Consumer,
            ChannelRef::Sendable(channel.clone()),
            endpoint,
            accessor,
        ));
        binding.start()?;
        self.bindings.add(binding);

        self.bind_existing_producer_directly_if_possible(name, channel);
        Ok(())
    }

    /// Bind a producer channel to the pub-sub edge `name`. Pub-sub
    /// producers are never bound directly.
    ///
    /// # Errors
    /// Returns a validation error for unsupported properties or a binding
    /// failure from the transport.
    pub fn bind_pubsub_producer(
        &self,
        name: &str,
        channel: Arc<dyn SubscribableChannel>,
        properties: &PropertyBag,
    ) -> Result<()> {
        self.ensure_started()?;
        self.validate_producer_properties(name, properties)?;
        let accessor = BusPropertiesAccessor::new(properties.clone());

        let endpoint = self.transport.bind_pubsub_producer(name, channel.clone(), &accessor)?;
        let binding = Arc::new(Binding::new(
            name,
            BindingRole::Producer,
            ChannelRef::Subscribable(channel),
            endpoint,
            accessor,
        ));
        binding.start()?;
        self.bindings.add(binding);
        Ok(())
    }

    /// Bind a consumer channel to the pub-sub edge `name`.
    ///
    /// # Errors
    /// Returns a validation error for unsupported properties or a binding
    /// failure from the transport.
    pub fn bind_pubsub_consumer(
        &self,
        name: &str,
        channel: Arc<dyn MessageChannel>,
        properties: &PropertyBag,
    ) -> Result<()> {
        self.ensure_started()?;
        self.validate_consumer_properties(name, properties)?;
        let accessor = BusPropertiesAccessor::new(properties.clone());

        let endpoint = self.transport.bind_pubsub_consumer(name, channel.clone(), &accessor)?;
        let binding = Arc::new(Binding::new(
            name,
            BindingRole::Consumer,
            ChannelRef::Sendable(channel),
            endpoint,
            accessor,
        ));
        binding.start()?;
        self.bindings.add(binding);
        Ok(())
    }

    /// Dynamically create a shared channel under `name` and bind it as a
    /// producer. Idempotent on `name`: a second call returns the same
    /// channel without creating another binding.
    ///
    /// # Errors
    /// Returns a binding failure when the bind fails; the freshly created
    /// channel is torn down before the error surfaces.
    pub fn bind_dynamic_producer(
        &self,
        name: &str,
        properties: &PropertyBag,
    ) -> Result<Arc<dyn SubscribableChannel>> {
        self.ensure_started()?;
        let _guard = self.dynamic_bind_lock.lock();
        if let Some(existing) = self.shared_channels.lookup(name)? {
            return Ok(existing);
        }
        let channel = self.shared_channels.create_and_register(name);
        if let Err(e) = self.do_bind_producer(name, channel.clone(), properties, false) {
            self.shared_channels.remove(name);
            return Err(Error::Binding {
                name: name.to_string(),
                message: format!("failed to bind dynamic channel: {e}"),
            });
        }
        Ok(channel)
    }

    /// Dynamically create a shared channel under `name` and bind it as a
    /// pub-sub producer. Same idempotence and teardown contract as
    /// [`Self::bind_dynamic_producer`].
    ///
    /// # Errors
    /// Returns a binding failure when the bind fails; the freshly created
    /// channel is torn down before the error surfaces.
    pub fn bind_dynamic_pubsub_producer(
        &self,
        name: &str,
        properties: &PropertyBag,
    ) -> Result<Arc<dyn SubscribableChannel>> {
        self.ensure_started()?;
        let _guard = self.dynamic_bind_lock.lock();
        if let Some(existing) = self.shared_channels.lookup(name)? {
            return Ok(existing);
        }
        let channel = self.shared_channels.create_and_register(name);
        if let Err(e) = self.bind_pubsub_producer(name, channel.clone(), properties) {
            self.shared_channels.remove(name);
            return Err(Error::Binding {
                name: name.to_string(),
                message: format!("failed to bind dynamic channel: {e}"),
            });
        }
        Ok(channel)
    }

    fn bind_new_producer_directly_if_possible(
        &self,
        name: &str,
        channel: &Arc<dyn SubscribableChannel>,
        accessor: &BusPropertiesAccessor,
    ) -> Result<bool> {
        if !accessor.direct_binding_allowed() || is_named_channel(name) {
            return Ok(false);
        }
        let Some(consumer) = self.bindings.find_by_name(name, BindingRole::Consumer) else {
            return Ok(false);
        };
        self.bind_producer_directly(
            name,
            channel.clone(),
            consumer.channel().as_message_channel(),
            accessor.clone(),
        )?;
        Ok(true)
    }

    fn bind_existing_producer_directly_if_possible(
        &self,
        name: &str,
        consumer_channel: Arc<dyn MessageChannel>,
    ) {
        if is_named_channel(name) {
            return;
        }
        let Some(producer) = self.bindings.find_by_name(name, BindingRole::Producer) else {
            return;
        };
        if !producer.properties().direct_binding_allowed() {
            return;
        }
        let Some(producer_channel) = producer.channel().as_subscribable() else {
            return;
        };
        match self.bind_producer_directly(
            name,
            producer_channel,
            consumer_channel,
            producer.properties().clone(),
        ) {
            Ok(()) => {
                if let Err(e) = producer.stop() {
                    warn!(binding = %producer, error = %e, "failed to stop producer binding");
                }
                self.bindings.remove(&producer);
            },
            Err(e) => warn!(name, error = %e, "could not convert producer to a direct binding"),
        }
    }

    fn bind_producer_directly(
        &self,
        name: &str,
        producer_channel: Arc<dyn SubscribableChannel>,
        consumer_channel: Arc<dyn MessageChannel>,
        properties: BusPropertiesAccessor,
    ) -> Result<()> {
        let handler = Arc::new(ForwardingHandler::new(consumer_channel));
        let endpoint = Box::new(SubscriptionEndpoint::new(producer_channel.clone(), handler));
        let binding = Arc::new(Binding::new(
            name,
            BindingRole::Direct,
            ChannelRef::Subscribable(producer_channel),
            endpoint,
            properties,
        ));
        binding.start()?;
        info!(binding = %binding, "producer bound directly");
        self.bindings.add(binding);
        Ok(())
    }

    /// Unbind the producer of `name` attached to the given channel. Direct
    /// bindings for the edge count as producers.
    ///
    /// # Errors
    /// Returns an error if stopping the binding's endpoint fails.
    pub fn unbind_producer(&self, name: &str, channel: &dyn MessageChannel) -> Result<()> {
        self.ensure_started()?;
        for role in [BindingRole::Producer, BindingRole::Direct] {
            if let Some(binding) = self.bindings.find_by_channel(name, role, channel.id()) {
                binding.stop()?;
                self.bindings.remove(&binding);
                return Ok(());
            }
        }
        Ok(())
    }

    /// Unbind every producer of `name`, direct bindings included.
    ///
    /// # Errors
    /// Returns the first endpoint stop failure.
    pub fn unbind_producers(&self, name: &str) -> Result<()> {
        self.ensure_started()?;
        for binding in self.bindings.find_all(name) {
            if matches!(binding.role(), BindingRole::Producer | BindingRole::Direct) {
                binding.stop()?;
                self.bindings.remove(&binding);
            }
        }
        Ok(())
    }

    /// Unbind the consumer of `name` attached to the given channel,
    /// reverting any direct binding for the edge first.
    ///
    /// # Errors
    /// Returns an error if stopping the binding's endpoint fails; revert
    /// failures are logged, not propagated.
    pub fn unbind_consumer(&self, name: &str, channel: &dyn MessageChannel) -> Result<()> {
        self.ensure_started()?;
        if let Some(binding) =
            self.bindings.find_by_channel(name, BindingRole::Consumer, channel.id())
        {
            self.revert_direct_binding_if_necessary(name);
            binding.stop()?;
            self.bindings.remove(&binding);
        }
        Ok(())
    }

    /// Unbind every consumer of `name`, reverting direct bindings first.
    ///
    /// # Errors
    /// Returns the first endpoint stop failure.
    pub fn unbind_consumers(&self, name: &str) -> Result<()> {
        self.ensure_started()?;
        for binding in self.bindings.find_all(name) {
            if binding.role() == BindingRole::Consumer {
                self.revert_direct_binding_if_necessary(name);
                binding.stop()?;
                self.bindings.remove(&binding);
            }
        }
        Ok(())
    }

    /// Revert a direct binding before its paired consumer goes away: the
    /// producer is re-bound through the transport, then the direct record
    /// is stopped and dropped.
    fn revert_direct_binding_if_necessary(&self, name: &str) {
        let Some(direct) = self.bindings.find_by_name(name, BindingRole::Direct) else {
            return;
        };
        let result = (|| -> Result<()> {
            let producer_channel =
                direct.channel().as_subscribable().ok_or_else(|| Error::Internal {
                    message: "direct binding holds a non-subscribable channel".to_string(),
                })?;
            let properties = direct.properties().raw().clone();
            self.do_bind_producer(name, producer_channel, &properties, true)?;
            direct.stop()?;
            self.bindings.remove(&direct);
            info!(binding = %direct, "direct binding reverted");
            Ok(())
        })();
        if let Err(e) = result {
            // Best effort: the direct record stays, stopped, and the
            // consumer unbind proceeds.
            error!(binding = %direct, error = %e, "could not revert direct binding");
            let _ = direct.stop();
        }
    }

    /// Stop every binding, best effort: failures are logged and swallowed.
    pub fn stop_all(&self) {
        for binding in self.bindings.snapshot() {
            if let Err(e) = binding.stop() {
                warn!(binding = %binding, error = %e, "failed to stop binding");
            }
        }
    }

    /// Determine the partition for a message under the given metadata.
    ///
    /// The key comes from the configured extractor or key expression; the
    /// raw partition from the configured selector, selector expression, or
    /// the bus default selector. The result is reduced modulo the partition
    /// count, with negative values folded by absolute value.
    ///
    /// # Errors
    /// Returns a validation error when no non-null key can be derived, a
    /// strategy-resolution error when a named strategy is unknown, or an
    /// expression error from the evaluator.
    pub fn determine_partition(
        &self,
        message: &Message,
        meta: &PartitioningMetadata,
    ) -> Result<u32> {
        let key = if let Some(name) = meta.key_extractor() {
            self.strategies.resolve_extractor(name)?.extract_key(message)
        } else if let Some(expression) = meta.key_expression() {
            Some(self.evaluator.evaluate(expression, message)?)
        } else {
            None
        };
        let key = key.ok_or_else(|| Error::Validation {
            message: "partition key cannot be null".to_string(),
        })?;

        let raw: i32 = if let Some(name) = meta.selector() {
            self.strategies.resolve_selector(name)?.select_partition(&key, meta.partition_count())
        } else if let Some(expression) = meta.selector_expression() {
            self.evaluator.evaluate_against_key(expression, &key)?
        } else {
            self.partition_selector.select_partition(&key, meta.partition_count())
        };

        let count = i64::from(meta.partition_count().max(1));
        let partition = (i64::from(raw) % count).abs();
        Ok(partition as u32)
    }

    /// Determine the partition and stamp it into the `partition` header.
    ///
    /// # Errors
    /// Same failure modes as [`Self::determine_partition`].
    pub fn apply_partition_routing(
        &self,
        message: &Message,
        meta: &PartitioningMetadata,
    ) -> Result<Message> {
        let partition = self.determine_partition(message, meta)?;
        let mut routed = message.clone();
        routed.set_header(headers::PARTITION, partition.to_string());
        Ok(routed)
    }

    /// Routing expression for transports that address partitions by a
    /// name suffix derived from the `partition` header.
    pub fn partition_routing_expression(&self, root: &str) -> String {
        format!("'{root}-' + headers['{}']", headers::PARTITION)
    }

    /// Build a retry template from the binding properties, falling back to
    /// the bus defaults. `maxAttempts` below 2 disables retry: a single
    /// delivery attempt is made and no template is returned.
    pub fn build_retry_template(&self, properties: &BusPropertiesAccessor) -> Option<RetryTemplate> {
        let max_attempts = properties.max_attempts(self.config.max_attempts);
        if max_attempts <= 1 {
            return None;
        }
        Some(RetryTemplate::new(
            max_attempts,
            Duration::from_millis(
                properties.back_off_initial_interval(self.config.back_off_initial_interval_ms),
            ),
            properties.back_off_multiplier(self.config.back_off_multiplier),
            Duration::from_millis(
                properties.back_off_max_interval(self.config.back_off_max_interval_ms),
            ),
        ))
    }

    /// Convert a payload to octets for the wire, per the target content
    /// type.
    ///
    /// # Errors
    /// Surfaces codec failures naming the payload type.
    pub fn serialize_payload_if_necessary(
        &self,
        message: &Message,
        target: &str,
    ) -> Result<Message> {
        Ok(self.converter.serialize_if_necessary(message, target)?)
    }

    /// Convert an octet payload back to its original representation.
    ///
    /// # Errors
    /// Surfaces codec failures naming the attempted type.
    pub fn deserialize_payload_if_necessary(&self, message: &Message) -> Result<Message> {
        Ok(self.converter.deserialize_if_necessary(message)?)
    }

    fn validate_consumer_properties(&self, name: &str, properties: &PropertyBag) -> Result<()> {
        let mut supported: Vec<&str> = Vec::new();
        supported.extend_from_slice(CONSUMER_STANDARD_PROPERTIES);
        supported.extend_from_slice(CONSUMER_RETRY_PROPERTIES);
        supported.extend_from_slice(self.transport.supported_consumer_properties());
        validate_properties(name, properties, &supported, "consumer")
    }

    fn validate_producer_properties(&self, name: &str, properties: &PropertyBag) -> Result<()> {
        let mut supported: Vec<&str> = Vec::new();
        supported.extend_from_slice(PRODUCER_STANDARD_PROPERTIES);
        supported.extend_from_slice(PRODUCER_PARTITIONING_PROPERTIES);
        supported.extend_from_slice(PRODUCER_BATCHING_PROPERTIES);
        supported.extend_from_slice(self.transport.supported_producer_properties());
        validate_properties(name, properties, &supported, "producer")
    }
}

/// Reject property bags containing keys outside the supported set; every
/// offending key is listed in one error.
fn validate_properties(
    name: &str,
    properties: &PropertyBag,
    supported: &[&str],
    kind: &str,
) -> Result<()> {
    let unsupported: Vec<&str> = properties
        .keys()
        .map(String::as_str)
        .filter(|key| !supported.contains(key))
        .collect();
    if unsupported.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation {
            message: format!(
                "unsupported {kind} propert{} for '{name}': {}",
                if unsupported.len() == 1 { "y" } else { "ies" },
                unsupported.join(", ")
            ),
        })
    }
}
