//! Deployment property bags and typed accessors.
//!
//! Module deployment properties travel as string maps. Consumer- and
//! producer-side keys are written into a module's bag under the `consumer.`
//! and `producer.` prefixes by the planner; bind calls receive the bare-key
//! sub-bags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

/// Recognized property key names (case-sensitive).
pub mod keys {
    /// Number of module replicas; 0 means unconstrained and co-locatable.
    pub const COUNT: &str = "count";
    /// 1-based replica index among `count` copies.
    pub const SEQUENCE: &str = "sequence";
    /// Partition a consumer replica listens on.
    pub const PARTITION_INDEX: &str = "partitionIndex";
    /// Consumer-side processing concurrency.
    pub const CONCURRENCY: &str = "concurrency";
    /// Deployment predicate used for co-location compatibility.
    pub const CRITERIA: &str = "criteria";
    /// Maximum delivery attempts; values below 2 disable retry.
    pub const MAX_ATTEMPTS: &str = "maxAttempts";
    /// Initial retry backoff interval in milliseconds.
    pub const BACK_OFF_INITIAL_INTERVAL: &str = "backOffInitialInterval";
    /// Maximum retry backoff interval in milliseconds.
    pub const BACK_OFF_MAX_INTERVAL: &str = "backOffMaxInterval";
    /// Multiplier applied to the backoff interval between attempts.
    pub const BACK_OFF_MULTIPLIER: &str = "backOffMultiplier";
    /// Replica count of the next module in the stream.
    pub const NEXT_MODULE_COUNT: &str = "nextModuleCount";
    /// Concurrency of the next module in the stream.
    pub const NEXT_MODULE_CONCURRENCY: &str = "nextModuleConcurrency";
    /// Number of partitions a producer fans out over.
    pub const PARTITION_COUNT: &str = "partitionCount";
    /// Expression deriving the partition key from a message.
    pub const PARTITION_KEY_EXPRESSION: &str = "partitionKeyExpression";
    /// Registered strategy name deriving the partition key.
    pub const PARTITION_KEY_EXTRACTOR_CLASS: &str = "partitionKeyExtractorClass";
    /// Expression mapping a key to a partition index.
    pub const PARTITION_SELECTOR_EXPRESSION: &str = "partitionSelectorExpression";
    /// Registered strategy name mapping a key to a partition index.
    pub const PARTITION_SELECTOR_CLASS: &str = "partitionSelectorClass";
    /// Veto for direct (in-process) binding; only the literal "false" has
    /// an effect.
    pub const DIRECT_BINDING_ALLOWED: &str = "directBindingAllowed";
    /// Whether producers batch message sends.
    pub const BATCHING_ENABLED: &str = "batchingEnabled";
    /// Number of messages per batch.
    pub const BATCH_SIZE: &str = "batchSize";
    /// Buffer size that forces an early batch send.
    pub const BATCH_BUFFER_LIMIT: &str = "batchBufferLimit";
    /// Idle time in milliseconds that forces a batch send.
    pub const BATCH_TIMEOUT: &str = "batchTimeout";
    /// Whether producers compress payloads.
    pub const COMPRESS: &str = "compress";

    /// Prefix of consumer-side keys in a module's property bag.
    pub const CONSUMER_PREFIX: &str = "consumer.";
    /// Prefix of producer-side keys in a module's property bag.
    pub const PRODUCER_PREFIX: &str = "producer.";
}

/// A raw bind-time property bag: bare keys, string values.
pub type PropertyBag = BTreeMap<String, String>;

fn parse_or_default<T: FromStr + Copy>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Static deployment properties of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDeploymentProperties {
    entries: BTreeMap<String, String>,
}

impl ModuleDeploymentProperties {
    /// Create an empty property bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a raw property value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set a property value, replacing any previous one.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Whether the bag contains the key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replica count; defaults to 1 when absent or unparseable. A value of
    /// 0 means the module is unconstrained and may co-locate.
    pub fn count(&self) -> u32 {
        parse_or_default(self.get(keys::COUNT), 1)
    }

    /// Deployment criteria predicate, if any.
    pub fn criteria(&self) -> Option<&str> {
        self.get(keys::CRITERIA)
    }

    /// Raw concurrency value, if any.
    pub fn concurrency(&self) -> Option<&str> {
        self.get(keys::CONCURRENCY)
    }

    /// Extract the bare-key consumer sub-bag (`consumer.` prefix stripped).
    pub fn consumer_properties(&self) -> PropertyBag {
        self.sub_bag(keys::CONSUMER_PREFIX)
    }

    /// Extract the bare-key producer sub-bag (`producer.` prefix stripped).
    pub fn producer_properties(&self) -> PropertyBag {
        self.sub_bag(keys::PRODUCER_PREFIX)
    }

    fn sub_bag(&self, prefix: &str) -> PropertyBag {
        self.entries
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|bare| (bare.to_string(), v.clone())))
            .collect()
    }
}

impl FromIterator<(String, String)> for ModuleDeploymentProperties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

/// Deployment properties of one running replica: the static bag plus the
/// replica's assigned `sequence`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeModuleDeploymentProperties {
    inner: ModuleDeploymentProperties,
}

impl RuntimeModuleDeploymentProperties {
    /// Wrap static properties; sequence starts unassigned.
    pub fn from_static(properties: ModuleDeploymentProperties) -> Self {
        Self { inner: properties }
    }

    /// Assigned replica sequence in `1..=count`; 0 means unassigned.
    pub fn sequence(&self) -> u32 {
        parse_or_default(self.inner.get(keys::SEQUENCE), 0)
    }

    /// Assign the replica sequence.
    pub fn set_sequence(&mut self, sequence: u32) {
        self.inner.put(keys::SEQUENCE, sequence.to_string());
    }
}

impl std::ops::Deref for RuntimeModuleDeploymentProperties {
    type Target = ModuleDeploymentProperties;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::ops::DerefMut for RuntimeModuleDeploymentProperties {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Typed view over a bind-time property bag with defaulting rules.
///
/// Defaults for the retry, concurrency, and batching getters come from the
/// bus configuration and are passed in by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusPropertiesAccessor {
    properties: PropertyBag,
}

impl BusPropertiesAccessor {
    /// Wrap a property bag, taking a snapshot of it.
    pub fn new(properties: PropertyBag) -> Self {
        Self { properties }
    }

    /// The underlying bag, e.g. for re-binding with identical properties.
    pub fn raw(&self) -> &PropertyBag {
        &self.properties
    }

    /// Get a raw property value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Replica count; defaults to 1.
    pub fn count(&self) -> u32 {
        parse_or_default(self.get(keys::COUNT), 1)
    }

    /// Replica sequence; 0 means unassigned.
    pub fn sequence(&self) -> u32 {
        parse_or_default(self.get(keys::SEQUENCE), 0)
    }

    /// Partition index a consumer replica listens on, if assigned.
    pub fn partition_index(&self) -> Option<u32> {
        self.get(keys::PARTITION_INDEX).and_then(|v| v.trim().parse().ok())
    }

    /// Consumer concurrency.
    pub fn concurrency(&self, default: u32) -> u32 {
        parse_or_default(self.get(keys::CONCURRENCY), default)
    }

    /// Maximum delivery attempts.
    pub fn max_attempts(&self, default: u32) -> u32 {
        parse_or_default(self.get(keys::MAX_ATTEMPTS), default)
    }

    /// Initial retry backoff in milliseconds.
    pub fn back_off_initial_interval(&self, default: u64) -> u64 {
        parse_or_default(self.get(keys::BACK_OFF_INITIAL_INTERVAL), default)
    }

    /// Maximum retry backoff in milliseconds.
    pub fn back_off_max_interval(&self, default: u64) -> u64 {
        parse_or_default(self.get(keys::BACK_OFF_MAX_INTERVAL), default)
    }

    /// Backoff multiplier between attempts.
    pub fn back_off_multiplier(&self, default: f64) -> f64 {
        parse_or_default(self.get(keys::BACK_OFF_MULTIPLIER), default)
    }

    /// Whether producer batching is enabled.
    pub fn batching_enabled(&self, default: bool) -> bool {
        parse_or_default(self.get(keys::BATCHING_ENABLED), default)
    }

    /// Messages per batch.
    pub fn batch_size(&self, default: u32) -> u32 {
        parse_or_default(self.get(keys::BATCH_SIZE), default)
    }

    /// Buffer size forcing an early batch send.
    pub fn batch_buffer_limit(&self, default: u32) -> u32 {
        parse_or_default(self.get(keys::BATCH_BUFFER_LIMIT), default)
    }

    /// Idle milliseconds forcing a batch send.
    pub fn batch_timeout(&self, default: u64) -> u64 {
        parse_or_default(self.get(keys::BATCH_TIMEOUT), default)
    }

    /// Whether producers compress payloads.
    pub fn compress(&self, default: bool) -> bool {
        parse_or_default(self.get(keys::COMPRESS), default)
    }

    /// Registered partition key extractor name, if any.
    pub fn partition_key_extractor(&self) -> Option<&str> {
        self.non_empty(keys::PARTITION_KEY_EXTRACTOR_CLASS)
    }

    /// Partition key expression, if any.
    pub fn partition_key_expression(&self) -> Option<&str> {
        self.non_empty(keys::PARTITION_KEY_EXPRESSION)
    }

    /// Registered partition selector name, if any.
    pub fn partition_selector(&self) -> Option<&str> {
        self.non_empty(keys::PARTITION_SELECTOR_CLASS)
    }

    /// Partition selector expression, if any.
    pub fn partition_selector_expression(&self) -> Option<&str> {
        self.non_empty(keys::PARTITION_SELECTOR_EXPRESSION)
    }

    /// Partition fan-out count; defaults to 1.
    pub fn partition_count(&self) -> u32 {
        parse_or_default(self.get(keys::PARTITION_COUNT), 1)
    }

    /// Whether direct binding is permitted.
    ///
    /// Only the literal `"false"` (case-insensitive) vetoes direct binding;
    /// any other explicit value is logged as invalid and treated as absent.
    pub fn direct_binding_allowed(&self) -> bool {
        match self.get(keys::DIRECT_BINDING_ALLOWED) {
            None => true,
            Some(value) if value.eq_ignore_ascii_case("false") => false,
            Some(value) => {
                if !value.eq_ignore_ascii_case("true") {
                    warn!(
                        key = keys::DIRECT_BINDING_ALLOWED,
                        value,
                        "only 'false' is allowed as an explicit veto; treating value as absent"
                    );
                }
                true
            },
        }
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }
}
