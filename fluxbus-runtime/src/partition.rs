//! Partitioning strategies and metadata.
//!
//! A producer is partitioned when it declares a key extractor or key
//! expression. Keys are structured values; selectors map a key and a
//! partition count to a raw partition index, which the bus reduces modulo
//! the count.

use dashmap::DashMap;
use fluxbus_core::Message;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::properties::BusPropertiesAccessor;

/// Derives a partition key from a message.
pub trait PartitionKeyExtractor: Send + Sync {
    /// Extract the key, or `None` if the message carries none.
    fn extract_key(&self, message: &Message) -> Option<Value>;
}

impl fmt::Debug for dyn PartitionKeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn PartitionKeyExtractor")
    }
}

/// Maps a key to a raw partition index.
///
/// The bus applies `mod partitionCount` to the returned value, so
/// implementations need not; negative values are tolerated.
pub trait PartitionSelector: Send + Sync {
    /// Select a raw partition index for the key.
    fn select_partition(&self, key: &Value, partition_count: u32) -> i32;
}

/// Default selector: a stable hash of the key.
///
/// Only meaningful for keys with a stable textual form, notably strings.
/// A hash of `i32::MIN` is remapped to 0 so the absolute value is always
/// representable.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPartitionSelector;

impl PartitionSelector for DefaultPartitionSelector {
    fn select_partition(&self, key: &Value, _partition_count: u32) -> i32 {
        let hash = stable_hash(key);
        if hash == i32::MIN {
            0
        } else {
            hash.abs()
        }
    }
}

fn stable_hash(key: &Value) -> i32 {
    let mut hasher = DefaultHasher::new();
    match key {
        Value::String(s) => s.hash(&mut hasher),
        other => other.to_string().hash(&mut hasher),
    }
    hasher.finish() as i32
}

/// Immutable snapshot of a producer's partitioning configuration, frozen
/// from the bind-time properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitioningMetadata {
    key_extractor: Option<String>,
    key_expression: Option<String>,
    selector: Option<String>,
    selector_expression: Option<String>,
    partition_count: u32,
}

impl PartitioningMetadata {
    /// Freeze the partitioning configuration out of an accessor.
    pub fn from_accessor(properties: &BusPropertiesAccessor) -> Self {
        Self {
            key_extractor: properties.partition_key_extractor().map(str::to_string),
            key_expression: properties.partition_key_expression().map(str::to_string),
            selector: properties.partition_selector().map(str::to_string),
            selector_expression: properties.partition_selector_expression().map(str::to_string),
            partition_count: properties.partition_count(),
        }
    }

    /// A module is partitioned iff it declares a key extractor or key
    /// expression.
    pub fn is_partitioned(&self) -> bool {
        self.key_extractor.is_some() || self.key_expression.is_some()
    }

    /// Number of partitions the producer fans out over.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Registered key extractor name, if any.
    pub fn key_extractor(&self) -> Option<&str> {
        self.key_extractor.as_deref()
    }

    /// Key expression, if any.
    pub fn key_expression(&self) -> Option<&str> {
        self.key_expression.as_deref()
    }

    /// Registered selector name, if any.
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    /// Selector expression, if any.
    pub fn selector_expression(&self) -> Option<&str> {
        self.selector_expression.as_deref()
    }
}

type ExtractorFactory = Box<dyn Fn() -> Arc<dyn PartitionKeyExtractor> + Send + Sync>;
type SelectorFactory = Box<dyn Fn() -> Arc<dyn PartitionSelector> + Send + Sync>;

/// Registry resolving partition strategies by name.
///
/// A name resolves to a pre-registered instance, or to a factory whose
/// product is instantiated once and cached under the name for reuse.
/// Extractors and selectors live in separate namespaces, so a name only
/// ever resolves to a strategy of the requested capability.
#[derive(Default)]
pub struct StrategyRegistry {
    extractors: DashMap<String, Arc<dyn PartitionKeyExtractor>>,
    selectors: DashMap<String, Arc<dyn PartitionSelector>>,
    extractor_factories: DashMap<String, ExtractorFactory>,
    selector_factories: DashMap<String, SelectorFactory>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("extractors", &self.extractors.len())
            .field("selectors", &self.selectors.len())
            .field("extractor_factories", &self.extractor_factories.len())
            .field("selector_factories", &self.selector_factories.len())
            .finish()
    }
}

impl StrategyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key extractor instance under a name.
    pub fn register_extractor(
        &self,
        name: impl Into<String>,
        extractor: Arc<dyn PartitionKeyExtractor>,
    ) {
        self.extractors.insert(name.into(), extractor);
    }

    /// Register a selector instance under a name.
    pub fn register_selector(&self, name: impl Into<String>, selector: Arc<dyn PartitionSelector>) {
        self.selectors.insert(name.into(), selector);
    }

    /// Register a factory producing key extractors on first resolution.
    pub fn register_extractor_factory<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn PartitionKeyExtractor> + Send + Sync + 'static,
    {
        self.extractor_factories.insert(name.into(), Box::new(factory));
    }

    /// Register a factory producing selectors on first resolution.
    pub fn register_selector_factory<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn PartitionSelector> + Send + Sync + 'static,
    {
        self.selector_factories.insert(name.into(), Box::new(factory));
    }

    /// Resolve a key extractor by name.
    ///
    /// # Errors
    /// Returns a strategy-resolution error if no instance or factory is
    /// registered under the name.
    pub fn resolve_extractor(&self, name: &str) -> Result<Arc<dyn PartitionKeyExtractor>> {
        if let Some(extractor) = self.extractors.get(name) {
            return Ok(extractor.value().clone());
        }
        if let Some(factory) = self.extractor_factories.get(name) {
            let extractor = factory.value()();
            self.extractors.insert(name.to_string(), extractor.clone());
            debug!(name, "instantiated partition key extractor");
            return Ok(extractor);
        }
        Err(Error::StrategyResolution {
            name: name.to_string(),
            message: "no partition key extractor registered under this name".to_string(),
        })
    }

    /// Resolve a selector by name.
    ///
    /// # Errors
    /// Returns a strategy-resolution error if no instance or factory is
    /// registered under the name.
    pub fn resolve_selector(&self, name: &str) -> Result<Arc<dyn PartitionSelector>> {
        if let Some(selector) = self.selectors.get(name) {
            return Ok(selector.value().clone());
        }
        if let Some(factory) = self.selector_factories.get(name) {
            let selector = factory.value()();
            self.selectors.insert(name.to_string(), selector.clone());
            debug!(name, "instantiated partition selector");
            return Ok(selector);
        }
        Err(Error::StrategyResolution {
            name: name.to_string(),
            message: "no partition selector registered under this name".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PropertyBag;

    fn accessor(entries: &[(&str, &str)]) -> BusPropertiesAccessor {
        let bag: PropertyBag = entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        BusPropertiesAccessor::new(bag)
    }

    #[test]
    fn test_default_selector_is_deterministic() {
        let selector = DefaultPartitionSelector;
        let key = Value::String("abc".to_string());
        let first = selector.select_partition(&key, 4);
        let second = selector.select_partition(&key, 4);
        assert_eq!(first, second);
        assert!(first >= 0);
    }

    #[test]
    fn test_metadata_partitioned_detection() {
        let meta = PartitioningMetadata::from_accessor(&accessor(&[]));
        assert!(!meta.is_partitioned());
        assert_eq!(meta.partition_count(), 1);

        let meta = PartitioningMetadata::from_accessor(&accessor(&[
            ("partitionKeyExpression", "payload.id"),
            ("partitionCount", "3"),
        ]));
        assert!(meta.is_partitioned());
        assert_eq!(meta.partition_count(), 3);

        let meta = PartitioningMetadata::from_accessor(&accessor(&[(
            "partitionKeyExtractorClass",
            "keyByUser",
        )]));
        assert!(meta.is_partitioned());
    }

    #[test]
    fn test_registry_resolves_instances_and_factories() {
        let registry = StrategyRegistry::new();
        registry.register_selector("fixed", Arc::new(DefaultPartitionSelector));
        assert!(registry.resolve_selector("fixed").is_ok());

        registry.register_selector_factory("lazy", || Arc::new(DefaultPartitionSelector));
        let first = registry.resolve_selector("lazy").unwrap();
        let second = registry.resolve_selector("lazy").unwrap();
        // The factory product is cached after the first resolution.
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_registry_namespaces_are_separate() {
        let registry = StrategyRegistry::new();
        registry.register_selector("shared-name", Arc::new(DefaultPartitionSelector));

        let err = registry.resolve_extractor("shared-name").unwrap_err();
        assert!(matches!(err, Error::StrategyResolution { .. }));
    }
}
