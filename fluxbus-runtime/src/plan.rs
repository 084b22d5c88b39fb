//! Stream model and the runtime property planner.
//!
//! A stream is an ordered pipeline of modules. Before deployment the
//! planner walks the pipeline and derives, for each module replica, the
//! consumer- and producer-side properties that encode its position:
//! replica sequence, partition assignments, next-hop fan-out, and
//! direct-binding eligibility.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::error::{Error, Result};
use crate::properties::{
    keys, ModuleDeploymentProperties, RuntimeModuleDeploymentProperties,
};

/// Identity of a module within a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    stream_name: String,
    label: String,
    index: usize,
}

impl ModuleDescriptor {
    /// Create a descriptor for the module `label` at `index` in the stream.
    pub fn new(stream_name: impl Into<String>, label: impl Into<String>, index: usize) -> Self {
        Self { stream_name: stream_name.into(), label: label.into(), index }
    }

    /// Name of the stream this module belongs to.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Module label within the stream.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Position of the module in the stream; 0 is the source.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stream_name, self.label)
    }
}

/// An ordered, non-empty module pipeline. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDefinition {
    name: String,
    modules: Vec<ModuleDescriptor>,
}

impl StreamDefinition {
    /// Create a stream from descriptors.
    ///
    /// # Errors
    /// Returns a validation error if the pipeline is empty, a descriptor
    /// names a different stream, or indices are not the contiguous range
    /// starting at 0.
    pub fn new(name: impl Into<String>, modules: Vec<ModuleDescriptor>) -> Result<Self> {
        let name = name.into();
        if modules.is_empty() {
            return Err(Error::Validation {
                message: format!("stream '{name}' must contain at least one module"),
            });
        }
        for (position, module) in modules.iter().enumerate() {
            if module.stream_name() != name {
                return Err(Error::Validation {
                    message: format!(
                        "module '{module}' belongs to stream '{}', not '{name}'",
                        module.stream_name()
                    ),
                });
            }
            if module.index() != position {
                return Err(Error::Validation {
                    message: format!(
                        "module '{module}' declares index {} but sits at position {position}",
                        module.index()
                    ),
                });
            }
        }
        Ok(Self { name, modules })
    }

    /// Build a stream from module labels, assigning indices in order.
    ///
    /// # Errors
    /// Returns a validation error if no labels are given.
    pub fn from_labels<I, S>(name: impl Into<String>, labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let modules = labels
            .into_iter()
            .enumerate()
            .map(|(index, label)| ModuleDescriptor::new(name.clone(), label, index))
            .collect();
        Self::new(name, modules)
    }

    /// Stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered module pipeline.
    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }
}

/// Supplies the static deployment properties of a module.
pub trait DeploymentPropertiesProvider: Send + Sync {
    /// Properties for the given module.
    fn properties_for(&self, descriptor: &ModuleDescriptor) -> ModuleDeploymentProperties;
}

/// Provider backed by a label-keyed map; modules without an entry get an
/// empty bag.
#[derive(Debug, Clone, Default)]
pub struct MapPropertiesProvider {
    by_label: HashMap<String, ModuleDeploymentProperties>,
}

impl MapPropertiesProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate properties with a module label.
    pub fn insert(&mut self, label: impl Into<String>, properties: ModuleDeploymentProperties) {
        self.by_label.insert(label.into(), properties);
    }

    /// Builder-style form of [`Self::insert`].
    #[must_use]
    pub fn with(mut self, label: impl Into<String>, properties: ModuleDeploymentProperties) -> Self {
        self.insert(label, properties);
        self
    }
}

impl DeploymentPropertiesProvider for MapPropertiesProvider {
    fn properties_for(&self, descriptor: &ModuleDescriptor) -> ModuleDeploymentProperties {
        self.by_label.get(descriptor.label()).cloned().unwrap_or_default()
    }
}

/// Assigns replica sequences on top of a static property provider.
///
/// Each call for a module yields the next sequence for that module,
/// cycling through `1..=count` (or counting up without bound when the
/// module's count is 0).
pub struct RuntimePropertiesProvider {
    base: Arc<dyn DeploymentPropertiesProvider>,
    sequences: Mutex<HashMap<ModuleDescriptor, u32>>,
}

impl fmt::Debug for RuntimePropertiesProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimePropertiesProvider")
            .field("sequences", &self.sequences.lock().len())
            .finish_non_exhaustive()
    }
}

impl RuntimePropertiesProvider {
    /// Wrap a static provider.
    pub fn new(base: Arc<dyn DeploymentPropertiesProvider>) -> Self {
        Self { base, sequences: Mutex::new(HashMap::new()) }
    }

    /// The wrapped static provider.
    pub fn base(&self) -> &Arc<dyn DeploymentPropertiesProvider> {
        &self.base
    }

    /// Static properties plus the next replica sequence for the module.
    pub fn runtime_properties_for(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> RuntimeModuleDeploymentProperties {
        let properties = self.base.properties_for(descriptor);
        let count = properties.count();
        let mut runtime = RuntimeModuleDeploymentProperties::from_static(properties);

        let mut sequences = self.sequences.lock();
        let entry = sequences.entry(descriptor.clone()).or_insert(0);
        *entry += 1;
        if count > 0 && *entry > count {
            *entry = 1;
        }
        runtime.set_sequence(*entry);
        runtime
    }
}

/// Plans the complete runtime properties of each module in a stream.
#[derive(Debug)]
pub struct StreamRuntimePlanner {
    stream: StreamDefinition,
    provider: RuntimePropertiesProvider,
}

impl StreamRuntimePlanner {
    /// Create a planner for the stream, reading static properties from the
    /// given provider.
    pub fn new(stream: StreamDefinition, provider: Arc<dyn DeploymentPropertiesProvider>) -> Self {
        Self { stream, provider: RuntimePropertiesProvider::new(provider) }
    }

    /// The stream being planned.
    pub fn stream(&self) -> &StreamDefinition {
        &self.stream
    }

    /// Derive the runtime properties for one replica of the given module.
    ///
    /// Each call plans the next replica of that module (the assigned
    /// `sequence` advances per call).
    ///
    /// # Errors
    /// Returns a validation error when a partitioned module's successor
    /// does not declare a replica count that is an integer greater than 1,
    /// or when the descriptor does not belong to this stream.
    pub fn plan(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> Result<RuntimeModuleDeploymentProperties> {
        let modules = self.stream.modules();
        if modules.get(descriptor.index()) != Some(descriptor) {
            return Err(Error::Validation {
                message: format!(
                    "module '{descriptor}' does not belong to stream '{}'",
                    self.stream.name()
                ),
            });
        }

        let mut properties = self.provider.runtime_properties_for(descriptor);
        let sequence = properties.sequence();
        let index = descriptor.index();

        // Not first
        if index > 0 {
            let previous = self.provider.base().properties_for(&modules[index - 1]);
            let count = properties.count();
            properties.put(consumer_key(keys::SEQUENCE), sequence.to_string());
            properties.put(consumer_key(keys::COUNT), count.to_string());
            if has_partition_key(&previous) {
                properties.put(consumer_key(keys::PARTITION_INDEX), (sequence - 1).to_string());
            }
        }

        // Not last
        if index + 1 < modules.len() {
            let next = self.provider.base().properties_for(&modules[index + 1]);
            if let Some(count) = next.get(keys::COUNT) {
                properties.put(producer_key(keys::NEXT_MODULE_COUNT), count.to_string());
            }
            if let Some(concurrency) = next.get(keys::CONCURRENCY) {
                properties.put(producer_key(keys::NEXT_MODULE_CONCURRENCY), concurrency.to_string());
            }
        }

        if has_partition_key(&properties) {
            match modules.get(index + 1) {
                Some(next_module) => {
                    let next = self.provider.base().properties_for(next_module);
                    let count = validate_partition_count(next.get(keys::COUNT), next_module)?;
                    properties.put(producer_key(keys::PARTITION_COUNT), count.to_string());
                },
                None => {
                    warn!(
                        module = %descriptor,
                        "module is a sink but declares a partition key; partitioning \
                         only applies to modules that produce data"
                    );
                },
            }
        } else if index + 1 < modules.len() {
            let next = self.provider.base().properties_for(&modules[index + 1]);
            let direct_binding_key = producer_key(keys::DIRECT_BINDING_ALLOWED);
            let requested = properties.get(&direct_binding_key).map(str::to_string);
            if let Some(value) = &requested {
                if !value.eq_ignore_ascii_case("false") {
                    warn!(
                        key = %direct_binding_key,
                        value = %value,
                        "only 'false' is allowed as an explicit value; ignoring"
                    );
                }
            }
            let vetoed = matches!(&requested, Some(v) if v.eq_ignore_ascii_case("false"));
            if !vetoed
                && properties.count() == 0
                && next.count() == 0
                && properties.criteria() == next.criteria()
            {
                properties.put(direct_binding_key, "true");
            }
        }

        Ok(properties)
    }
}

fn consumer_key(key: &str) -> String {
    format!("{}{key}", keys::CONSUMER_PREFIX)
}

fn producer_key(key: &str) -> String {
    format!("{}{key}", keys::PRODUCER_PREFIX)
}

fn has_partition_key(properties: &ModuleDeploymentProperties) -> bool {
    properties.contains_key(&producer_key(keys::PARTITION_KEY_EXPRESSION))
        || properties.contains_key(&producer_key(keys::PARTITION_KEY_EXTRACTOR_CLASS))
}

/// Validate a successor's replica count for partitioning: the raw value
/// must parse as an integer strictly greater than 1.
fn validate_partition_count(raw: Option<&str>, module: &ModuleDescriptor) -> Result<u32> {
    let raw = match raw.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => {
            return Err(Error::Validation {
                message: format!(
                    "a 'count' property is required on module '{module}' to support partitioning"
                ),
            })
        },
    };
    let count: i64 = raw.parse().map_err(|_| Error::Validation {
        message: format!(
            "the 'count' property of module '{module}' is not a valid integer: '{raw}'"
        ),
    })?;
    if count <= 1 {
        return Err(Error::Validation {
            message: format!(
                "the 'count' property of module '{module}' must be an integer \
                 greater than 1, found '{raw}'"
            ),
        });
    }
    Ok(count as u32)
}
