//! Desired configuration

use crate::model::address::ResourceAddress;
use crate::model::value::{Reference, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Desired attributes of one resource instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Attribute name -> value (literal or reference)
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    /// Explicit ordering dependencies
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<ResourceAddress>,
}

impl ResourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn depends_on(mut self, address: ResourceAddress) -> Self {
        self.depends_on.insert(address);
        self
    }

    /// Every reference in the attribute map with its field path
    pub fn references(&self) -> Vec<(String, &Reference)> {
        self.attributes
            .iter()
            .flat_map(|(name, value)| value.references(name))
            .collect()
    }

    /// Addresses this resource depends on, via references or `depends_on`
    pub fn dependencies(&self) -> BTreeSet<ResourceAddress> {
        self.references()
            .into_iter()
            .map(|(_, r)| r.target.clone())
            .chain(self.depends_on.iter().cloned())
            .collect()
    }
}

/// Full desired configuration: every declared resource instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredConfig {
    pub resources: BTreeMap<ResourceAddress, ResourceConfig>,
}

impl DesiredConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: ResourceAddress, config: ResourceConfig) -> Self {
        self.resources.insert(address, config);
        self
    }

    /// Insert a resource, returning the previous config if the address was taken
    pub fn insert(
        &mut self,
        address: ResourceAddress,
        config: ResourceConfig,
    ) -> Option<ResourceConfig> {
        self.resources.insert(address, config)
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceConfig> {
        self.resources.get(address)
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.resources.contains_key(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceAddress, &ResourceConfig)> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
