//! Recorded state of applied resources
//!
//! Pure data; persistence lives in `terraflow-cloud`.

use crate::model::address::ResourceAddress;
use crate::model::schema::ID_ATTRIBUTE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// State file format version
pub const STATE_VERSION: u32 = 1;

/// Resolved attribute map as returned by adapters
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A provider-side object: identifier plus its attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl ResourceObject {
    pub fn new(id: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    /// Attributes as seen by references, including `id`
    pub fn outputs(&self) -> Attributes {
        let mut outputs = self.attributes.clone();
        outputs.insert(
            ID_ATTRIBUTE.to_string(),
            serde_json::Value::String(self.id.clone()),
        );
        outputs
    }
}

/// Last-applied state of one resource address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Resource kind (mirrors the address kind)
    pub kind: String,

    /// Provider-specific identifier
    pub id: String,

    /// Attributes as reported by the adapter after the last apply
    #[serde(default)]
    pub attributes: Attributes,

    /// Addresses this resource depended on when it was applied
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<ResourceAddress>,

    /// Old objects left behind by a create-before-destroy replacement
    /// whose removal has not completed yet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<ResourceObject>,

    pub updated_at: DateTime<Utc>,
}

impl StateEntry {
    pub fn new(kind: impl Into<String>, object: ResourceObject) -> Self {
        Self {
            kind: kind.into(),
            id: object.id,
            attributes: object.attributes,
            dependencies: BTreeSet::new(),
            deposed: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: BTreeSet<ResourceAddress>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// The current object
    pub fn object(&self) -> ResourceObject {
        ResourceObject::new(self.id.clone(), self.attributes.clone())
    }

    pub fn get_attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }
}

/// Snapshot of the whole state store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State file version
    pub version: u32,

    /// Incremented on every persisted mutation
    #[serde(default)]
    pub serial: u64,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Entries indexed by resource address
    #[serde(default)]
    pub resources: BTreeMap<ResourceAddress, StateEntry>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&StateEntry> {
        self.resources.get(address)
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.resources.contains_key(address)
    }

    /// Add or replace an entry
    pub fn upsert(&mut self, address: ResourceAddress, entry: StateEntry) {
        self.resources.insert(address, entry);
        self.updated_at = Utc::now();
    }

    /// Remove an entry
    pub fn remove(&mut self, address: &ResourceAddress) -> Option<StateEntry> {
        let removed = self.resources.remove(address);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceAddress, &StateEntry)> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
