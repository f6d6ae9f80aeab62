//! Resource adapter trait definition

use crate::error::AdapterError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use terraflow_core::{Attributes, ResourceObject, ResourceSchema};

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Resource adapter abstraction trait
///
/// One adapter manages one resource kind. All CRUD calls are keyed by the
/// provider-side identifier; the engine never passes resource addresses
/// to adapters.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Static metadata: attributes, mutability, replacement policy, timeouts
    fn schema(&self) -> &ResourceSchema;

    /// Resource kind handled by this adapter
    fn kind(&self) -> &str {
        &self.schema().kind
    }

    /// Whether an error is worth retrying
    fn is_transient(&self, error: &AdapterError) -> bool {
        matches!(error, AdapterError::Transient(_))
    }

    /// Create a new object from fully resolved attributes
    async fn create(&self, attributes: &Attributes) -> AdapterResult<ResourceObject>;

    /// Read the current attributes; `Ok(None)` (or `NotFound`) means absent
    async fn read(&self, id: &str) -> AdapterResult<Option<Attributes>>;

    /// Update an object in place and return its new attributes
    ///
    /// May return [`AdapterError::Unsupported`] when the change cannot be
    /// made in place.
    async fn update(&self, id: &str, diff: &AttributeDiff) -> AdapterResult<Attributes>;

    /// Delete an object; `NotFound` counts as success
    async fn delete(&self, id: &str) -> AdapterResult<()>;
}

/// Input of an update call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeDiff {
    /// Attributes as last applied
    pub before: Attributes,

    /// Fully resolved desired attributes
    pub after: Attributes,

    /// Names of the attributes that differ
    pub changed: BTreeSet<String>,
}

impl AttributeDiff {
    pub fn new(
        before: Attributes,
        after: Attributes,
        changed: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            before,
            after,
            changed: changed.into_iter().collect(),
        }
    }

    pub fn has_changed(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    /// New value of a changed attribute (`Null` when removed)
    pub fn new_value(&self, name: &str) -> Option<&serde_json::Value> {
        if !self.has_changed(name) {
            return None;
        }
        Some(self.after.get(name).unwrap_or(&serde_json::Value::Null))
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}
