//! Adapter registry
//!
//! An explicit value mapping resource kinds to adapters, built once per run
//! and handed to the engine.

use crate::adapter::ResourceAdapter;
use crate::error::{CloudError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use terraflow_core::{ResourceSchema, SchemaSource};

#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn ResourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its schema kind
    pub fn register(&mut self, adapter: Arc<dyn ResourceAdapter>) -> Result<()> {
        let kind = adapter.kind().to_string();
        if self.adapters.contains_key(&kind) {
            return Err(CloudError::DuplicateAdapter { kind });
        }
        tracing::debug!(kind = %kind, "Registered adapter");
        self.adapters.insert(kind, adapter);
        Ok(())
    }

    pub fn with(mut self, adapter: Arc<dyn ResourceAdapter>) -> Result<Self> {
        self.register(adapter)?;
        Ok(self)
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn ResourceAdapter>> {
        self.adapters
            .get(kind)
            .cloned()
            .ok_or_else(|| CloudError::AdapterNotFound(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl SchemaSource for AdapterRegistry {
    fn schema(&self, kind: &str) -> Option<&ResourceSchema> {
        self.adapters.get(kind).map(|adapter| adapter.schema())
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
