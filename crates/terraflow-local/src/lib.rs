//! Local filesystem adapters for TerraFlow
//!
//! Built-in resource kinds that need nothing but a filesystem:
//!
//! - `local_directory` (`path`; computed `absolute_path`)
//! - `local_file` (`path`, `content`; computed `size`)
//!
//! Resource ids are the configured paths. Relative paths are resolved
//! against the project root the adapters were created with.
//!
//! # Example
//!
//! ```ignore
//! use terraflow_cloud::{Engine, FileStateStore};
//!
//! let registry = terraflow_local::registry(&project_root)?;
//! let store = Arc::new(FileStateStore::in_project(&project_root));
//! let engine = Engine::new(registry, store);
//! ```

pub mod directory;
pub mod error;
pub mod file;

pub use directory::LocalDirectoryAdapter;
pub use error::{LocalError, Result};
pub use file::LocalFileAdapter;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use terraflow_cloud::AdapterRegistry;
use terraflow_core::Attributes;

/// Register every local adapter
pub fn register(registry: &mut AdapterRegistry, root: &Path) -> terraflow_cloud::Result<()> {
    registry.register(Arc::new(LocalDirectoryAdapter::new(root)))?;
    registry.register(Arc::new(LocalFileAdapter::new(root)))?;
    Ok(())
}

/// Registry holding only the local adapters
pub fn registry(root: &Path) -> terraflow_cloud::Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    register(&mut registry, root)?;
    Ok(registry)
}

pub(crate) fn resolve(root: &Path, id: &str) -> PathBuf {
    let path = Path::new(id);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Optional string attribute; any other JSON type is an error
pub(crate) fn string_attr<'a>(attributes: &'a Attributes, name: &str) -> Result<Option<&'a str>> {
    match attributes.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(LocalError::InvalidAttribute {
            name: name.to_string(),
            expected: "a string",
        }),
    }
}
