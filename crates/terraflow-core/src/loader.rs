//! Desired-configuration document loader
//!
//! Reads a YAML (or JSON) document of the form:
//!
//! ```yaml
//! resources:
//!   - kind: local_directory
//!     name: site
//!     attributes:
//!       path: ./out/site
//!   - kind: local_file
//!     name: page
//!     count: 2
//!     attributes:
//!       path: ./out/site/index.html
//!       content: "ref(local_directory.site.id)"
//! ```

use crate::error::{ConfigError, FlowError, Result};
use crate::model::{DesiredConfig, ResourceAddress, ResourceConfig, Value};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[serde(default)]
    resources: Vec<ResourceBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceBlock {
    kind: String,
    name: String,
    /// Number of instances; addresses become `kind.name[i]`
    #[serde(default)]
    count: Option<u32>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
}

/// Load and parse a configuration document from disk
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_document(path: &Path) -> Result<DesiredConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| FlowError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_document(&content, path)?;
    info!(resources = config.len(), "Configuration loaded");
    Ok(config)
}

/// Parse a configuration document
///
/// `source` is only used for error messages.
pub fn parse_document(content: &str, source: &Path) -> Result<DesiredConfig> {
    let document: Document =
        serde_yaml::from_str(content).map_err(|e| FlowError::Document {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?;

    let mut config = DesiredConfig::new();
    let mut errors = Vec::new();

    for block in document.resources {
        let attributes = match convert_attributes(block.attributes) {
            Ok(attributes) => attributes,
            Err(message) => {
                return Err(FlowError::Document {
                    path: source.to_path_buf(),
                    message: format!("{}.{}: {}", block.kind, block.name, message),
                });
            }
        };

        let mut depends_on = std::collections::BTreeSet::new();
        for dep in &block.depends_on {
            match dep.parse::<ResourceAddress>() {
                Ok(address) => {
                    depends_on.insert(address);
                }
                Err(e) => errors.push(e),
            }
        }

        let addresses = match block.count {
            Some(count) => (0..count)
                .map(|i| format!("{}.{}[{}]", block.kind, block.name, i))
                .collect(),
            None => vec![format!("{}.{}", block.kind, block.name)],
        };

        for raw in addresses {
            let address = match raw.parse::<ResourceAddress>() {
                Ok(address) => address,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let resource = ResourceConfig {
                attributes: attributes.clone(),
                depends_on: depends_on.clone(),
            };
            debug!(address = %address, "Declared resource");
            if config.insert(address.clone(), resource).is_some() {
                errors.push(ConfigError::DuplicateAddress(address));
            }
        }
    }

    match ConfigError::collect(errors) {
        Some(err) => Err(err.into()),
        None => Ok(config),
    }
}

fn convert_attributes(
    raw: BTreeMap<String, serde_json::Value>,
) -> std::result::Result<BTreeMap<String, Value>, String> {
    raw.into_iter()
        .map(|(name, value)| {
            let value = Value::from_json(value).map_err(|e| format!("attribute '{}': {}", name, e))?;
            Ok((name, value))
        })
        .collect()
}
