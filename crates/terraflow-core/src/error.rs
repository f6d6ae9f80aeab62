use crate::model::ResourceAddress;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors, all detected before any resource is touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid resource address '{0}'")]
    InvalidAddress(String),

    #[error("duplicate resource address: {0}")]
    DuplicateAddress(ResourceAddress),

    #[error("{address}: unknown resource kind '{kind}'")]
    UnknownKind {
        address: ResourceAddress,
        kind: String,
    },

    #[error("{address}: unknown attribute '{field}'")]
    UnknownAttribute {
        address: ResourceAddress,
        field: String,
    },

    #[error("{address}: missing required attribute '{field}'")]
    MissingAttribute {
        address: ResourceAddress,
        field: String,
    },

    #[error("{address}: attribute '{field}' is computed and cannot be set")]
    ComputedAttribute {
        address: ResourceAddress,
        field: String,
    },

    #[error("{address}: attribute '{field}' expects {expected}, found {found}")]
    TypeMismatch {
        address: ResourceAddress,
        field: String,
        expected: String,
        found: String,
    },

    #[error("{address}: '{field}' references undeclared resource {target}")]
    UnresolvedReference {
        address: ResourceAddress,
        field: String,
        target: ResourceAddress,
    },

    #[error("{address}: '{field}' references unknown attribute '{attribute}' of {target}")]
    UnknownReferenceAttribute {
        address: ResourceAddress,
        field: String,
        target: ResourceAddress,
        attribute: String,
    },

    #[error("{address}: depends_on names undeclared resource {target}")]
    UnresolvedDependency {
        address: ResourceAddress,
        target: ResourceAddress,
    },

    #[error("dependency cycle detected: {}", format_cycle(.0))]
    Cycle(Vec<ResourceAddress>),

    #[error("{} configuration errors:\n{}", .0.len(), format_multiple(.0))]
    Multiple(Vec<ConfigError>),
}

impl ConfigError {
    /// Collapse a list of errors into one
    ///
    /// Returns `None` for an empty list.
    pub fn collect(mut errors: Vec<ConfigError>) -> Option<ConfigError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ConfigError::Multiple(errors)),
        }
    }
}

fn format_cycle(cycle: &[ResourceAddress]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

fn format_multiple(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration document {path}: {message}")]
    Document { path: PathBuf, message: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0} has not been diffed")]
    NotDiffed(ResourceAddress),

    #[error("plan ordering cycle between steps: {}", .0.join(" -> "))]
    PlanCycle(Vec<String>),
}

pub type Result<T> = std::result::Result<T, FlowError>;
