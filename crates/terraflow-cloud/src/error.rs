//! Error types for adapters, state persistence and runs

use terraflow_core::{FlowError, ResourceAddress};
use thiserror::Error;

/// Errors reported by a resource adapter call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The remote object does not exist (normalized to absent/success)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Expected to clear up on retry (propagation delay, throttling)
    #[error("Transient error: {0}")]
    Transient(String),

    /// The operation is not available for this kind
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl AdapterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound(_))
    }
}

/// Engine-level errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("No adapter registered for resource kind '{0}'")]
    AdapterNotFound(String),

    #[error("Adapter for '{kind}' is already registered")]
    DuplicateAdapter { kind: String },

    #[error("{address}: {operation} failed: {source}")]
    Adapter {
        address: ResourceAddress,
        operation: &'static str,
        source: AdapterError,
    },

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error(
        "Plan is stale: computed against state serial {planned}, current serial is {current}"
    )]
    StalePlan { planned: u64, current: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<terraflow_core::ConfigError> for CloudError {
    fn from(err: terraflow_core::ConfigError) -> Self {
        CloudError::Flow(err.into())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
