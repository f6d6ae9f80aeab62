//! TerraFlow Cloud
//!
//! Execution half of the reconciliation engine: the resource adapter
//! contract, the adapter registry, the state store, and the executor that
//! runs a plan against real infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  TerraFlow CLI                   │
//! │             (tflow plan / apply)                 │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               terraflow-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Engine: plan ─► Executor (waves)         │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │   Adapter    │  │  StateStore  │            │
//! │  │   Registry   │  │  (state.json)│            │
//! │  └──────┬───────┘  └──────────────┘            │
//! └─────────┼───────────────────────────────────────┘
//!           │
//! ┌─────────▼─────────┐
//! │ trait             │
//! │ ResourceAdapter   │  local_file, local_directory, ...
//! └───────────────────┘
//! ```

pub mod adapter;
pub mod engine;
pub mod error;
pub mod executor;
pub mod registry;
pub mod report;
pub mod retry;
pub mod state;

// Re-exports
pub use adapter::{AdapterResult, AttributeDiff, ResourceAdapter};
pub use engine::{Engine, EngineSettings};
pub use error::{AdapterError, CloudError, Result};
pub use executor::{DEFAULT_PARALLELISM, Executor, ExecutorSettings};
pub use registry::AdapterRegistry;
pub use report::{ApplyReport, ApplySummary, NodeOutcome, NodeReport};
pub use retry::{RetryError, RetryPolicy};
pub use state::{FileStateStore, MemoryStateStore, StateLock, StateStore};
