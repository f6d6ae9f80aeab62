//! TerraFlow Core
//!
//! Planning half of the reconciliation engine: the resource data model,
//! the desired-configuration loader, and the three pure stages that turn
//! desired configuration plus prior state into an executable plan.
//!
//! # Pipeline
//!
//! ```text
//!  desired config ──┐
//!                   ├─► GraphBuilder ─► Differ ─► Planner ─► Plan (waves)
//!  state snapshot ──┘   (edges,         (action    (steps,
//!                        cycles)         per node)  ordering)
//! ```
//!
//! Nothing in this crate talks to a provider or touches the state store;
//! execution lives in `terraflow-cloud`.

pub mod diff;
pub mod error;
pub mod graph;
pub mod loader;
pub mod model;
pub mod plan;

// Re-exports
pub use diff::{Action, AttributeChange, Differ, PlannedValue, ResourceDiff};
pub use error::{ConfigError, FlowError, Result};
pub use graph::{GraphBuilder, ResourceGraph, ResourceNode};
pub use loader::{load_document, parse_document};
pub use model::*;
pub use plan::{NodeKey, NodeState, Phase, Plan, PlanNode, PlanSummary, Planner, Step};
