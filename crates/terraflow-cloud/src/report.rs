//! Run-level report of an apply

use serde::{Deserialize, Serialize};
use std::fmt;
use terraflow_core::{NodeKey, NodeState, ResourceObject, Step};

/// Outcome of one plan node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The node finished; `object` is the new state (absent after a delete)
    Succeeded {
        object: Option<ResourceObject>,
        attempts: u32,
    },

    /// The adapter call failed; state for the node is unchanged
    Failed { error: String, attempts: u32 },

    /// A predecessor did not finish
    Skipped { blocked_by: Vec<NodeKey> },

    /// Never started (cancellation or run timeout)
    Incomplete,
}

impl NodeOutcome {
    pub fn state(&self) -> NodeState {
        match self {
            NodeOutcome::Succeeded { .. } => NodeState::Done,
            NodeOutcome::Failed { .. } => NodeState::Failed,
            NodeOutcome::Skipped { .. } => NodeState::Skipped,
            NodeOutcome::Incomplete => NodeState::Incomplete,
        }
    }
}

/// Result of a single plan node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub key: NodeKey,
    pub step: Step,
    pub outcome: NodeOutcome,
    pub duration_ms: u64,
}

/// Result of executing a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Per-node results in completion order
    pub nodes: Vec<NodeReport>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,

    /// The run was cancelled before every node started
    pub cancelled: bool,

    /// The global run timeout expired
    pub timed_out: bool,
}

impl ApplyReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every node succeeded
    pub fn is_success(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| matches!(n.outcome, NodeOutcome::Succeeded { .. }))
    }

    pub fn push(&mut self, report: NodeReport) {
        self.nodes.push(report);
    }

    pub fn get(&self, key: &NodeKey) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| &n.key == key)
    }

    /// Final state of a node; nodes not in the report are still pending
    pub fn state_of(&self, key: &NodeKey) -> NodeState {
        self.get(key)
            .map(|n| n.outcome.state())
            .unwrap_or(NodeState::Pending)
    }

    fn with_state(&self, state: NodeState) -> Vec<&NodeReport> {
        self.nodes
            .iter()
            .filter(|n| n.outcome.state() == state)
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&NodeReport> {
        self.with_state(NodeState::Done)
    }

    pub fn failed(&self) -> Vec<&NodeReport> {
        self.with_state(NodeState::Failed)
    }

    pub fn skipped(&self) -> Vec<&NodeReport> {
        self.with_state(NodeState::Skipped)
    }

    pub fn incomplete(&self) -> Vec<&NodeReport> {
        self.with_state(NodeState::Incomplete)
    }

    pub fn summary(&self) -> ApplySummary {
        ApplySummary {
            succeeded: self.succeeded().len(),
            failed: self.failed().len(),
            skipped: self.skipped().len(),
            incomplete: self.incomplete().len(),
        }
    }
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub incomplete: usize,
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped, {} incomplete",
            self.succeeded, self.failed, self.skipped, self.incomplete
        )
    }
}
