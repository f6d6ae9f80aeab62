//! Planner
//!
//! Decomposes diffed resource nodes into executable plan nodes and groups
//! them into waves by topological layering. A `Replace` becomes two plan
//! nodes (removal of the old object, creation of the new one) ordered by
//! the kind's create-before-destroy policy.

use crate::diff::{Action, AttributeChange, ResourceDiff};
use crate::error::{FlowError, Result};
use crate::graph::ResourceGraph;
use crate::model::{
    ResourceAddress, ResourceConfig, ResourceObject, SchemaSource, StateEntry,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument};

/// Which object of an address a plan node acts on
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// The current (or new) object
    Apply,
    /// Removal of the current object
    Destroy,
    /// Removal of an old object that was set aside with the given id
    Deposed(String),
}

/// Identifier of a plan node
///
/// Serialized as `kind.name`, `kind.name#destroy` or `kind.name#deposed:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeKey {
    pub address: ResourceAddress,
    pub phase: Phase,
}

impl NodeKey {
    pub fn apply(address: ResourceAddress) -> Self {
        Self {
            address,
            phase: Phase::Apply,
        }
    }

    pub fn destroy(address: ResourceAddress) -> Self {
        Self {
            address,
            phase: Phase::Destroy,
        }
    }

    pub fn deposed(address: ResourceAddress, id: impl Into<String>) -> Self {
        Self {
            address,
            phase: Phase::Deposed(id.into()),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.phase {
            Phase::Apply => write!(f, "{}", self.address),
            Phase::Destroy => write!(f, "{}#destroy", self.address),
            Phase::Deposed(id) => write!(f, "{}#deposed:{}", self.address, id),
        }
    }
}

impl FromStr for NodeKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (address, phase) = match s.split_once('#') {
            None => (s, Phase::Apply),
            Some((address, "destroy")) => (address, Phase::Destroy),
            Some((address, rest)) => match rest.strip_prefix("deposed:") {
                Some(id) if !id.is_empty() => (address, Phase::Deposed(id.to_string())),
                _ => return Err(format!("invalid plan node key '{}'", s)),
            },
        };
        let address = address.parse().map_err(|e| format!("{}", e))?;
        Ok(Self { address, phase })
    }
}

impl From<NodeKey> for String {
    fn from(key: NodeKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for NodeKey {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Adapter operation a plan node performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    NoOp,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::NoOp => write!(f, "no-op"),
            Step::Create => write!(f, "create"),
            Step::Update => write!(f, "update"),
            Step::Delete => write!(f, "delete"),
        }
    }
}

/// Execution state of a plan node during an apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    /// A predecessor failed or was skipped
    Skipped,
    /// Never started because the run was cancelled or timed out
    Incomplete,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Done | NodeState::Failed | NodeState::Skipped | NodeState::Incomplete
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Pending => "pending",
            NodeState::Ready => "ready",
            NodeState::Running => "running",
            NodeState::Done => "done",
            NodeState::Failed => "failed",
            NodeState::Skipped => "skipped",
            NodeState::Incomplete => "incomplete",
        };
        write!(f, "{}", s)
    }
}

/// One executable step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub key: NodeKey,
    pub step: Step,

    /// Action of the resource this step belongs to
    pub action: Action,

    /// Desired configuration, for apply-phase steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ResourceConfig>,

    /// Object the step acts on (updated, kept or deleted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<ResourceObject>,

    /// New object is created while the old one is set aside
    #[serde(default)]
    pub create_before_destroy: bool,

    /// Attribute changes, for display and for building update requests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,

    /// Steps that must finish before this one starts
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub after: BTreeSet<NodeKey>,
}

impl PlanNode {
    fn new(key: NodeKey, step: Step, action: Action) -> Self {
        Self {
            key,
            step,
            action,
            config: None,
            prior: None,
            create_before_destroy: false,
            changes: Vec::new(),
            after: BTreeSet::new(),
        }
    }

    pub fn address(&self) -> &ResourceAddress {
        &self.key.address
    }

    pub fn kind(&self) -> &str {
        self.key.address.kind()
    }

    /// Dependencies to record in state once this step succeeds
    pub fn dependencies(&self) -> BTreeSet<ResourceAddress> {
        self.config
            .as_ref()
            .map(ResourceConfig::dependencies)
            .unwrap_or_default()
    }
}

/// An ordered sequence of execution waves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub created_at: DateTime<Utc>,

    /// Serial of the state snapshot the plan was computed from
    pub state_serial: u64,

    /// Per-address classification
    pub diffs: Vec<ResourceDiff>,

    pub nodes: BTreeMap<NodeKey, PlanNode>,

    /// Each wave only depends on earlier waves
    pub waves: Vec<Vec<NodeKey>>,
}

impl Plan {
    pub fn node(&self, key: &NodeKey) -> Option<&PlanNode> {
        self.nodes.get(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether executing the plan would change anything
    pub fn has_changes(&self) -> bool {
        self.diffs.iter().any(|d| d.action.is_change())
    }

    /// Index of the wave containing `key`
    pub fn wave_index(&self, key: &NodeKey) -> Option<usize> {
        self.waves.iter().position(|wave| wave.contains(key))
    }

    pub fn diff(&self, address: &ResourceAddress) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| &d.address == address)
    }

    /// Diffs with a given action
    pub fn diffs_by_action(&self, action: Action) -> Vec<&ResourceDiff> {
        self.diffs.iter().filter(|d| d.action == action).collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.diffs_by_action(Action::Create).len(),
            update: self.diffs_by_action(Action::Update).len(),
            replace: self.diffs_by_action(Action::Replace).len(),
            destroy: self.diffs_by_action(Action::Destroy).len(),
            no_change: self.diffs_by_action(Action::NoOp).len(),
        }
    }

    /// Whether the replacement of `address` creates before destroying
    pub fn is_create_before_destroy(&self, address: &ResourceAddress) -> bool {
        self.nodes
            .get(&NodeKey::apply(address.clone()))
            .is_some_and(|n| n.create_before_destroy)
    }

    /// Display symbol for a diff
    pub fn symbol(&self, diff: &ResourceDiff) -> &'static str {
        match diff.action {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace if self.is_create_before_destroy(&diff.address) => "+/-",
            Action::Replace => "-/+",
            Action::Destroy => "-",
            Action::NoOp => " ",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diff in self.diffs.iter().filter(|d| d.action.is_change()) {
            write!(f, "  {} {}", self.symbol(diff), diff.address)?;
            let reasons: Vec<&str> = diff.replace_reasons().collect();
            if diff.action == Action::Replace && !reasons.is_empty() {
                write!(f, " (replace: {})", reasons.join(", "))?;
            }
            writeln!(f)?;
            for change in &diff.changes {
                let before = change
                    .before
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "null".to_string());
                let after = change
                    .after
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "null".to_string());
                writeln!(f, "      {}: {} -> {}", change.name, before, after)?;
            }
        }
        write!(f, "Plan: {}", self.summary())
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
    pub no_change: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to destroy, {} unchanged",
            self.create, self.update, self.replace, self.destroy, self.no_change
        )
    }
}

/// Builds a [`Plan`] from a diffed graph
pub struct Planner<'a, S: SchemaSource + ?Sized> {
    schemas: &'a S,
}

impl<'a, S: SchemaSource + ?Sized> Planner<'a, S> {
    pub fn new(schemas: &'a S) -> Self {
        Self { schemas }
    }

    #[instrument(skip_all, fields(resources = graph.len()))]
    pub fn plan(&self, graph: &ResourceGraph) -> Result<Plan> {
        let mut actions: BTreeMap<&ResourceAddress, &ResourceDiff> = BTreeMap::new();
        for node in graph.nodes() {
            let diff = node
                .diff
                .as_ref()
                .ok_or_else(|| FlowError::NotDiffed(node.address.clone()))?;
            actions.insert(&node.address, diff);
        }
        let action_of = |address: &ResourceAddress| actions.get(address).map(|d| d.action);

        let cbd = self.create_before_destroy_set(graph, &action_of);

        let mut nodes: BTreeMap<NodeKey, PlanNode> = BTreeMap::new();
        let mut apply_keys: BTreeMap<ResourceAddress, NodeKey> = BTreeMap::new();
        let mut removal_keys: BTreeMap<ResourceAddress, NodeKey> = BTreeMap::new();
        let mut deposed_keys: BTreeMap<ResourceAddress, Vec<NodeKey>> = BTreeMap::new();

        for node in graph.nodes() {
            let address = &node.address;
            let diff = actions[address];
            let prior = node.prior.as_ref().map(StateEntry::object);

            for object in &node.deposed {
                let key = NodeKey::deposed(address.clone(), &object.id);
                let mut step = PlanNode::new(key.clone(), Step::Delete, diff.action);
                step.prior = Some(object.clone());
                nodes.insert(key.clone(), step);
                deposed_keys.entry(address.clone()).or_default().push(key);
            }

            let mut apply = |step: Step, prior: Option<ResourceObject>, cbd: bool| {
                let key = NodeKey::apply(address.clone());
                let mut plan_node = PlanNode::new(key.clone(), step, diff.action);
                plan_node.config = node.desired.clone();
                plan_node.prior = prior;
                plan_node.create_before_destroy = cbd;
                plan_node.changes = diff.changes.clone();
                nodes.insert(key.clone(), plan_node);
                apply_keys.insert(address.clone(), key);
            };

            match diff.action {
                Action::NoOp => apply(Step::NoOp, prior, false),
                Action::Create => apply(Step::Create, None, false),
                Action::Update => apply(Step::Update, prior, false),
                Action::Replace if cbd.contains(address) => {
                    apply(Step::Create, prior.clone(), true);
                    if let Some(old) = prior {
                        let key = NodeKey::deposed(address.clone(), &old.id);
                        let mut step = PlanNode::new(key.clone(), Step::Delete, diff.action);
                        step.prior = Some(old);
                        nodes.entry(key.clone()).or_insert(step);
                        removal_keys.insert(address.clone(), key);
                    }
                }
                Action::Replace => {
                    apply(Step::Create, None, false);
                    removal_keys.insert(address.clone(), destroy_node(&mut nodes, address, prior, diff));
                }
                Action::Destroy => {
                    removal_keys.insert(address.clone(), destroy_node(&mut nodes, address, prior, diff));
                }
            }
        }

        // Every address that depends (now or as recorded) on another address
        let mut users: BTreeMap<&ResourceAddress, BTreeSet<&ResourceAddress>> = BTreeMap::new();
        for node in graph.nodes() {
            let recorded = node.prior.iter().flat_map(|p| p.dependencies.iter());
            for dep in node.dependencies.iter().chain(recorded) {
                if dep != &node.address {
                    users.entry(dep).or_default().insert(&node.address);
                }
            }
        }

        let mut edges: Vec<(NodeKey, NodeKey)> = Vec::new();
        for node in graph.nodes() {
            let address = &node.address;
            let action = actions[address].action;
            let apply = apply_keys.get(address);
            let removal = removal_keys.get(address);

            for deposed in deposed_keys.get(address).into_iter().flatten() {
                if let Some(apply) = apply {
                    edges.push((apply.clone(), deposed.clone()));
                }
                if let Some(removal) = removal {
                    edges.push((removal.clone(), deposed.clone()));
                }
            }

            if let (Some(apply), Some(removal)) = (apply, removal) {
                if cbd.contains(address) {
                    edges.push((removal.clone(), apply.clone()));
                } else {
                    edges.push((apply.clone(), removal.clone()));
                }
            }

            if let Some(apply) = apply {
                for dep in &node.dependencies {
                    if let Some(dep_apply) = apply_keys.get(dep) {
                        edges.push((apply.clone(), dep_apply.clone()));
                    }
                }
            }

            if let Some(removal) = removal {
                let waits_for_users = action == Action::Destroy || cbd.contains(address);
                for user in users.get(address).into_iter().flatten() {
                    if let Some(user_removal) = removal_keys.get(*user) {
                        edges.push((removal.clone(), user_removal.clone()));
                    }
                    if waits_for_users {
                        if let Some(user_apply) = apply_keys.get(*user) {
                            edges.push((removal.clone(), user_apply.clone()));
                        }
                    }
                }
            }
        }

        for (node, predecessor) in edges {
            if node == predecessor || !nodes.contains_key(&predecessor) {
                continue;
            }
            if let Some(plan_node) = nodes.get_mut(&node) {
                plan_node.after.insert(predecessor);
            }
        }

        let waves = layer(&nodes)?;
        let diffs: Vec<ResourceDiff> = actions.into_values().cloned().collect();
        let plan = Plan {
            created_at: Utc::now(),
            state_serial: graph.state_serial(),
            diffs,
            nodes,
            waves,
        };

        info!(
            steps = plan.len(),
            waves = plan.waves.len(),
            summary = %plan.summary(),
            "Plan computed"
        );
        Ok(plan)
    }

    /// Replaced addresses that create their new object first
    ///
    /// The policy spreads from a create-before-destroy node to every
    /// replaced dependency, otherwise the dependency's destroy-first
    /// ordering would need the dependent's old object gone before its
    /// new one exists.
    fn create_before_destroy_set<F>(&self, graph: &ResourceGraph, action_of: &F) -> BTreeSet<ResourceAddress>
    where
        F: Fn(&ResourceAddress) -> Option<Action>,
    {
        let mut set: BTreeSet<ResourceAddress> = graph
            .nodes()
            .filter(|n| action_of(&n.address) == Some(Action::Replace))
            .filter(|n| {
                self.schemas
                    .schema(n.kind())
                    .is_some_and(|s| s.create_before_destroy)
            })
            .map(|n| n.address.clone())
            .collect();

        let mut pending: Vec<ResourceAddress> = set.iter().cloned().collect();
        while let Some(address) = pending.pop() {
            let Some(node) = graph.node(&address) else {
                continue;
            };
            for dep in &node.dependencies {
                if action_of(dep) == Some(Action::Replace) && set.insert(dep.clone()) {
                    debug!(address = %dep, dependent = %address, "Replacement inherits create-before-destroy");
                    pending.push(dep.clone());
                }
            }
        }

        set
    }
}

fn destroy_node(
    nodes: &mut BTreeMap<NodeKey, PlanNode>,
    address: &ResourceAddress,
    prior: Option<ResourceObject>,
    diff: &ResourceDiff,
) -> NodeKey {
    let key = NodeKey::destroy(address.clone());
    let mut step = PlanNode::new(key.clone(), Step::Delete, diff.action);
    step.prior = prior;
    nodes.insert(key.clone(), step);
    key
}

/// Kahn layering: each wave holds every node whose predecessors are all in
/// earlier waves
fn layer(nodes: &BTreeMap<NodeKey, PlanNode>) -> Result<Vec<Vec<NodeKey>>> {
    let mut remaining: BTreeMap<&NodeKey, usize> =
        nodes.iter().map(|(k, n)| (k, n.after.len())).collect();
    let mut successors: BTreeMap<&NodeKey, Vec<&NodeKey>> = BTreeMap::new();
    for (key, node) in nodes {
        for predecessor in &node.after {
            successors.entry(predecessor).or_default().push(key);
        }
    }

    let mut waves = Vec::new();
    loop {
        let ready: Vec<&NodeKey> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| *key)
            .collect();
        if ready.is_empty() {
            break;
        }
        for key in &ready {
            remaining.remove(*key);
            for successor in successors.get(*key).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(*successor) {
                    *count -= 1;
                }
            }
        }
        waves.push(ready.into_iter().cloned().collect());
    }

    if !remaining.is_empty() {
        return Err(FlowError::PlanCycle(
            remaining.keys().map(|k| k.to_string()).collect(),
        ));
    }
    Ok(waves)
}
