//! Differ
//!
//! Compares each node's desired configuration with its prior state and
//! classifies it as one of [`Action`]. Nodes are visited in topological
//! order so that references can be resolved against what the referenced
//! resource is expected to look like after the apply.

use crate::error::{FlowError, Result};
use crate::graph::ResourceGraph;
use crate::model::{ResourceAddress, ResourceConfig, ResourceSchema, SchemaSource, StateEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, instrument};

/// What has to happen to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    NoOp,
    Create,
    Update,
    Replace,
    Destroy,
}

impl Action {
    pub fn is_change(&self) -> bool {
        !matches!(self, Action::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::NoOp => write!(f, "no-op"),
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Replace => write!(f, "replace"),
            Action::Destroy => write!(f, "destroy"),
        }
    }
}

/// Attribute value as far as it can be known at plan time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum PlannedValue {
    Known(serde_json::Value),
    /// Depends on a value only available after apply
    Unknown,
}

impl fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedValue::Known(value) => write!(f, "{}", value),
            PlannedValue::Unknown => write!(f, "(known after apply)"),
        }
    }
}

/// Change of a single attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub name: String,
    pub before: Option<serde_json::Value>,
    /// `None` when the attribute is being removed
    pub after: Option<PlannedValue>,
    pub forces_replace: bool,
}

/// Classification of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub address: ResourceAddress,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,
}

impl ResourceDiff {
    /// Attributes whose change forces the replacement
    pub fn replace_reasons(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(|c| c.forces_replace)
            .map(|c| c.name.as_str())
    }
}

/// What a resource is expected to expose after the apply
#[derive(Debug, Clone, Default)]
struct PlannedOutputs {
    values: BTreeMap<String, PlannedValue>,
    /// Absent attributes are known to be null rather than unknown
    complete: bool,
}

impl PlannedOutputs {
    fn from_prior(entry: &StateEntry) -> Self {
        let values = entry
            .object()
            .outputs()
            .into_iter()
            .map(|(k, v)| (k, PlannedValue::Known(v)))
            .collect();
        Self {
            values,
            complete: true,
        }
    }

    fn lookup(&self, attribute: &str) -> PlannedValue {
        match self.values.get(attribute) {
            Some(value) => value.clone(),
            None if self.complete => PlannedValue::Known(serde_json::Value::Null),
            None => PlannedValue::Unknown,
        }
    }
}

pub struct Differ<'a, S: SchemaSource + ?Sized> {
    schemas: &'a S,
}

impl<'a, S: SchemaSource + ?Sized> Differ<'a, S> {
    pub fn new(schemas: &'a S) -> Self {
        Self { schemas }
    }

    /// Attach a [`ResourceDiff`] to every node of the graph
    #[instrument(skip_all, fields(nodes = graph.len()))]
    pub fn annotate(&self, graph: &mut ResourceGraph) -> Result<()> {
        let mut outputs: BTreeMap<ResourceAddress, PlannedOutputs> = BTreeMap::new();

        for address in graph.topological_order() {
            let Some(node) = graph.node(&address) else {
                continue;
            };
            let schema = self
                .schemas
                .schema(address.kind())
                .ok_or_else(|| FlowError::NotDiffed(address.clone()))?;

            let planned = node
                .desired
                .as_ref()
                .map(|config| planned_attributes(schema, config, &outputs));
            let diff = diff_resource(schema, &address, planned.as_ref(), node.prior.as_ref());
            debug!(address = %address, action = %diff.action, changes = diff.changes.len(), "Diffed resource");

            if let Some(out) = expected_outputs(schema, &diff, planned, node.prior.as_ref()) {
                outputs.insert(address.clone(), out);
            }
            if let Some(node) = graph.node_mut(&address) {
                node.diff = Some(diff);
            }
        }

        Ok(())
    }
}

/// Desired attribute values with defaults applied and references resolved
/// as far as possible
fn planned_attributes(
    schema: &ResourceSchema,
    config: &ResourceConfig,
    outputs: &BTreeMap<ResourceAddress, PlannedOutputs>,
) -> BTreeMap<String, PlannedValue> {
    let mut planned = BTreeMap::new();

    for (name, attr) in &schema.attributes {
        if !attr.is_settable() {
            continue;
        }
        let value = match config.attributes.get(name) {
            Some(value) => {
                let mut unknown = false;
                let resolved = value.resolve_with(&mut |reference| {
                    let out = outputs
                        .get(&reference.target)
                        .map(|o| o.lookup(&reference.attribute))
                        .unwrap_or(PlannedValue::Unknown);
                    match out {
                        PlannedValue::Known(v) => Some(v),
                        PlannedValue::Unknown => {
                            unknown = true;
                            None
                        }
                    }
                });
                match resolved {
                    Some(v) if !unknown => PlannedValue::Known(v),
                    _ => PlannedValue::Unknown,
                }
            }
            None => match &attr.default {
                Some(default) => PlannedValue::Known(default.clone()),
                None => continue,
            },
        };
        planned.insert(name.clone(), value);
    }

    planned
}

/// Compare planned values against prior state
fn diff_resource(
    schema: &ResourceSchema,
    address: &ResourceAddress,
    planned: Option<&BTreeMap<String, PlannedValue>>,
    prior: Option<&StateEntry>,
) -> ResourceDiff {
    let (planned, prior) = match (planned, prior) {
        (None, None) => {
            return ResourceDiff {
                address: address.clone(),
                action: Action::NoOp,
                changes: Vec::new(),
            };
        }
        (Some(_), None) => {
            return ResourceDiff {
                address: address.clone(),
                action: Action::Create,
                changes: Vec::new(),
            };
        }
        (None, Some(_)) => {
            return ResourceDiff {
                address: address.clone(),
                action: Action::Destroy,
                changes: Vec::new(),
            };
        }
        (Some(planned), Some(prior)) => (planned, prior),
    };

    let mut changes = Vec::new();
    for (name, attr) in &schema.attributes {
        if !attr.is_settable() {
            continue;
        }
        let before = prior.attributes.get(name);
        let after = planned.get(name);

        let changed = match after {
            Some(PlannedValue::Unknown) => true,
            Some(PlannedValue::Known(value)) => match before {
                Some(b) => b != value,
                None => !value.is_null(),
            },
            // Unset optional+computed attributes are owned by the provider
            None if attr.computed => false,
            None => before.is_some_and(|b| !b.is_null()),
        };

        if changed {
            changes.push(AttributeChange {
                name: name.clone(),
                before: before.cloned(),
                after: after.cloned(),
                forces_replace: attr.force_new || !schema.updatable,
            });
        }
    }

    let action = if changes.is_empty() {
        Action::NoOp
    } else if changes.iter().any(|c| c.forces_replace) {
        Action::Replace
    } else {
        Action::Update
    };

    ResourceDiff {
        address: address.clone(),
        action,
        changes,
    }
}

/// Outputs other nodes may reference once this node is applied
fn expected_outputs(
    schema: &ResourceSchema,
    diff: &ResourceDiff,
    planned: Option<BTreeMap<String, PlannedValue>>,
    prior: Option<&StateEntry>,
) -> Option<PlannedOutputs> {
    match diff.action {
        Action::NoOp => prior.map(PlannedOutputs::from_prior),
        Action::Update => {
            let mut out = prior.map(PlannedOutputs::from_prior).unwrap_or_default();
            for change in &diff.changes {
                let value = change
                    .after
                    .clone()
                    .unwrap_or(PlannedValue::Known(serde_json::Value::Null));
                out.values.insert(change.name.clone(), value);
            }
            // Provider-owned values may move with any update; `id` stays
            let planned = planned.unwrap_or_default();
            for (name, attr) in &schema.attributes {
                if attr.computed && !planned.contains_key(name) {
                    out.values.insert(name.clone(), PlannedValue::Unknown);
                }
            }
            Some(out)
        }
        // Fresh object: settable values as planned, everything else unknown
        Action::Create | Action::Replace => Some(PlannedOutputs {
            values: planned.unwrap_or_default(),
            complete: false,
        }),
        Action::Destroy => None,
    }
}
