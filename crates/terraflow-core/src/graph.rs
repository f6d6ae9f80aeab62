//! Graph Builder
//!
//! Turns the desired configuration plus the prior state snapshot into a set
//! of [`ResourceNode`]s connected by dependency edges. Edges come only from
//! references and explicit `depends_on`; nothing else is inferred.

use crate::diff::ResourceDiff;
use crate::error::ConfigError;
use crate::model::{
    DesiredConfig, ResourceAddress, ResourceConfig, ResourceObject, SchemaSource, StateEntry,
    StateSnapshot,
};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// One vertex of the dependency graph
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub address: ResourceAddress,

    /// Desired configuration, absent when the resource is to be destroyed
    pub desired: Option<ResourceConfig>,

    /// Last applied state, absent for newly declared resources and for
    /// declared resources whose object no longer exists
    pub prior: Option<StateEntry>,

    /// Old objects still awaiting removal
    pub deposed: Vec<ResourceObject>,

    /// Addresses this node depends on
    ///
    /// Taken from the desired configuration, or from the dependencies
    /// recorded in state for resources that are no longer declared.
    pub dependencies: BTreeSet<ResourceAddress>,

    /// Filled in by the differ
    pub diff: Option<ResourceDiff>,
}

impl ResourceNode {
    pub fn kind(&self) -> &str {
        self.address.kind()
    }
}

/// Acyclic dependency graph of resource nodes
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    nodes: BTreeMap<ResourceAddress, ResourceNode>,
    dependents: BTreeMap<ResourceAddress, BTreeSet<ResourceAddress>>,
    state_serial: u64,
}

impl ResourceGraph {
    pub fn node(&self, address: &ResourceAddress) -> Option<&ResourceNode> {
        self.nodes.get(address)
    }

    pub fn node_mut(&mut self, address: &ResourceAddress) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serial of the state snapshot the graph was built from
    pub fn state_serial(&self) -> u64 {
        self.state_serial
    }

    /// Nodes that depend on `address`
    pub fn dependents(&self, address: &ResourceAddress) -> impl Iterator<Item = &ResourceAddress> {
        self.dependents.get(address).into_iter().flatten()
    }

    /// Number of dependency edges
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.dependencies.len()).sum()
    }

    /// Addresses ordered so every node comes after its dependencies
    ///
    /// Ties are broken by address order, so the result is deterministic.
    pub fn topological_order(&self) -> Vec<ResourceAddress> {
        let mut remaining: BTreeMap<&ResourceAddress, usize> = self
            .nodes
            .values()
            .map(|n| (&n.address, n.dependencies.len()))
            .collect();
        let mut ready: BTreeSet<&ResourceAddress> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(address, _)| *address)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(address) = ready.pop_first() {
            remaining.remove(address);
            order.push(address.clone());
            for dependent in self.dependents(address) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        order
    }
}

/// Builds a [`ResourceGraph`] and validates it against the declared schemas
pub struct GraphBuilder<'a, S: SchemaSource + ?Sized> {
    schemas: &'a S,
    absent: BTreeSet<ResourceAddress>,
}

impl<'a, S: SchemaSource + ?Sized> GraphBuilder<'a, S> {
    pub fn new(schemas: &'a S) -> Self {
        Self {
            schemas,
            absent: BTreeSet::new(),
        }
    }

    /// Recorded addresses whose current object was found missing
    ///
    /// Declared ones are planned for creation again. Undeclared ones keep
    /// their entry so the destroy step clears it from state.
    pub fn with_absent(mut self, absent: BTreeSet<ResourceAddress>) -> Self {
        self.absent = absent;
        self
    }

    /// Build the graph, failing on any configuration error or cycle
    pub fn build(
        &self,
        desired: &DesiredConfig,
        state: &StateSnapshot,
    ) -> Result<ResourceGraph, ConfigError> {
        if let Some(err) = ConfigError::collect(self.validate(desired, state)) {
            return Err(err);
        }

        let mut nodes = BTreeMap::new();

        for (address, config) in desired.iter() {
            let entry = state.get(address);
            let prior = entry.filter(|_| !self.absent.contains(address)).cloned();
            nodes.insert(
                address.clone(),
                ResourceNode {
                    address: address.clone(),
                    desired: Some(config.clone()),
                    prior,
                    deposed: entry.map(|e| e.deposed.clone()).unwrap_or_default(),
                    dependencies: config.dependencies(),
                    diff: None,
                },
            );
        }

        for (address, entry) in state.iter() {
            if desired.contains(address) {
                continue;
            }
            let dependencies = entry
                .dependencies
                .iter()
                .filter(|dep| desired.contains(dep) || state.contains(dep))
                .cloned()
                .collect();
            nodes.insert(
                address.clone(),
                ResourceNode {
                    address: address.clone(),
                    desired: None,
                    prior: Some(entry.clone()),
                    deposed: entry.deposed.clone(),
                    dependencies,
                    diff: None,
                },
            );
        }

        let mut dependents: BTreeMap<ResourceAddress, BTreeSet<ResourceAddress>> = BTreeMap::new();
        for node in nodes.values() {
            for dep in &node.dependencies {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(node.address.clone());
            }
        }

        if let Some(cycle) = find_cycle(&nodes) {
            return Err(ConfigError::Cycle(cycle));
        }

        debug!(nodes = nodes.len(), "Dependency graph built");
        Ok(ResourceGraph {
            nodes,
            dependents,
            state_serial: state.serial,
        })
    }

    /// Collect every configuration error instead of stopping at the first
    fn validate(&self, desired: &DesiredConfig, state: &StateSnapshot) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        for (address, config) in desired.iter() {
            match self.schemas.schema(address.kind()) {
                Some(schema) => errors.extend(schema.validate(address, config)),
                None => errors.push(ConfigError::UnknownKind {
                    address: address.clone(),
                    kind: address.kind().to_string(),
                }),
            }

            for (field, reference) in config.references() {
                if !desired.contains(&reference.target) {
                    errors.push(ConfigError::UnresolvedReference {
                        address: address.clone(),
                        field,
                        target: reference.target.clone(),
                    });
                    continue;
                }
                let known_attribute = self
                    .schemas
                    .schema(reference.target.kind())
                    .is_none_or(|schema| schema.has_attribute(&reference.attribute));
                if !known_attribute {
                    errors.push(ConfigError::UnknownReferenceAttribute {
                        address: address.clone(),
                        field,
                        target: reference.target.clone(),
                        attribute: reference.attribute.clone(),
                    });
                }
            }

            for target in &config.depends_on {
                if !desired.contains(target) {
                    errors.push(ConfigError::UnresolvedDependency {
                        address: address.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        for (address, entry) in state.iter() {
            if !desired.contains(address) && self.schemas.schema(&entry.kind).is_none() {
                errors.push(ConfigError::UnknownKind {
                    address: address.clone(),
                    kind: entry.kind.clone(),
                });
            }
        }

        errors
    }
}

/// Find one dependency cycle, listed in "depends on" order
///
/// Uses Tarjan's SCC to locate a strongly connected component, then walks
/// it depth-first from its smallest address to recover a simple cycle.
fn find_cycle(nodes: &BTreeMap<ResourceAddress, ResourceNode>) -> Option<Vec<ResourceAddress>> {
    let mut graph: DiGraph<&ResourceAddress, ()> = DiGraph::new();
    let indices: BTreeMap<&ResourceAddress, NodeIndex> = nodes
        .keys()
        .map(|address| (address, graph.add_node(address)))
        .collect();

    for node in nodes.values() {
        for dep in &node.dependencies {
            if let (Some(&from), Some(&to)) = (indices.get(&node.address), indices.get(dep)) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let component = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .min_by_key(|scc| scc.iter().map(|i| graph[*i]).min().cloned())?;

    let members: HashSet<NodeIndex> = component.iter().copied().collect();
    let start = *component.iter().min_by_key(|i| graph[**i])?;

    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    walk_cycle(&graph, start, start, &members, &mut path, &mut visited);

    Some(path.into_iter().map(|i| graph[i].clone()).collect())
}

fn walk_cycle(
    graph: &DiGraph<&ResourceAddress, ()>,
    current: NodeIndex,
    start: NodeIndex,
    members: &HashSet<NodeIndex>,
    path: &mut Vec<NodeIndex>,
    visited: &mut HashSet<NodeIndex>,
) -> bool {
    let mut next: Vec<NodeIndex> = graph
        .neighbors(current)
        .filter(|n| members.contains(n))
        .collect();
    next.sort_by_key(|n| graph[*n]);
    next.dedup();

    for candidate in next {
        if candidate == start {
            return true;
        }
        if visited.insert(candidate) {
            path.push(candidate);
            if walk_cycle(graph, candidate, start, members, path, visited) {
                return true;
            }
            path.pop();
        }
    }
    false
}
