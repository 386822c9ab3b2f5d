//! Dependency graph diagnostics
//!
//! A read-only traversal from one identity through the entries reachable from it.
//! Built entries report the dependencies that were actually resolved; unbuilt ones
//! report their declared constructor dependencies. The traversal never builds,
//! adopts or specializes anything.

use crate::{Container, DependencyKind, LookupMode, Result, ServiceId};
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;

#[cfg(feature = "graph-export")]
use serde::{Deserialize, Serialize};

/// How one node reaches another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "graph-export", derive(Serialize, Deserialize))]
pub enum EdgeKind {
    Required,
    Optional,
    Lazy,
    /// Observed on a built reference.
    Resolved,
}

impl From<DependencyKind> for EdgeKind {
    fn from(kind: DependencyKind) -> Self {
        match kind {
            DependencyKind::Required => EdgeKind::Required,
            DependencyKind::Optional => EdgeKind::Optional,
            DependencyKind::Lazy => EdgeKind::Lazy,
        }
    }
}

/// One identity in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "graph-export", derive(Serialize, Deserialize))]
pub struct GraphNode {
    /// Display form of the identity.
    pub id: String,
    pub service: String,
    pub name: Option<String>,
    pub lifetime: Option<crate::Lifetime>,
    pub implementation: Option<String>,
    pub built: bool,
    /// Declaring scope.
    pub scope: Option<u64>,
    /// No entry is registered for this identity.
    pub missing: bool,
}

/// A directed edge between node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "graph-export", derive(Serialize, Deserialize))]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
}

/// Node/edge list for external visualization tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "graph-export", derive(Serialize, Deserialize))]
pub struct DependencyGraph {
    /// Index of the requested identity; always 0.
    pub root: usize,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl DependencyGraph {
    pub(crate) fn build(container: &Container, root: &ServiceId) -> Result<Self> {
        let mut graph = Self::default();
        let mut index: HashMap<ServiceId, usize> = HashMap::new();
        let mut queue = VecDeque::new();

        index.insert(root.clone(), 0);
        graph.nodes.push(GraphNode::missing(root));
        queue.push_back(root.clone());

        while let Some(id) = queue.pop_front() {
            let from = index[&id];
            let Some(entry) = container.get(&id, LookupMode::INSPECT)? else {
                continue;
            };

            let reference = entry.reference();
            graph.nodes[from] = GraphNode {
                id: id.to_string(),
                service: id.service_type().to_string(),
                name: id.name().map(str::to_string),
                lifetime: Some(entry.lifetime()),
                implementation: entry.implementation().map(|ty| ty.to_string()),
                built: reference.is_some(),
                scope: Some(entry.owner_scope().id()),
                missing: false,
            };

            let targets: Vec<(ServiceId, EdgeKind)> = match reference {
                Some(reference) => reference
                    .dependencies()
                    .into_iter()
                    .map(|dep| (dep, EdgeKind::Resolved))
                    .collect(),
                None => entry
                    .dependencies()
                    .into_iter()
                    .map(|dep| (dep.id().clone(), dep.kind().into()))
                    .collect(),
            };

            for (target, kind) in targets {
                let to = match index.get(&target) {
                    Some(&to) => to,
                    None => {
                        let to = graph.nodes.len();
                        graph.nodes.push(GraphNode::missing(&target));
                        index.insert(target.clone(), to);
                        queue.push_back(target);
                        to
                    }
                };
                graph.edges.push(GraphEdge { from, to, kind });
            }
        }
        Ok(graph)
    }

    #[inline]
    pub fn node(&self, index: usize) -> Option<&GraphNode> {
        self.nodes.get(index)
    }

    /// Edges leaving `index`, in declaration order.
    pub fn edges_from(&self, index: usize) -> impl Iterator<Item = &GraphEdge> + '_ {
        self.edges.iter().filter(move |edge| edge.from == index)
    }

    /// Render as Graphviz DOT.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph dependencies {\n");
        for (i, node) in self.nodes.iter().enumerate() {
            let label = match node.lifetime {
                Some(lifetime) => format!("{}\\n[{}]", node.id, lifetime),
                None => node.id.clone(),
            };
            let style = if node.missing { ", style=dashed" } else { "" };
            let _ = writeln!(out, "    n{i} [label=\"{}\"{style}];", label.replace('"', "\\\""));
        }
        for edge in &self.edges {
            let style = match edge.kind {
                EdgeKind::Required | EdgeKind::Resolved => "",
                EdgeKind::Optional => " [style=dashed]",
                EdgeKind::Lazy => " [style=dotted]",
            };
            let _ = writeln!(out, "    n{} -> n{}{style};", edge.from, edge.to);
        }
        out.push('}');
        out
    }

    /// Serialize to JSON.
    #[cfg(feature = "graph-export")]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| crate::DiError::Internal(e.to_string()))
    }
}

impl GraphNode {
    fn missing(id: &ServiceId) -> Self {
        Self {
            id: id.to_string(),
            service: id.service_type().to_string(),
            name: id.name().map(str::to_string),
            lifetime: None,
            implementation: None,
            built: false,
            scope: None,
            missing: true,
        }
    }
}
