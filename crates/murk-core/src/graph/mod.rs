//! The Module Dependency Graph store
//!
//! An arena-backed, directed, labeled multigraph combining AST, CFG,
//! call-graph and PDG edges. The store offers exactly the capability the
//! detection engine needs — typed traversal, secondary indices, and
//! transient writes scoped to a single detection pass — and nothing of a
//! general-purpose graph database.

pub mod loader;
pub mod location;
pub mod types;
pub mod walk;

pub use loader::{load_graph, LoadError};
pub use location::{SourceLocation, SourcePosition};
pub use types::{AstRole, EdgeRelation, NodeKind, PdgRel, RefRole};
pub use walk::{EdgeSelector, Path, Walk};

use id_arena::{Arena, Id};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

pub type NodeId = Id<Node>;
pub type EdgeId = Id<Edge>;

#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    /// Stable identifier from the CSV (`Id:ID`).
    pub uid: String,
    pub kind: NodeKind,
    pub sub_type: Option<String>,
    /// `CFG_F_START` uid of the enclosing function, when known.
    pub function_context: Option<String>,
    pub identifier_name: Option<String>,
    pub raw: Option<String>,
    pub code: Option<String>,
    /// `Location` JSON as shipped by the parser; parsed on demand.
    pub location_raw: Option<String>,
    /// Derived during analysis: reachable from a taint source, or an
    /// externally visible entry. Never read from the CSV.
    pub is_exported: bool,
    out: Vec<EdgeId>,
    inc: Vec<EdgeId>,
}

impl Node {
    pub fn location(&self) -> Option<SourceLocation> {
        SourceLocation::parse(self.location_raw.as_deref())
    }

    pub fn name(&self) -> &str {
        self.identifier_name.as_deref().unwrap_or("")
    }
}

#[derive(Debug)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub relation: EdgeRelation,
    pub identifier_name: Option<String>,
    pub argument_index: Option<u32>,
    /// Parameter position; the parser emits `"this"` for receiver bindings.
    pub param_index: Option<String>,
    pub element_index: Option<u32>,
    /// ARG-validity flag, owned by the call-graph propagator.
    pub valid: bool,
}

impl Edge {
    pub fn name(&self) -> &str {
        self.identifier_name.as_deref().unwrap_or("")
    }

    pub fn is_wildcard(&self) -> bool {
        self.name() == "*"
    }
}

/// Attribute set for [`MdgGraph::add_node`].
#[derive(Debug, Default, Clone)]
pub struct NodeAttrs {
    pub sub_type: Option<String>,
    pub function_context: Option<String>,
    pub identifier_name: Option<String>,
    pub raw: Option<String>,
    pub code: Option<String>,
    pub location_raw: Option<String>,
}

/// Attribute set for [`MdgGraph::add_edge`].
#[derive(Debug, Default, Clone)]
pub struct EdgeAttrs {
    pub identifier_name: Option<String>,
    pub argument_index: Option<u32>,
    pub param_index: Option<String>,
    pub element_index: Option<u32>,
}

#[derive(Debug, Default)]
pub struct MdgGraph {
    nodes: Arena<Node>,
    edges: Arena<Edge>,
    uid_index: HashMap<String, NodeId>,
    kind_index: HashMap<String, Vec<NodeId>>,
    pollution_sinks: HashSet<NodeId>,
    /// Structural queries issued so far; memoization tests observe this.
    queries: Cell<u64>,
}

impl MdgGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, uid: impl Into<String>, kind: NodeKind, attrs: NodeAttrs) -> NodeId {
        let uid = uid.into();
        let id = self.nodes.alloc_with_id(|id| Node {
            id,
            uid: uid.clone(),
            kind: kind.clone(),
            sub_type: attrs.sub_type,
            function_context: attrs.function_context,
            identifier_name: attrs.identifier_name,
            raw: attrs.raw,
            code: attrs.code,
            location_raw: attrs.location_raw,
            is_exported: false,
            out: Vec::new(),
            inc: Vec::new(),
        });
        self.uid_index.insert(uid, id);
        self.kind_index
            .entry(kind.as_str().to_string())
            .or_default()
            .push(id);
        id
    }

    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        relation: EdgeRelation,
        attrs: EdgeAttrs,
    ) -> EdgeId {
        let id = self.edges.alloc_with_id(|id| Edge {
            id,
            from,
            to,
            relation,
            identifier_name: attrs.identifier_name,
            argument_index: attrs.argument_index,
            param_index: attrs.param_index,
            element_index: attrs.element_index,
            valid: false,
        });
        self.nodes[from].out.push(id);
        self.nodes[to].inc.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id]
    }

    pub fn node_by_uid(&self, uid: &str) -> Option<NodeId> {
        self.uid_index.get(uid).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|(_, n)| n)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().map(|(_, e)| e)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes_of_kind(&self, kind: &NodeKind) -> impl Iterator<Item = NodeId> + '_ {
        self.kind_index
            .get(kind.as_str())
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.nodes[node].out.iter().map(move |&e| &self.edges[e])
    }

    pub fn incoming(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.nodes[node].inc.iter().map(move |&e| &self.edges[e])
    }

    /// Targets of outgoing edges satisfying `pred`.
    pub fn targets_where<'a, F>(&'a self, node: NodeId, pred: F) -> impl Iterator<Item = NodeId> + 'a
    where
        F: Fn(&Edge) -> bool + 'a,
    {
        self.outgoing(node).filter(move |e| pred(e)).map(|e| e.to)
    }

    /// Sources of incoming edges satisfying `pred`.
    pub fn sources_where<'a, F>(&'a self, node: NodeId, pred: F) -> impl Iterator<Item = NodeId> + 'a
    where
        F: Fn(&Edge) -> bool + 'a,
    {
        self.incoming(node).filter(move |e| pred(e)).map(|e| e.from)
    }

    pub fn is_pollution_sink(&self, node: NodeId) -> bool {
        self.pollution_sinks.contains(&node)
    }

    pub fn pollution_sink_count(&self) -> usize {
        self.pollution_sinks.len()
    }

    /// Transient `PARAMETER` edges currently wired into the adjacency lists.
    pub fn parameter_edge_count(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|(_, n)| n.out.iter())
            .filter(|&&e| self.edges[e].relation == EdgeRelation::Parameter)
            .count()
    }

    pub fn note_query(&self) {
        self.queries.set(self.queries.get() + 1);
    }

    pub fn query_count(&self) -> u64 {
        self.queries.get()
    }

    /// Check the linear-versioning invariant: tracing `NV` edges backward
    /// from any object must yield a simple path. Returns the ids of nodes
    /// where version chains merge.
    pub fn verify_linear_versioning(&self) -> Vec<NodeId> {
        let mut offenders = Vec::new();
        for (id, _) in self.nodes.iter() {
            let nv_preds = self
                .incoming(id)
                .filter(|e| e.relation == EdgeRelation::Pdg(PdgRel::Nv))
                .count();
            if nv_preds > 1 {
                offenders.push(id);
            }
        }
        offenders
    }
}

/// Transient graph mutation scoped to one detection pass.
///
/// The session records every `PARAMETER` edge and pollution-sink mark it
/// creates; `finish` removes all of them. Matchers must call `finish` on
/// every path out, including early returns — the persistent model never
/// contains auxiliary state.
#[derive(Debug, Default)]
pub struct ScratchSession {
    parameter_edges: Vec<EdgeId>,
    marks: Vec<NodeId>,
}

impl ScratchSession {
    pub fn begin() -> Self {
        Self::default()
    }

    /// Join every call argument to the callee parameter with the matching
    /// bound name: `arg -PARAMETER-> param`. A traversal accelerator for the
    /// cross-call pollution pattern.
    pub fn link_parameters(&mut self, graph: &mut MdgGraph) {
        let mut links: Vec<(NodeId, NodeId)> = Vec::new();
        for call in graph.nodes_of_kind(&NodeKind::PdgCall).collect::<Vec<_>>() {
            let callees: Vec<NodeId> = graph
                .targets_where(call, |e| e.relation == EdgeRelation::Cg)
                .collect();
            for arg_edge in graph.nodes[call].inc.clone() {
                let arg_edge = &graph.edges[arg_edge];
                if !matches!(arg_edge.relation, EdgeRelation::Pdg(PdgRel::Arg(_))) {
                    continue;
                }
                let arg = arg_edge.from;
                let bound_name = arg_edge.name().to_string();
                for &callee in &callees {
                    for param in graph
                        .targets_where(callee, |e| e.relation.is_ref(RefRole::Param))
                        .collect::<Vec<_>>()
                    {
                        if graph.node(param).name() == bound_name {
                            links.push((arg, param));
                        }
                    }
                }
            }
        }
        for (arg, param) in links {
            let edge =
                graph.add_edge(arg, param, EdgeRelation::Parameter, EdgeAttrs::default());
            self.parameter_edges.push(edge);
        }
    }

    pub fn mark_pollution_sinks(&mut self, graph: &mut MdgGraph, nodes: &[NodeId]) {
        for &node in nodes {
            if graph.pollution_sinks.insert(node) {
                self.marks.push(node);
            }
        }
    }

    /// Remove every transient edge and mark created by this session.
    pub fn finish(self, graph: &mut MdgGraph) {
        for edge_id in self.parameter_edges {
            let (from, to) = {
                let e = &graph.edges[edge_id];
                (e.from, e.to)
            };
            graph.nodes[from].out.retain(|&e| e != edge_id);
            graph.nodes[to].inc.retain(|&e| e != edge_id);
        }
        for mark in self.marks {
            graph.pollution_sinks.remove(&mark);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(graph: &mut MdgGraph, uid: &str, name: &str) -> NodeId {
        graph.add_node(
            uid,
            NodeKind::PdgObject,
            NodeAttrs {
                identifier_name: Some(name.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn uid_index_resolves_nodes() {
        let mut graph = MdgGraph::new();
        let a = obj(&mut graph, "n1", "a");
        assert_eq!(graph.node_by_uid("n1"), Some(a));
        assert_eq!(graph.node_by_uid("n2"), None);
    }

    #[test]
    fn kind_index_partitions_nodes() {
        let mut graph = MdgGraph::new();
        obj(&mut graph, "n1", "a");
        obj(&mut graph, "n2", "b");
        graph.add_node("s1", NodeKind::TaintSink, NodeAttrs::default());

        assert_eq!(graph.nodes_of_kind(&NodeKind::PdgObject).count(), 2);
        assert_eq!(graph.nodes_of_kind(&NodeKind::TaintSink).count(), 1);
        assert_eq!(graph.nodes_of_kind(&NodeKind::PdgCall).count(), 0);
    }

    #[test]
    fn adjacency_tracks_both_directions() {
        let mut graph = MdgGraph::new();
        let a = obj(&mut graph, "n1", "a");
        let b = obj(&mut graph, "n2", "b");
        graph.add_edge(a, b, EdgeRelation::Pdg(PdgRel::Dep), EdgeAttrs::default());

        assert_eq!(graph.outgoing(a).count(), 1);
        assert_eq!(graph.incoming(b).count(), 1);
        assert_eq!(graph.outgoing(b).count(), 0);
    }

    #[test]
    fn scratch_session_cleans_parameter_edges_and_marks() {
        let mut graph = MdgGraph::new();
        let arg = obj(&mut graph, "arg", "f.x-v1");
        let call = graph.add_node("call", NodeKind::PdgCall, NodeAttrs::default());
        let func = graph.add_node("func", NodeKind::VariableDeclarator, NodeAttrs::default());
        let param = obj(&mut graph, "param", "f.x-v1");
        graph.add_edge(
            arg,
            call,
            EdgeRelation::Pdg(PdgRel::Arg("x".to_string())),
            EdgeAttrs {
                identifier_name: Some("f.x-v1".to_string()),
                ..Default::default()
            },
        );
        graph.add_edge(call, func, EdgeRelation::Cg, EdgeAttrs::default());
        graph.add_edge(
            func,
            param,
            EdgeRelation::Ref(RefRole::Param),
            EdgeAttrs::default(),
        );

        let mut scratch = ScratchSession::begin();
        scratch.link_parameters(&mut graph);
        scratch.mark_pollution_sinks(&mut graph, &[param]);
        assert_eq!(graph.parameter_edge_count(), 1);
        assert!(graph.is_pollution_sink(param));

        scratch.finish(&mut graph);
        assert_eq!(graph.parameter_edge_count(), 0);
        assert_eq!(graph.pollution_sink_count(), 0);
    }

    #[test]
    fn linear_versioning_flags_merged_chains() {
        let mut graph = MdgGraph::new();
        let v1 = obj(&mut graph, "v1", "o");
        let v2 = obj(&mut graph, "v2", "o");
        let merged = obj(&mut graph, "v3", "o");
        graph.add_edge(v1, merged, EdgeRelation::Pdg(PdgRel::Nv), EdgeAttrs::default());
        assert!(graph.verify_linear_versioning().is_empty());

        graph.add_edge(v2, merged, EdgeRelation::Pdg(PdgRel::Nv), EdgeAttrs::default());
        assert_eq!(graph.verify_linear_versioning(), vec![merged]);
    }

    #[test]
    fn query_counter_is_monotonic() {
        let graph = MdgGraph::new();
        assert_eq!(graph.query_count(), 0);
        graph.note_query();
        graph.note_query();
        assert_eq!(graph.query_count(), 2);
    }
}
