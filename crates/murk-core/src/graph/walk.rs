//! Typed graph traversal
//!
//! The engine never builds query strings: traversals are described by
//! [`EdgeSelector`] combinators (which edge relations a step may follow,
//! whether `ARG` edges are gated on validity, wildcard requirements) and
//! executed by [`Walk`] with a hop range. Reachability runs over an owned
//! visited set; path materialization keeps a per-path cycle guard and a
//! hard bound, so cyclic graphs are never an error.

use super::{Edge, EdgeId, EdgeRelation, MdgGraph, Node, NodeId, PdgRel};
use std::collections::{HashSet, VecDeque};

/// Upper bound on materialized paths per query; beyond it the walk stops
/// and logs, rather than exhausting memory on pathological graphs.
const MAX_PATHS: usize = 4096;
/// Upper bound on path length when no explicit maximum is given.
const MAX_HOPS: usize = 64;

/// How a traversal step treats `ARG` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgPolicy {
    /// `ARG` edges are never followed.
    #[default]
    Exclude,
    /// `ARG` edges are followed only when marked valid by the propagator.
    ValidOnly,
    /// `ARG` edges are always followed.
    Any,
}

/// Admissible edges for one traversal step.
#[derive(Debug, Clone, Default)]
pub struct EdgeSelector {
    so: bool,
    nv: bool,
    dep: bool,
    ret: bool,
    taint: bool,
    arg: ArgPolicy,
    parameter: bool,
    wildcard_only: bool,
}

impl EdgeSelector {
    /// Every PDG relation, `ARG` included.
    pub fn pdg_all() -> Self {
        Self {
            so: true,
            nv: true,
            dep: true,
            ret: true,
            taint: true,
            arg: ArgPolicy::Any,
            ..Default::default()
        }
    }

    /// Every PDG relation, with `ARG` edges gated on the validity flag:
    /// the alphabet of an unbroken inter-procedural flow.
    pub fn unbroken_pdg() -> Self {
        Self {
            arg: ArgPolicy::ValidOnly,
            ..Self::pdg_all()
        }
    }

    /// `{SO, ARG, DEP}`: the alphabet of the pollution taint-path checks.
    pub fn taint_step() -> Self {
        Self {
            so: true,
            dep: true,
            arg: ArgPolicy::Any,
            ..Default::default()
        }
    }

    /// Every PDG relation except `ARG`: intra-procedural reconstruction.
    pub fn recon_step() -> Self {
        Self {
            arg: ArgPolicy::Exclude,
            ..Self::pdg_all()
        }
    }

    /// Wildcard sub-object lookups (`SO` with `IdentifierName = "*"`).
    pub fn so_wildcard() -> Self {
        Self {
            so: true,
            wildcard_only: true,
            ..Default::default()
        }
    }

    /// Wildcard new-version edges (`NV` with `IdentifierName = "*"`).
    pub fn nv_wildcard() -> Self {
        Self {
            nv: true,
            wildcard_only: true,
            ..Default::default()
        }
    }

    /// Argument bindings across call boundaries: `ARG` edges and transient
    /// `PARAMETER` shortcuts.
    pub fn call_binding() -> Self {
        Self {
            arg: ArgPolicy::Any,
            parameter: true,
            ..Default::default()
        }
    }

    /// Transient `PARAMETER` shortcut edges only.
    pub fn parameter() -> Self {
        Self {
            parameter: true,
            ..Default::default()
        }
    }

    /// Also follow transient `PARAMETER` edges.
    pub fn with_parameter_edges(mut self) -> Self {
        self.parameter = true;
        self
    }

    pub fn matches(&self, edge: &Edge) -> bool {
        if self.wildcard_only && !edge.is_wildcard() {
            return false;
        }
        match &edge.relation {
            EdgeRelation::Pdg(PdgRel::So) => self.so,
            EdgeRelation::Pdg(PdgRel::Nv) => self.nv,
            EdgeRelation::Pdg(PdgRel::Dep) => self.dep,
            EdgeRelation::Pdg(PdgRel::Ret) => self.ret,
            EdgeRelation::Pdg(PdgRel::Taint) => self.taint,
            EdgeRelation::Pdg(PdgRel::Arg(_)) => match self.arg {
                ArgPolicy::Exclude => false,
                ArgPolicy::ValidOnly => edge.valid,
                ArgPolicy::Any => true,
            },
            EdgeRelation::Parameter => self.parameter,
            _ => false,
        }
    }
}

/// A materialized traversal result: the visited nodes and the edges taken,
/// innermost first. A zero-hop path holds the start node and no edges.
#[derive(Debug, Clone)]
pub struct Path {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<EdgeId>,
}

impl Path {
    pub fn end(&self) -> NodeId {
        *self.nodes.last().expect("path holds at least its start node")
    }

    pub fn hops(&self) -> usize {
        self.edges.len()
    }
}

/// A variable-length traversal: selector plus hop range.
#[derive(Debug, Clone)]
pub struct Walk {
    selector: EdgeSelector,
    min: usize,
    max: usize,
}

impl Walk {
    /// `*1..` — at least one hop.
    pub fn one_or_more(selector: EdgeSelector) -> Self {
        Self {
            selector,
            min: 1,
            max: MAX_HOPS,
        }
    }

    /// `*0..` — the start node itself is a candidate endpoint.
    pub fn zero_or_more(selector: EdgeSelector) -> Self {
        Self {
            selector,
            min: 0,
            max: MAX_HOPS,
        }
    }

    /// `*min..=max`.
    pub fn range(selector: EdgeSelector, min: usize, max: usize) -> Self {
        Self { selector, min, max }
    }

    /// Whether some node satisfying `pred` is reachable within the hop
    /// range. Cycle-safe via an owned visited set.
    pub fn reaches<F>(&self, graph: &MdgGraph, from: NodeId, pred: F) -> bool
    where
        F: Fn(&Node) -> bool,
    {
        graph.note_query();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<(NodeId, usize)> = vec![(from, 0)];
        while let Some((node, depth)) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if depth >= self.min && pred(graph.node(node)) {
                return true;
            }
            if depth >= self.max {
                continue;
            }
            for edge in graph.outgoing(node) {
                if self.selector.matches(edge) {
                    stack.push((edge.to, depth + 1));
                }
            }
        }
        false
    }

    /// All distinct endpoints satisfying `pred`, in first-reached order.
    pub fn targets<F>(&self, graph: &MdgGraph, from: NodeId, pred: F) -> Vec<NodeId>
    where
        F: Fn(&Node) -> bool,
    {
        graph.note_query();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut found = Vec::new();
        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
        queue.push_back((from, 0));
        while let Some((node, depth)) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            if depth >= self.min && pred(graph.node(node)) {
                found.push(node);
            }
            if depth >= self.max {
                continue;
            }
            for edge in graph.outgoing(node) {
                if self.selector.matches(edge) {
                    queue.push_back((edge.to, depth + 1));
                }
            }
        }
        found
    }

    /// All simple paths to endpoints satisfying `pred`, shortest first.
    /// Bounded by [`MAX_PATHS`]; the bound being hit is logged, never an
    /// error.
    pub fn paths<F>(&self, graph: &MdgGraph, from: NodeId, pred: F) -> Vec<Path>
    where
        F: Fn(&Node) -> bool,
    {
        graph.note_query();
        let mut results = Vec::new();
        let mut queue: VecDeque<Path> = VecDeque::new();
        queue.push_back(Path {
            nodes: vec![from],
            edges: Vec::new(),
        });
        while let Some(path) = queue.pop_front() {
            let tip = path.end();
            if path.hops() >= self.min && pred(graph.node(tip)) {
                results.push(path.clone());
                if results.len() >= MAX_PATHS {
                    tracing::warn!(limit = MAX_PATHS, "path enumeration truncated");
                    break;
                }
            }
            if path.hops() >= self.max {
                continue;
            }
            for edge in graph.outgoing(tip) {
                if self.selector.matches(edge) && !path.nodes.contains(&edge.to) {
                    let mut next = path.clone();
                    next.nodes.push(edge.to);
                    next.edges.push(edge.id);
                    queue.push_back(next);
                }
            }
        }
        results
    }
}
