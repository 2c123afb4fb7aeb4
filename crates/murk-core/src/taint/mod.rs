//! Call-graph taint propagation
//!
//! Decides, for an arbitrary and possibly cyclic call graph, whether a
//! call argument's taint can reach a callee's sink, without re-deriving
//! the inter-procedural flow for every sink query. A build phase
//! ([`TaintPropagator::process_cg`]) marks argument edges whose callees
//! propagate taint to their return, tags taint-reached parameters as
//! exported, and builds the transposed call graph; the query phase
//! ([`TaintPropagator::confirm_vulnerability`]) resolves a single
//! parameter with memoization and an owned visited set.

pub mod callgraph;

pub use callgraph::{CallGraph, CallSite, CallerBinding, TOP_LEVEL_CONTEXT};

use crate::graph::{
    EdgeId, EdgeRelation, EdgeSelector, MdgGraph, NodeId, NodeKind, PdgRel, Walk,
};
use crate::names::param_display_name;
use std::collections::{HashMap, HashSet};

/// Owns all propagation state for one analysis run. Independent top-level
/// queries call [`TaintPropagator::reset`] to clear the memo so unrelated
/// sink searches cannot contaminate each other.
#[derive(Debug, Default)]
pub struct TaintPropagator {
    cg: CallGraph,
    /// Parameter identifier -> "its taint reaches a return/sink".
    call_info: HashMap<String, bool>,
}

impl TaintPropagator {
    /// Build phase: single-pass reachability fixpoint over the call graph
    /// in post order (callees before callers).
    pub fn process_cg(graph: &mut MdgGraph) -> Self {
        // Receiver and undefined bindings never carry external taint
        // through an unresolved target.
        let trivial: Vec<EdgeId> = graph
            .edges()
            .filter(|e| {
                matches!(
                    e.relation.as_pdg().and_then(PdgRel::arg_name),
                    Some("this") | Some("undefined")
                )
            })
            .map(|e| e.id)
            .collect();
        for edge in trivial {
            graph.edge_mut(edge).valid = true;
        }

        let cg = CallGraph::collect(graph);

        for function in cg.post_order() {
            if !Self::params_reach_return(graph, &cg, function) {
                continue;
            }
            let arg_edges: Vec<EdgeId> = cg
                .calls_into(function)
                .iter()
                .flat_map(|&call| graph.incoming(call))
                .filter(|e| matches!(e.relation, EdgeRelation::Pdg(PdgRel::Arg(_))))
                .map(|e| e.id)
                .collect();
            for edge in arg_edges {
                graph.edge_mut(edge).valid = true;
            }
        }

        // Parameters fed by a taint source need no further confirmation.
        let tainted: Vec<NodeId> = graph
            .nodes_of_kind(&NodeKind::TaintSource)
            .flat_map(|source| {
                graph.targets_where(source, |e| e.relation == EdgeRelation::Pdg(PdgRel::Taint))
            })
            .collect();
        for node in tainted {
            graph.node_mut(node).is_exported = true;
        }

        let mut propagator = Self {
            cg,
            call_info: HashMap::new(),
        };
        propagator.build_transpose(graph);
        propagator
    }

    /// Whether any parameter of `function` reaches a `PDG_RETURN` through
    /// non-`ARG`-or-valid edges.
    fn params_reach_return(graph: &MdgGraph, cg: &CallGraph, function: NodeId) -> bool {
        let walk = Walk::one_or_more(EdgeSelector::unbroken_pdg());
        cg.params(graph, function)
            .into_iter()
            .any(|param| walk.reaches(graph, param, |n| n.kind == NodeKind::PdgReturn))
    }

    /// Record, per callee parameter, the caller-side argument objects bound
    /// at each call site.
    fn build_transpose(&mut self, graph: &MdgGraph) {
        let mut bindings: Vec<(NodeId, CallerBinding)> = Vec::new();
        for caller in self.cg.callers().collect::<Vec<_>>() {
            for site in self.cg.call_sites(caller).to_vec() {
                for edge in graph.incoming(site.call) {
                    let Some(name) = edge.relation.as_pdg().and_then(PdgRel::arg_name) else {
                        continue;
                    };
                    bindings.push((
                        site.callee,
                        CallerBinding {
                            caller,
                            call: site.call,
                            callee_param: name.to_string(),
                            bound_identifier: edge.name().to_string(),
                            arg: edge.from,
                            arg_exported: graph.node(edge.from).is_exported,
                        },
                    ));
                }
            }
        }
        for (callee, binding) in bindings {
            self.cg.add_binding(callee, binding);
        }
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.cg
    }

    /// Clear the memo between independent top-level taint queries.
    pub fn reset(&mut self) {
        self.call_info.clear();
    }

    /// Whether taint can flow from some caller of `function` into `param`.
    ///
    /// Terminates on any finite call graph including self and mutual
    /// recursion: every recursive step hits the memo, hits an exported
    /// parameter, or shrinks the unvisited parameter-name frontier.
    pub fn confirm_vulnerability(
        &mut self,
        graph: &MdgGraph,
        function: NodeId,
        param: NodeId,
    ) -> bool {
        let mut visited = HashSet::new();
        self.confirm_inner(graph, function, param, &mut visited).0
    }

    /// Returns `(confirmed, cut)`; `cut` marks a result produced under a
    /// cycle cut, which must not populate the memo.
    fn confirm_inner(
        &mut self,
        graph: &MdgGraph,
        function: NodeId,
        param: NodeId,
        visited: &mut HashSet<String>,
    ) -> (bool, bool) {
        if graph.node(param).is_exported {
            return (true, false);
        }
        let key = graph.node(param).name().to_string();
        if let Some(&cached) = self.call_info.get(&key) {
            return (cached, false);
        }
        if !visited.insert(key.clone()) {
            return (false, true);
        }

        let simple = param_display_name(&key);
        let walk = Walk::zero_or_more(EdgeSelector::unbroken_pdg());
        let mut confirmed = false;
        let mut cut = false;

        let bindings: Vec<CallerBinding> = self
            .cg
            .bindings(function)
            .iter()
            .filter(|b| b.callee_param == simple || b.bound_identifier == key)
            .cloned()
            .collect();
        'search: for binding in bindings {
            if binding.arg_exported || graph.node(binding.arg).is_exported {
                confirmed = true;
                break;
            }
            for caller_param in self.cg.params(graph, binding.caller) {
                if !walk.reaches(graph, caller_param, |n| n.id == binding.arg) {
                    continue;
                }
                let (ok, was_cut) =
                    self.confirm_inner(graph, binding.caller, caller_param, visited);
                cut |= was_cut;
                if ok {
                    confirmed = true;
                    break 'search;
                }
            }
        }

        visited.remove(&key);
        // The memo is filled only once a subtree fully resolves; a false
        // produced under a cycle cut is not a resolved answer.
        if confirmed {
            self.call_info.insert(key, true);
        } else if !cut {
            self.call_info.insert(key, false);
        }
        (confirmed, cut && !confirmed)
    }
}
