//! Call graph extracted from the MDG
//!
//! Functions are their declaring nodes (`VariableDeclarator` holding a
//! function expression); call sites are `PDG_CALL` nodes joined to callee
//! declarations by `CG` edges. Containment is resolved through the
//! `FunctionContext` attribute and `FD` (function-definition) edges.

use crate::graph::{EdgeRelation, MdgGraph, NodeId, NodeKind, RefRole};
use std::collections::HashMap;

/// Uid of the synthetic top-level function context.
pub const TOP_LEVEL_CONTEXT: &str = "__main__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// The `PDG_CALL` node.
    pub call: NodeId,
    /// The callee's declaring node.
    pub callee: NodeId,
}

/// One caller-side argument binding of a callee parameter, recorded in the
/// transposed call graph.
#[derive(Debug, Clone)]
pub struct CallerBinding {
    pub caller: NodeId,
    pub call: NodeId,
    /// Parameter name carried by the `ARG(name)` relation.
    pub callee_param: String,
    /// Versioned identifier the argument is bound under.
    pub bound_identifier: String,
    /// The argument's PDG object in the caller.
    pub arg: NodeId,
    pub arg_exported: bool,
}

#[derive(Debug, Default)]
pub struct CallGraph {
    /// Caller declaration -> call sites in its body.
    calls: HashMap<NodeId, Vec<CallSite>>,
    /// Callee declaration -> `PDG_CALL` nodes invoking it.
    incoming: HashMap<NodeId, Vec<NodeId>>,
    /// Callee declaration -> caller-side argument bindings (the transpose).
    transpose: HashMap<NodeId, Vec<CallerBinding>>,
    /// `CFG_F_START` uid -> owning declaration.
    fd_owner: HashMap<String, NodeId>,
}

impl CallGraph {
    /// Collect call sites, containment and the reverse call index.
    /// The transpose is filled later by the propagator, once argument
    /// validity is known.
    pub fn collect(graph: &MdgGraph) -> Self {
        let mut cg = CallGraph::default();

        for node in graph.nodes() {
            for edge in graph.outgoing(node.id) {
                if edge.relation == EdgeRelation::Fd {
                    cg.fd_owner
                        .insert(graph.node(edge.to).uid.clone(), node.id);
                }
            }
        }

        for call in graph.nodes_of_kind(&NodeKind::PdgCall) {
            let caller = cg.enclosing_function(graph, call);
            for edge in graph.outgoing(call) {
                if edge.relation != EdgeRelation::Cg {
                    continue;
                }
                let callee = edge.to;
                cg.incoming.entry(callee).or_default().push(call);
                if let Some(caller) = caller {
                    cg.calls
                        .entry(caller)
                        .or_default()
                        .push(CallSite { call, callee });
                }
            }
        }
        cg
    }

    /// Declaration of the function whose body contains `node`, resolved
    /// through `FunctionContext`. Top-level nodes have none.
    pub fn enclosing_function(&self, graph: &MdgGraph, node: NodeId) -> Option<NodeId> {
        let context = graph.node(node).function_context.as_deref()?;
        if context == TOP_LEVEL_CONTEXT {
            return None;
        }
        self.fd_owner.get(context).copied()
    }

    /// Whether `node` sits in the top-level scope of the program.
    pub fn is_top_level(&self, graph: &MdgGraph, node: NodeId) -> bool {
        match graph.node(node).function_context.as_deref() {
            Some(context) => {
                context == TOP_LEVEL_CONTEXT
                    || self
                        .cfg_identifier(graph, context)
                        .is_some_and(|name| name == TOP_LEVEL_CONTEXT)
            }
            None => true,
        }
    }

    fn cfg_identifier<'a>(&self, graph: &'a MdgGraph, cfg_uid: &str) -> Option<&'a str> {
        let cfg = graph.node_by_uid(cfg_uid)?;
        graph.node(cfg).identifier_name.as_deref()
    }

    pub fn call_sites(&self, caller: NodeId) -> &[CallSite] {
        self.calls.get(&caller).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn callers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.calls.keys().copied()
    }

    /// `PDG_CALL` nodes that invoke `callee`.
    pub fn calls_into(&self, callee: NodeId) -> &[NodeId] {
        self.incoming.get(&callee).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bindings(&self, callee: NodeId) -> &[CallerBinding] {
        self.transpose
            .get(&callee)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn add_binding(&mut self, callee: NodeId, binding: CallerBinding) {
        self.transpose.entry(callee).or_default().push(binding);
    }

    /// Parameter objects of a declaration, in declared order. The `this`
    /// receiver binding is excluded.
    pub fn params(&self, graph: &MdgGraph, decl: NodeId) -> Vec<NodeId> {
        let mut params: Vec<(u32, NodeId)> = graph
            .outgoing(decl)
            .filter(|e| {
                e.relation.is_ref(RefRole::Param) && e.param_index.as_deref() != Some("this")
            })
            .map(|e| {
                let index = e
                    .param_index
                    .as_deref()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(u32::MAX);
                (index, e.to)
            })
            .collect();
        params.sort_by_key(|&(index, _)| index);
        params.into_iter().map(|(_, id)| id).collect()
    }

    /// Post-order over the call graph: callees before their callers.
    /// Cycle-safe; each declaration appears once.
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut root_set = std::collections::HashSet::new();
        let mut roots: Vec<NodeId> = Vec::new();
        for &root in self.calls.keys().chain(self.incoming.keys()) {
            if root_set.insert(root) {
                roots.push(root);
            }
        }

        for root in roots {
            if visited.contains(&root) {
                continue;
            }
            let mut stack: Vec<(NodeId, bool)> = vec![(root, false)];
            while let Some((node, expanded)) = stack.pop() {
                if expanded {
                    order.push(node);
                    continue;
                }
                if !visited.insert(node) {
                    continue;
                }
                stack.push((node, true));
                for site in self.call_sites(node) {
                    if !visited.contains(&site.callee) {
                        stack.push((site.callee, false));
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeAttrs, NodeAttrs};

    fn decl(graph: &mut MdgGraph, uid: &str, cfg_uid: &str) -> NodeId {
        let decl = graph.add_node(
            uid,
            NodeKind::VariableDeclarator,
            NodeAttrs {
                identifier_name: Some(uid.to_string()),
                ..Default::default()
            },
        );
        let cfg = graph.add_node(cfg_uid, NodeKind::CfgFunctionStart, NodeAttrs::default());
        graph.add_edge(decl, cfg, EdgeRelation::Fd, EdgeAttrs::default());
        decl
    }

    fn call(graph: &mut MdgGraph, uid: &str, context: &str, callee: NodeId) -> NodeId {
        let call = graph.add_node(
            uid,
            NodeKind::PdgCall,
            NodeAttrs {
                function_context: Some(context.to_string()),
                ..Default::default()
            },
        );
        graph.add_edge(call, callee, EdgeRelation::Cg, EdgeAttrs::default());
        call
    }

    #[test]
    fn collects_call_sites_with_containment() {
        let mut graph = MdgGraph::new();
        let f = decl(&mut graph, "f", "cfg_f");
        let g = decl(&mut graph, "g", "cfg_g");
        let site = call(&mut graph, "c1", "cfg_f", g);

        let cg = CallGraph::collect(&graph);
        assert_eq!(cg.call_sites(f), &[CallSite { call: site, callee: g }]);
        assert_eq!(cg.calls_into(g), &[site]);
        assert_eq!(cg.enclosing_function(&graph, site), Some(f));
    }

    #[test]
    fn post_order_places_callees_first() {
        let mut graph = MdgGraph::new();
        let f = decl(&mut graph, "f", "cfg_f");
        let g = decl(&mut graph, "g", "cfg_g");
        let h = decl(&mut graph, "h", "cfg_h");
        call(&mut graph, "c1", "cfg_f", g);
        call(&mut graph, "c2", "cfg_g", h);

        let cg = CallGraph::collect(&graph);
        let order = cg.post_order();
        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(h) < pos(g));
        assert!(pos(g) < pos(f));
    }

    #[test]
    fn post_order_handles_mutual_recursion() {
        let mut graph = MdgGraph::new();
        let f = decl(&mut graph, "f", "cfg_f");
        let g = decl(&mut graph, "g", "cfg_g");
        call(&mut graph, "c1", "cfg_f", g);
        call(&mut graph, "c2", "cfg_g", f);

        let cg = CallGraph::collect(&graph);
        let order = cg.post_order();
        assert_eq!(order.len(), 2);
        assert!(order.contains(&f));
        assert!(order.contains(&g));
    }

    #[test]
    fn params_are_ordered_and_skip_this() {
        let mut graph = MdgGraph::new();
        let f = decl(&mut graph, "f", "cfg_f");
        let param = |graph: &mut MdgGraph, uid: &str, index: &str| {
            let p = graph.add_node(uid, NodeKind::PdgObject, NodeAttrs::default());
            graph.add_edge(
                f,
                p,
                EdgeRelation::Ref(RefRole::Param),
                EdgeAttrs {
                    param_index: Some(index.to_string()),
                    ..Default::default()
                },
            );
            p
        };
        let b = param(&mut graph, "b", "2");
        let a = param(&mut graph, "a", "1");
        param(&mut graph, "self", "this");

        let cg = CallGraph::collect(&graph);
        assert_eq!(cg.params(&graph, f), vec![a, b]);
    }

    #[test]
    fn top_level_context_has_no_enclosing_function() {
        let mut graph = MdgGraph::new();
        let g = decl(&mut graph, "g", "cfg_g");
        let site = call(&mut graph, "c1", TOP_LEVEL_CONTEXT, g);

        let cg = CallGraph::collect(&graph);
        assert_eq!(cg.enclosing_function(&graph, site), None);
        assert!(cg.is_top_level(&graph, site));
    }
}
