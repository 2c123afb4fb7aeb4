//! Attacker-controlled-data reconstruction
//!
//! For a confirmed-tainted entry function, rebuild the nested shape of each
//! parameter — which sub-properties the program exercises — and assign every
//! leaf a JavaScript type. The build is two explicit passes: a structural
//! skeleton keyed by property name tracking the underlying PDG node ids,
//! then a resolution pass turning each position into a [`TypeNode`].

pub mod assign;
pub mod simplify;
pub mod types;

pub use types::{TypeNode, TypeSet};

use crate::config::Config;
use crate::graph::{
    AstRole, EdgeRelation, EdgeSelector, MdgGraph, NodeId, NodeKind, Path, PdgRel, RefRole, Walk,
};
use crate::names::param_display_name;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Structural skeleton of one parameter position: the PDG nodes standing
/// for it (several, after versioning) and the properties reached from it.
#[derive(Debug, Default, Clone)]
pub struct ShapeNode {
    pub ids: BTreeSet<String>,
    pub children: BTreeMap<String, ShapeNode>,
}

/// Vulnerability-specific context for one reconstruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconContext<'a> {
    pub vuln_type: &'a str,
    pub polluted_object: Option<NodeId>,
    pub polluting_value: Option<NodeId>,
}

/// Reconstruct the parameter shapes of `function` and assign types.
/// Returns the tainted parameter names and the resolved type tree.
pub fn reconstruct_param_types(
    graph: &MdgGraph,
    function: NodeId,
    cx: ReconContext<'_>,
    config: &Config,
) -> (Vec<String>, TypeNode) {
    let shapes = build_shapes(graph, function);
    let mut resolved: BTreeMap<String, TypeNode> = shapes
        .iter()
        .map(|(name, shape)| {
            (
                name.clone(),
                resolve_shape(graph, config, name, shape, cx.vuln_type),
            )
        })
        .collect();

    if cx.vuln_type == "prototype-pollution" {
        apply_pollution_specials(graph, config, &mut resolved, cx);
    }

    let names = resolved.keys().cloned().collect();
    (names, TypeNode::Object(resolved))
}

/// First pass: fold every reconstruction path into the skeleton.
fn build_shapes(graph: &MdgGraph, function: NodeId) -> BTreeMap<String, ShapeNode> {
    let mut shapes = BTreeMap::new();
    let params = ordered_params(graph, function);

    let direct = Walk::zero_or_more(EdgeSelector::recon_step());
    for &param in &params {
        let display = param_display_name(graph.node(param).name());
        if display == "this" {
            continue;
        }
        let paths = direct.paths(graph, param, |n| {
            matches!(n.kind, NodeKind::PdgObject | NodeKind::TaintSink)
        });
        for path in paths {
            fold_path(graph, &mut shapes, &display, param, &path);
        }
    }

    // Logical-expression default assignments (`x = x.a && x.a.b`) hide the
    // dependency behind an `ARG`/`DEP` hop the direct walk cannot take.
    let onward = Walk::one_or_more(EdgeSelector::recon_step());
    for &param in &params {
        let display = param_display_name(graph.node(param).name());
        if display == "this" {
            continue;
        }
        for new_obj in logical_expression_objects(graph, param) {
            for path in onward.paths(graph, new_obj, |n| n.kind == NodeKind::PdgObject) {
                fold_path(graph, &mut shapes, &display, param, &path);
            }
        }
    }
    shapes
}

/// Parameter objects of the function, in `ParamIndex` order, receiver
/// binding excluded.
fn ordered_params(graph: &MdgGraph, function: NodeId) -> Vec<NodeId> {
    let mut params: Vec<(u32, NodeId)> = graph
        .outgoing(function)
        .filter(|e| e.relation.is_ref(RefRole::Param) && e.param_index.as_deref() != Some("this"))
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

/// Fold one path into the skeleton. The first path of a parameter (its
/// zero-hop path) registers the parameter itself; longer paths descend
/// through `SO` edges while in structure mode and accumulate node ids once
/// a `DEP` edge switches the fold to dependency mode.
fn fold_path(
    graph: &MdgGraph,
    shapes: &mut BTreeMap<String, ShapeNode>,
    display: &str,
    param: NodeId,
    path: &Path,
) {
    if !shapes.contains_key(display) {
        let mut shape = ShapeNode::default();
        shape.ids.insert(graph.node(param).uid.clone());
        shapes.insert(display.to_string(), shape);
        return;
    }

    let mut cursor = shapes.get_mut(display).expect("present above");
    let mut structural = true;
    for &edge_id in &path.edges {
        let edge = graph.edge(edge_id);
        let target_uid = graph.node(edge.to).uid.clone();
        match &edge.relation {
            EdgeRelation::Pdg(PdgRel::So) if structural => {
                let prop = edge.name().to_string();
                cursor = cursor.children.entry(prop).or_default();
                cursor.ids.insert(target_uid);
            }
            EdgeRelation::Pdg(PdgRel::Dep) => {
                structural = false;
                cursor.ids.insert(target_uid);
            }
            _ => {}
        }
    }
}

/// Objects assigned from a logical expression that the parameter feeds
/// through `DEP` or `ARG`-then-`DEP` (one or two hops).
fn logical_expression_objects(graph: &MdgGraph, param: NodeId) -> Vec<NodeId> {
    let walk = Walk::range(EdgeSelector::pdg_all(), 1, 2);
    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for path in walk.paths(graph, param, |n| n.kind == NodeKind::PdgObject) {
        let relations: Vec<&EdgeRelation> = path
            .edges
            .iter()
            .map(|&e| &graph.edge(e).relation)
            .collect();
        let shape_matches = match relations.as_slice() {
            [EdgeRelation::Pdg(PdgRel::Dep)] => true,
            [EdgeRelation::Pdg(PdgRel::Arg(_)), EdgeRelation::Pdg(PdgRel::Dep)] => true,
            _ => false,
        };
        if !shape_matches {
            continue;
        }
        let new_obj = path.end();
        if seen.insert(new_obj) && is_logical_assignment_result(graph, new_obj) {
            results.push(new_obj);
        }
    }
    results
}

/// The object is written by an `ExpressionStatement` whose assignment's
/// right-hand side is a `LogicalExpression`.
fn is_logical_assignment_result(graph: &MdgGraph, obj: NodeId) -> bool {
    graph
        .sources_where(obj, |e| matches!(e.relation, EdgeRelation::Ref(_)))
        .filter(|&stmt| graph.node(stmt).kind == NodeKind::ExpressionStatement)
        .any(|stmt| {
            graph
                .targets_where(stmt, |e| matches!(e.relation, EdgeRelation::Ast(_)))
                .filter(|&n| graph.node(n).kind == NodeKind::AssignmentExpression)
                .any(|assignment| {
                    graph
                        .targets_where(assignment, |e| {
                            e.relation.is_ast(&AstRole::Right)
                        })
                        .any(|rhs| graph.node(rhs).kind == NodeKind::LogicalExpression)
                })
        })
}

/// Second pass: resolve one skeleton position into a type node.
fn resolve_shape(
    graph: &MdgGraph,
    config: &Config,
    key: &str,
    shape: &ShapeNode,
    vuln_type: &str,
) -> TypeNode {
    if shape.children.is_empty() {
        return assign::assign_type(graph, config, key, &shape.ids);
    }
    let resolved: BTreeMap<String, TypeNode> = shape
        .children
        .iter()
        .map(|(name, child)| {
            (
                name.clone(),
                resolve_shape(graph, config, name, child, vuln_type),
            )
        })
        .collect();
    let has_length = resolved.contains_key("length");
    let node = TypeNode::Object(resolved);
    // A `length` read outside pollution reconstruction widens the position:
    // it may as well be a string or an array.
    if vuln_type != "prototype-pollution" && has_length {
        TypeNode::Union(vec![
            node,
            TypeNode::single("string"),
            TypeNode::single("array"),
        ])
    } else {
        node
    }
}

/// Pollution records do not infer the polluted object and polluting value
/// structurally: their shape is attacker-defined. Two supplements recover
/// values the skeleton missed — the `arguments`-object fallback and
/// widening through call-return dependencies.
fn apply_pollution_specials(
    graph: &MdgGraph,
    config: &Config,
    resolved: &mut BTreeMap<String, TypeNode>,
    cx: ReconContext<'_>,
) {
    let polluted_name = cx
        .polluted_object
        .map(|n| param_display_name(graph.node(n).name()));
    let mut polluting_names: Vec<String> = Vec::new();

    if let Some(value) = cx.polluting_value {
        let value_name = param_display_name(graph.node(value).name());
        if !resolved.contains_key(&value_name) {
            if let Some(param_name) = arguments_fallback(graph, value) {
                resolved.insert(
                    param_name,
                    TypeNode::union_of(&["polluted_object2", "polluted_object3"]),
                );
            }
            for dep in value_dependencies(graph, value) {
                let name = param_display_name(graph.node(dep).name());
                if resolved.contains_key(&name) && polluted_name.as_deref() != Some(name.as_str())
                {
                    polluting_names.push(name);
                }
            }
        }
        polluting_names.push(value_name);
    }

    simplify::simplify_objects(resolved, config, polluted_name.as_deref(), &polluting_names);
}

/// A polluting value reached from the `arguments` object's wildcard binding
/// maps back to the parameter the call actually bound.
fn arguments_fallback(graph: &MdgGraph, value: NodeId) -> Option<String> {
    let onward = Walk::zero_or_more(EdgeSelector::recon_step());
    for args_obj in graph.nodes_of_kind(&NodeKind::PdgObject) {
        if !graph.node(args_obj).name().contains("arguments-") {
            continue;
        }
        for spread in graph
            .outgoing(args_obj)
            .filter(|e| e.relation.is_pdg() && e.is_wildcard())
        {
            for arg_obj in onward.targets(graph, spread.to, |n| n.kind == NodeKind::PdgObject) {
                for arg_edge in graph
                    .outgoing(arg_obj)
                    .filter(|e| matches!(e.relation, EdgeRelation::Pdg(PdgRel::Arg(_))))
                {
                    for callee in
                        graph.targets_where(arg_edge.to, |e| e.relation == EdgeRelation::Cg)
                    {
                        for param in graph
                            .targets_where(callee, |e| e.relation.is_ref(RefRole::Param))
                            .collect::<Vec<_>>()
                        {
                            if onward.reaches(graph, param, |n| n.id == value) {
                                return Some(param_display_name(graph.node(param).name()));
                            }
                        }
                    }
                }
            }
        }
    }
    None
}

/// Arguments of the call whose return value is the polluting value.
fn value_dependencies(graph: &MdgGraph, value: NodeId) -> Vec<NodeId> {
    let mut dependencies = Vec::new();
    for call in graph.sources_where(value, |e| e.relation == EdgeRelation::Pdg(PdgRel::Ret)) {
        if graph.node(call).kind != NodeKind::PdgCall {
            continue;
        }
        dependencies.extend(
            graph.sources_where(call, |e| matches!(e.relation, EdgeRelation::Pdg(PdgRel::Arg(_)))),
        );
    }
    dependencies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeAttrs, NodeAttrs};

    struct Fixture {
        graph: MdgGraph,
        function: NodeId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut graph = MdgGraph::new();
            let function = graph.add_node(
                "f",
                NodeKind::VariableDeclarator,
                NodeAttrs {
                    identifier_name: Some("f".to_string()),
                    ..Default::default()
                },
            );
            Self { graph, function }
        }

        fn param(&mut self, name: &str, index: u32) -> NodeId {
            let p = self.graph.add_node(
                format!("p_{name}"),
                NodeKind::PdgObject,
                NodeAttrs {
                    identifier_name: Some(format!("f.{name}-v1")),
                    ..Default::default()
                },
            );
            self.graph.add_edge(
                self.function,
                p,
                EdgeRelation::Ref(RefRole::Param),
                EdgeAttrs {
                    param_index: Some(index.to_string()),
                    ..Default::default()
                },
            );
            p
        }

        fn property(&mut self, of: NodeId, prop: &str, uid: &str) -> NodeId {
            let node = self.graph.add_node(
                uid,
                NodeKind::PdgObject,
                NodeAttrs {
                    identifier_name: Some(uid.to_string()),
                    ..Default::default()
                },
            );
            self.graph.add_edge(
                of,
                node,
                EdgeRelation::Pdg(PdgRel::So),
                EdgeAttrs {
                    identifier_name: Some(prop.to_string()),
                    ..Default::default()
                },
            );
            node
        }

        fn reconstruct(&self) -> (Vec<String>, TypeNode) {
            reconstruct_param_types(
                &self.graph,
                self.function,
                ReconContext {
                    vuln_type: "code-injection",
                    ..Default::default()
                },
                &Config::builtin(),
            )
        }
    }

    #[test]
    fn flat_parameter_resolves_to_any() {
        let mut fx = Fixture::new();
        fx.param("x", 1);
        let (names, tree) = fx.reconstruct();
        assert_eq!(names, vec!["x"]);
        assert_eq!(tree.as_object().unwrap()["x"], TypeNode::any());
    }

    #[test]
    fn property_lookups_build_nested_structure() {
        let mut fx = Fixture::new();
        let req = fx.param("req", 1);
        let body = fx.property(req, "body", "req_body");
        fx.property(body, "name", "req_body_name");

        let (_, tree) = fx.reconstruct();
        let req_node = tree.as_object().unwrap()["req"].as_object().unwrap();
        let body_node = req_node["body"].as_object().unwrap();
        assert!(body_node.contains_key("name"));
    }

    #[test]
    fn receiver_binding_is_skipped() {
        let mut fx = Fixture::new();
        let this = fx.graph.add_node(
            "p_this",
            NodeKind::PdgObject,
            NodeAttrs {
                identifier_name: Some("f.this-v1".to_string()),
                ..Default::default()
            },
        );
        fx.graph.add_edge(
            fx.function,
            this,
            EdgeRelation::Ref(RefRole::Param),
            EdgeAttrs {
                param_index: Some("this".to_string()),
                ..Default::default()
            },
        );
        fx.param("x", 1);

        let (names, _) = fx.reconstruct();
        assert_eq!(names, vec!["x"]);
    }

    #[test]
    fn length_lookup_widens_outside_pollution() {
        let mut fx = Fixture::new();
        let p = fx.param("data", 1);
        fx.property(p, "length", "data_len");

        let (_, tree) = fx.reconstruct();
        let data = &tree.as_object().unwrap()["data"];
        match data {
            TypeNode::Union(items) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(items[0], TypeNode::Object(_)));
                assert_eq!(items[1], TypeNode::single("string"));
                assert_eq!(items[2], TypeNode::single("array"));
            }
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn logical_expression_stream_extends_the_skeleton() {
        // x = x.a && x.a.b : the parameter feeds new_obj through DEP, the
        // statement's assignment right-hand side is a logical expression.
        let mut fx = Fixture::new();
        let x = fx.param("x", 1);
        let new_obj = fx.graph.add_node(
            "new_obj",
            NodeKind::PdgObject,
            NodeAttrs {
                identifier_name: Some("f.x-v2".to_string()),
                ..Default::default()
            },
        );
        fx.graph.add_edge(
            x,
            new_obj,
            EdgeRelation::Pdg(PdgRel::Dep),
            EdgeAttrs::default(),
        );
        fx.property(new_obj, "a", "x_a");

        let stmt = fx.graph.add_node(
            "stmt",
            NodeKind::ExpressionStatement,
            NodeAttrs::default(),
        );
        fx.graph.add_edge(
            stmt,
            new_obj,
            EdgeRelation::Ref(RefRole::Obj),
            EdgeAttrs::default(),
        );
        let assignment = fx.graph.add_node(
            "assign",
            NodeKind::AssignmentExpression,
            NodeAttrs::default(),
        );
        fx.graph.add_edge(
            stmt,
            assignment,
            EdgeRelation::Ast(AstRole::Expression),
            EdgeAttrs::default(),
        );
        let logical = fx.graph.add_node(
            "logical",
            NodeKind::LogicalExpression,
            NodeAttrs::default(),
        );
        fx.graph.add_edge(
            assignment,
            logical,
            EdgeRelation::Ast(AstRole::Right),
            EdgeAttrs::default(),
        );

        let (_, tree) = fx.reconstruct();
        let x_node = tree.as_object().unwrap()["x"].as_object().unwrap();
        assert!(x_node.contains_key("a"), "logical-expression property seen");
    }

    #[test]
    fn pollution_context_marks_polluted_object() {
        let mut fx = Fixture::new();
        let a = fx.param("a", 1);
        fx.property(a, "*", "a_star");

        let (_, tree) = reconstruct_param_types(
            &fx.graph,
            fx.function,
            ReconContext {
                vuln_type: "prototype-pollution",
                polluted_object: Some(a),
                polluting_value: None,
            },
            &Config::builtin(),
        );
        assert_eq!(tree.as_object().unwrap()["a"], TypeNode::single("object"));
    }
}
