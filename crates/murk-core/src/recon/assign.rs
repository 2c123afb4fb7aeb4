//! Structural type inference for attacker-controlled parameters
//!
//! A parameter's JavaScript type is inferred from how the program uses it:
//! a battery of structural AST checks runs in priority order until one or
//! more types match. The ordering is a compatibility heuristic, not a
//! semantic law — function detection short-circuits because a callable
//! value is not simultaneously another primitive in practice.

use super::types::{TypeNode, TypeSet};
use crate::config::Config;
use crate::graph::{AstRole, EdgeRelation, MdgGraph, NodeId, NodeKind};
use std::collections::BTreeSet;

const NUMERIC_OPERATORS: &[&str] = &["*", "-", "/", "**", "%", ">", "<", ">=", "<="];

/// Infer the type set of one parameter position, represented by the PDG
/// objects in `ids`. Zero matches default to `any`.
pub fn assign_type(
    graph: &MdgGraph,
    config: &Config,
    param_name: &str,
    ids: &BTreeSet<String>,
) -> TypeNode {
    let mut declarators = vec![param_name.to_string()];
    declarators.extend(variable_declarators(graph, ids));
    let primary = declarators[0].clone();
    if primary.is_empty() {
        return TypeNode::any();
    }

    let mut types = TypeSet::new();

    // Array, Number, Object: static methods, e.g. Array.isArray(param).
    for kind in static_method_receivers(graph, &declarators) {
        types.insert(kind.to_lowercase());
    }
    // Built-in function signatures from configuration, e.g. path.join(arr).
    for ty in builtin_signature_types(graph, config, &declarators) {
        types.insert(ty);
    }
    // typeof comparisons, e.g. typeof param === "function".
    for ty in typeof_comparisons(graph, &declarators) {
        types.insert(ty);
    }

    // Function: direct invocation, e.g. param(). Short-circuits: a callable
    // value is not another primitive as well.
    if !types.contains("function") && is_called_directly(graph, &primary) {
        return TypeNode::single("function");
    }

    // Array: prototype method call or for...of target.
    if !types.contains("array")
        && (calls_prototype_method(graph, &declarators, &config.prototypes.array)
            || is_for_of_target(graph, &declarators))
    {
        types.insert("array".to_string());
    }

    // Boolean: equality against a boolean literal.
    if !types.contains("bool")
        && binary_with_literal(graph, &declarators, &["==", "==="], Some("boolean"))
    {
        types.insert("bool".to_string());
    }

    // Number: arithmetic against a number literal, or a numeric operator.
    if !types.contains("number") && binary_with_literal(graph, &declarators, &[], Some("number")) {
        types.insert("number".to_string());
    }
    if !types.contains("number") && binary_with_operator(graph, &declarators, NUMERIC_OPERATORS) {
        types.insert("number".to_string());
    }

    // String: prototype call, concatenation, template literal, sink-call
    // argument, computed property position.
    if !types.contains("string") {
        // String prototype checks only trust the declared name itself.
        let declared_only = vec![primary.clone()];
        if calls_prototype_method(graph, &declared_only, &config.prototypes.string) {
            types.insert("string".to_string());
        }
    }
    if !types.contains("string")
        && binary_with_literal(graph, &declarators, &["+", "=="], Some("string"))
    {
        types.insert("string".to_string());
    }
    if !types.contains("string") && in_template_literal(graph, &primary) {
        types.insert("string".to_string());
    }
    if !types.contains("string") && is_first_sink_argument(graph, config, &declarators) {
        types.insert("string".to_string());
    }
    if !types.contains("string") && is_computed_property(graph, &declarators) {
        types.insert("string".to_string());
    }

    if types.is_empty() {
        TypeNode::any()
    } else {
        TypeNode::Leaf(types)
    }
}

/// Names of `VariableDeclarator` nodes holding any of the parameter's PDG
/// objects: aliases the checks must also match (destructuring included).
fn variable_declarators(graph: &MdgGraph, ids: &BTreeSet<String>) -> Vec<String> {
    let mut names = Vec::new();
    for uid in ids {
        let Some(node) = graph.node_by_uid(uid) else {
            continue;
        };
        for decl in graph.sources_where(node, |e| matches!(e.relation, EdgeRelation::Ref(_))) {
            if graph.node(decl).kind == NodeKind::VariableDeclarator {
                if let Some(name) = graph.node(decl).identifier_name.clone() {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
    }
    names
}

fn named_in(graph: &MdgGraph, node: NodeId, names: &[String]) -> bool {
    names.iter().any(|n| n == graph.node(node).name())
}

fn ast_targets<'a>(
    graph: &'a MdgGraph,
    node: NodeId,
    role: Option<AstRole>,
) -> impl Iterator<Item = NodeId> + 'a {
    graph.outgoing(node).filter_map(move |e| match (&e.relation, &role) {
        (EdgeRelation::Ast(r), Some(want)) if r == want => Some(e.to),
        (EdgeRelation::Ast(_), None) => Some(e.to),
        _ => None,
    })
}

/// `Array.isArray(param)`, `Number.isInteger(param)`, `Object.keys(param)`.
fn static_method_receivers<'a>(graph: &'a MdgGraph, declarators: &'a [String]) -> Vec<&'a str> {
    let mut kinds = Vec::new();
    for call in graph.nodes_of_kind(&NodeKind::CallExpression) {
        let has_matching_arg = graph.outgoing(call).any(|e| {
            e.relation.is_ast(&AstRole::Arg)
                && graph.node(e.to).kind == NodeKind::Identifier
                && named_in(graph, e.to, declarators)
        });
        if !has_matching_arg {
            continue;
        }
        for member in ast_targets(graph, call, None)
            .filter(|&n| graph.node(n).kind == NodeKind::MemberExpression)
        {
            for receiver in ast_targets(graph, member, Some(AstRole::Object)) {
                let name = graph.node(receiver).name();
                if let Some(kind) = ["Array", "Number", "Object"].iter().find(|&&k| k == name) {
                    kinds.push(*kind);
                }
            }
        }
    }
    kinds
}

/// Types assigned by configured built-in signatures; trailing arguments of
/// `rest?` signatures reuse the first type.
fn builtin_signature_types(
    graph: &MdgGraph,
    config: &Config,
    declarators: &[String],
) -> Vec<String> {
    let mut types = Vec::new();
    for call in graph.nodes_of_kind(&NodeKind::CallExpression) {
        let Some(signature) = ast_targets(graph, call, None)
            .filter(|&n| graph.node(n).kind == NodeKind::Identifier)
            .find_map(|n| config.signature(graph.node(n).name()))
        else {
            continue;
        };
        for edge in graph.outgoing(call) {
            if !edge.relation.is_ast(&AstRole::Arg)
                || graph.node(edge.to).kind != NodeKind::Identifier
                || !named_in(graph, edge.to, declarators)
            {
                continue;
            }
            let Some(index) = edge.argument_index else {
                continue;
            };
            let index = index as usize;
            if index >= 1 && index <= signature.args_types.len() {
                types.push(signature.args_types[index - 1].clone());
            } else if index > signature.args_types.len() && signature.rest {
                types.push(signature.args_types[0].clone());
            }
        }
    }
    types
}

/// `typeof param === "..."` — the compared literal names the type.
fn typeof_comparisons(graph: &MdgGraph, declarators: &[String]) -> Vec<String> {
    let mut guard_names = Vec::new();
    for decl in graph.nodes_of_kind(&NodeKind::VariableDeclarator) {
        for unary in ast_targets(graph, decl, None)
            .filter(|&n| graph.node(n).kind == NodeKind::UnaryExpression)
        {
            if graph.node(unary).sub_type.as_deref() != Some("typeof") {
                continue;
            }
            if ast_targets(graph, unary, None).any(|n| named_in(graph, n, declarators)) {
                if let Some(name) = graph.node(decl).identifier_name.clone() {
                    guard_names.push(name);
                }
            }
        }
    }

    let mut types = Vec::new();
    for bin in graph.nodes_of_kind(&NodeKind::BinaryExpression) {
        if !matches!(graph.node(bin).sub_type.as_deref(), Some("==") | Some("===")) {
            continue;
        }
        let left_matches = ast_targets(graph, bin, Some(AstRole::Left))
            .any(|n| guard_names.iter().any(|g| g == graph.node(n).name()));
        if !left_matches {
            continue;
        }
        for literal in ast_targets(graph, bin, Some(AstRole::Right))
            .filter(|&n| graph.node(n).kind == NodeKind::Literal)
        {
            if let Some(raw) = &graph.node(literal).raw {
                types.push(raw.trim_matches(|c| c == '\'' || c == '"').to_string());
            }
        }
    }
    types
}

/// `param()` — the value is invoked.
fn is_called_directly(graph: &MdgGraph, name: &str) -> bool {
    graph.nodes_of_kind(&NodeKind::CallExpression).any(|call| {
        ast_targets(graph, call, Some(AstRole::Callee))
            .any(|callee| graph.node(callee).name() == name)
    })
}

/// `param.join('')` / `param.charAt(0)` — a prototype method is called on
/// the value. String checks restrict the receiver to the primary name.
fn calls_prototype_method(graph: &MdgGraph, declarators: &[String], methods: &[String]) -> bool {
    for call in graph.nodes_of_kind(&NodeKind::CallExpression) {
        for member in ast_targets(graph, call, None)
            .filter(|&n| graph.node(n).kind == NodeKind::MemberExpression)
        {
            let receiver_matches = ast_targets(graph, member, Some(AstRole::Object))
                .any(|n| named_in(graph, n, declarators));
            if !receiver_matches {
                continue;
            }
            let method_matches = ast_targets(graph, member, Some(AstRole::Property))
                .any(|n| methods.iter().any(|m| m == graph.node(n).name()));
            if method_matches {
                return true;
            }
        }
    }
    false
}

/// `for (x of param)` — iteration implies an array.
fn is_for_of_target(graph: &MdgGraph, declarators: &[String]) -> bool {
    graph.nodes_of_kind(&NodeKind::ForOfStatement).any(|stmt| {
        ast_targets(graph, stmt, Some(AstRole::Right)).any(|n| named_in(graph, n, declarators))
    })
}

/// A binary expression joins the value with a literal of `literal_sub_type`,
/// optionally restricted to `operators`.
fn binary_with_literal(
    graph: &MdgGraph,
    declarators: &[String],
    operators: &[&str],
    literal_sub_type: Option<&str>,
) -> bool {
    for bin in graph.nodes_of_kind(&NodeKind::BinaryExpression) {
        if !operators.is_empty() {
            let op = graph.node(bin).sub_type.as_deref().unwrap_or("");
            if !operators.contains(&op) {
                continue;
            }
        }
        let id_matches = ast_targets(graph, bin, None)
            .any(|n| graph.node(n).kind == NodeKind::Identifier && named_in(graph, n, declarators));
        if !id_matches {
            continue;
        }
        let literal_matches = ast_targets(graph, bin, None).any(|n| {
            graph.node(n).kind == NodeKind::Literal
                && literal_sub_type
                    .map(|want| graph.node(n).sub_type.as_deref() == Some(want))
                    .unwrap_or(true)
        });
        if literal_matches {
            return true;
        }
    }
    false
}

/// A binary expression with a numeric operator touches the value.
fn binary_with_operator(graph: &MdgGraph, declarators: &[String], operators: &[&str]) -> bool {
    graph.nodes_of_kind(&NodeKind::BinaryExpression).any(|bin| {
        operators.contains(&graph.node(bin).sub_type.as_deref().unwrap_or(""))
            && ast_targets(graph, bin, None).any(|n| {
                graph.node(n).kind == NodeKind::Identifier && named_in(graph, n, declarators)
            })
    })
}

/// `` `text ${param}` `` — interpolation implies a string.
fn in_template_literal(graph: &MdgGraph, name: &str) -> bool {
    graph.nodes_of_kind(&NodeKind::TemplateLiteral).any(|tpl| {
        ast_targets(graph, tpl, None).any(|n| graph.node(n).name() == name)
    })
}

/// First argument of a configured sink call (`eval(param)`,
/// `child_process.exec(param)`, `new Function(param)`).
fn is_first_sink_argument(graph: &MdgGraph, config: &Config, declarators: &[String]) -> bool {
    let calls = graph
        .nodes_of_kind(&NodeKind::CallExpression)
        .chain(graph.nodes_of_kind(&NodeKind::NewExpression));
    for call in calls {
        let arg_matches = graph.outgoing(call).any(|e| {
            e.relation.is_ast(&AstRole::Arg)
                && e.argument_index == Some(1)
                && named_in(graph, e.to, declarators)
        });
        if !arg_matches {
            continue;
        }
        for callee in ast_targets(graph, call, Some(AstRole::Callee)) {
            let callee = graph.node(callee);
            match callee.kind {
                NodeKind::Identifier if config.is_sink(callee.name()) => return true,
                NodeKind::MemberExpression => {
                    if ast_targets(graph, callee.id, Some(AstRole::Property))
                        .any(|p| config.is_sink(graph.node(p).name()))
                    {
                        return true;
                    }
                }
                _ => {}
            }
        }
    }
    false
}

/// `obj[param]` — used as a computed key.
fn is_computed_property(graph: &MdgGraph, declarators: &[String]) -> bool {
    graph
        .nodes_of_kind(&NodeKind::MemberExpression)
        .any(|member| {
            graph.node(member).sub_type.as_deref() == Some("computed")
                && ast_targets(graph, member, Some(AstRole::Property))
                    .any(|n| named_in(graph, n, declarators))
        })
}
