//! Export-shape and caller/returner discovery
//!
//! Whether and how a function is externally reachable is decided by four
//! structural shapes, first match wins: direct assignment to
//! `module.exports`, property of `module.exports`/`exports`, property
//! reached through a prototype chain, and `this.prop = fn` inside an
//! exported constructor. Callers and returners extend the search when a
//! function is not itself exported.

use crate::graph::{EdgeRelation, MdgGraph, NodeId, NodeKind, PdgRel, RefRole};
use crate::taint::CallGraph;
use std::collections::HashSet;

/// A property-style export or return site.
#[derive(Debug, Clone)]
pub struct PropertyExport {
    pub obj_name: String,
    pub prop_name: Option<String>,
    pub fn_node_name: String,
    /// The holding object is itself a function (a constructor): reaching
    /// the property requires `new`.
    pub is_function: bool,
    /// AST origin of the holding object, when resolvable.
    pub source: Option<NodeId>,
}

/// A function that returns the function under inspection.
#[derive(Debug, Clone)]
pub struct Returner {
    /// Declaration of the returning function.
    pub decl: NodeId,
    pub export: PropertyExport,
}

/// The function's own PDG object (`REF`/`obj`).
pub fn fn_object(graph: &MdgGraph, decl: NodeId) -> Option<NodeId> {
    graph
        .targets_where(decl, |e| e.relation.is_ref(RefRole::Obj))
        .find(|&n| graph.node(n).kind == NodeKind::PdgObject)
}

/// All versions of an object: the closure over `NV` edges in both
/// directions. Versioning is linear per mutation site, so this is a chain.
pub fn versions(graph: &MdgGraph, obj: NodeId) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut stack = vec![obj];
    let mut all = Vec::new();
    while let Some(node) = stack.pop() {
        if !seen.insert(node) {
            continue;
        }
        all.push(node);
        for next in graph.targets_where(node, |e| e.relation == EdgeRelation::Pdg(PdgRel::Nv)) {
            stack.push(next);
        }
        for prev in graph.sources_where(node, |e| e.relation == EdgeRelation::Pdg(PdgRel::Nv)) {
            stack.push(prev);
        }
    }
    all
}

/// `(value) -DEP-> sub_obj <-SO(name)- holder`: the property write sites of
/// a value, yielding `(holder, property-name)` pairs.
fn property_holders(graph: &MdgGraph, value: NodeId) -> Vec<(NodeId, String)> {
    let mut holders = Vec::new();
    for version in versions(graph, value) {
        for sub in
            graph.targets_where(version, |e| e.relation == EdgeRelation::Pdg(PdgRel::Dep))
        {
            for edge in graph.incoming(sub) {
                if edge.relation == EdgeRelation::Pdg(PdgRel::So) {
                    holders.push((edge.from, edge.name().to_string()));
                }
            }
        }
    }
    holders
}

/// Whether `obj` (or any version of it) is the `module.exports` sub-object,
/// or flows into it.
fn is_exports_object(graph: &MdgGraph, obj: NodeId) -> bool {
    for version in versions(graph, obj) {
        if graph.node(version).name().contains("exports") {
            return true;
        }
        for (holder, prop) in property_holders(graph, version) {
            if prop == "exports" && graph.node(holder).name().contains("module") {
                return true;
            }
        }
    }
    false
}

/// AST node that introduced the object, through its earliest version.
pub fn origin_ast(graph: &MdgGraph, obj: NodeId) -> Option<NodeId> {
    for version in versions(graph, obj) {
        if let Some(ast) = graph
            .sources_where(version, |e| e.relation.is_ref(RefRole::Obj))
            .next()
        {
            return Some(ast);
        }
    }
    None
}

/// A declaration is a constructor when its definition edge leads to a
/// function CFG start.
pub fn is_constructor(graph: &MdgGraph, ast: NodeId) -> bool {
    graph
        .targets_where(ast, |e| e.relation == EdgeRelation::Fd)
        .any(|n| graph.node(n).kind == NodeKind::CfgFunctionStart)
}

/// Shape 1: `module.exports = fn`.
pub fn directly_exported(graph: &MdgGraph, decl: NodeId) -> Option<String> {
    let fn_obj = fn_object(graph, decl)?;
    for (holder, prop) in property_holders(graph, fn_obj) {
        if prop == "exports" && graph.node(holder).name().contains("module") {
            return Some(graph.node(fn_obj).name().to_string());
        }
    }
    None
}

/// Shapes 2 and 4 share this skeleton: the function object is a property of
/// some holder; the holder must itself reach `module.exports`.
pub fn property_exported(graph: &MdgGraph, decl: NodeId) -> Option<PropertyExport> {
    let fn_obj = fn_object(graph, decl)?;
    for (holder, prop) in property_holders(graph, fn_obj) {
        if prop == "exports" {
            continue;
        }
        if !is_exports_object(graph, holder) {
            continue;
        }
        let source = origin_ast(graph, holder);
        let is_function = source.map(|ast| is_constructor(graph, ast)).unwrap_or(false);
        return Some(PropertyExport {
            obj_name: graph.node(holder).name().to_string(),
            prop_name: Some(prop),
            fn_node_name: graph.node(fn_obj).name().to_string(),
            is_function,
            source,
        });
    }
    None
}

/// Shape 3: `F.prototype.m = fn` with `F` exported.
pub fn prototype_exported(graph: &MdgGraph, decl: NodeId) -> Option<PropertyExport> {
    let fn_obj = fn_object(graph, decl)?;
    for (holder, prop) in property_holders(graph, fn_obj) {
        // The holder must be a version of some constructor's `prototype`
        // property.
        for version in versions(graph, holder) {
            for edge in graph.incoming(version) {
                if edge.relation != EdgeRelation::Pdg(PdgRel::So) || edge.name() != "prototype" {
                    continue;
                }
                let constructor_obj = edge.from;
                if !is_exports_object(graph, constructor_obj) {
                    continue;
                }
                let source = origin_ast(graph, constructor_obj);
                return Some(PropertyExport {
                    obj_name: graph.node(constructor_obj).name().to_string(),
                    prop_name: Some(prop),
                    fn_node_name: graph.node(fn_obj).name().to_string(),
                    is_function: true,
                    source,
                });
            }
        }
    }
    None
}

/// Shape 4 proper: `this.prop = fn` inside a constructor that is exported.
pub fn this_property_exported(graph: &MdgGraph, decl: NodeId) -> Option<PropertyExport> {
    let fn_obj = fn_object(graph, decl)?;
    for (holder, prop) in property_holders(graph, fn_obj) {
        for version in versions(graph, holder) {
            // The holder descends from the constructor's `this` binding.
            for class_ast in graph.sources_where(version, |e| {
                e.relation.is_ref(RefRole::Param) && e.param_index.as_deref() == Some("this")
            }) {
                let Some(class_obj) = fn_object(graph, class_ast) else {
                    continue;
                };
                if !is_exports_object(graph, class_obj) {
                    continue;
                }
                return Some(PropertyExport {
                    obj_name: graph.node(class_obj).name().to_string(),
                    prop_name: Some(prop),
                    fn_node_name: graph.node(fn_obj).name().to_string(),
                    is_function: true,
                    source: Some(class_ast),
                });
            }
        }
    }
    None
}

/// Functions that call `decl`: direct call-graph callers, plus functions
/// that receive `decl` as a call argument (promise/callback idiom).
pub fn function_is_called(graph: &MdgGraph, cg: &CallGraph, decl: NodeId) -> Vec<NodeId> {
    let mut callers = Vec::new();
    let mut seen = HashSet::new();
    for &call in cg.calls_into(decl) {
        if let Some(caller) = cg.enclosing_function(graph, call) {
            if seen.insert(caller) {
                callers.push(caller);
            }
        }
    }
    if let Some(fn_obj) = fn_object(graph, decl) {
        for call in graph.targets_where(fn_obj, |e| {
            matches!(e.relation, EdgeRelation::Pdg(PdgRel::Arg(_)))
        }) {
            if graph.node(call).kind != NodeKind::PdgCall {
                continue;
            }
            if let Some(caller) = cg.enclosing_function(graph, call) {
                if seen.insert(caller) {
                    callers.push(caller);
                }
            }
        }
    }
    callers
}

/// Functions that return `decl`, directly or as a property of a returned
/// object.
pub fn function_is_returned(graph: &MdgGraph, cg: &CallGraph, decl: NodeId) -> Vec<Returner> {
    let mut returners = Vec::new();
    let mut seen = HashSet::new();
    let Some(fn_obj) = fn_object(graph, decl) else {
        return returners;
    };

    // Direct: the function object is a dependency of a return value.
    for ret in graph.targets_where(fn_obj, |e| e.relation == EdgeRelation::Pdg(PdgRel::Dep)) {
        if graph.node(ret).kind != NodeKind::PdgReturn {
            continue;
        }
        for stmt in graph.sources_where(ret, |e| matches!(e.relation, EdgeRelation::Ref(_))) {
            if let Some(returning) = cg.enclosing_function(graph, stmt) {
                if seen.insert((returning, None::<String>)) {
                    returners.push(Returner {
                        decl: returning,
                        export: PropertyExport {
                            obj_name: graph.node(fn_obj).name().to_string(),
                            prop_name: None,
                            fn_node_name: graph.node(fn_obj).name().to_string(),
                            is_function: false,
                            source: Some(returning),
                        },
                    });
                }
            }
        }
    }

    // Via property: the function hangs off an object whose later version is
    // returned.
    for (holder, prop) in property_holders(graph, fn_obj) {
        for version in versions(graph, holder) {
            for ret in
                graph.targets_where(version, |e| e.relation == EdgeRelation::Pdg(PdgRel::Dep))
            {
                if graph.node(ret).kind != NodeKind::PdgReturn {
                    continue;
                }
                for stmt in
                    graph.sources_where(ret, |e| matches!(e.relation, EdgeRelation::Ref(_)))
                {
                    if let Some(returning) = cg.enclosing_function(graph, stmt) {
                        if seen.insert((returning, Some(prop.clone()))) {
                            let source = origin_ast(graph, holder);
                            let is_function =
                                source.map(|ast| is_constructor(graph, ast)).unwrap_or(false);
                            returners.push(Returner {
                                decl: returning,
                                export: PropertyExport {
                                    obj_name: graph.node(holder).name().to_string(),
                                    prop_name: Some(prop.clone()),
                                    fn_node_name: graph.node(fn_obj).name().to_string(),
                                    is_function,
                                    source: source.or(Some(returning)),
                                },
                            });
                        }
                    }
                }
            }
        }
    }
    returners
}

/// A function invoked from the top-level scope of the entry file.
pub fn called_at_top_level(graph: &MdgGraph, cg: &CallGraph, decl: NodeId) -> bool {
    cg.calls_into(decl)
        .iter()
        .any(|&call| cg.is_top_level(graph, call))
}
