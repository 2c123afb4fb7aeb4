//! Shared MDG fixture builder for the round-trip tests
//!
//! Builds small graphs the way the external parser would emit them:
//! function declarations with FD/CFG markers, parameter objects behind
//! `REF`/`param` edges, PDG flows, taint markers, sink annotations and
//! `module.exports` wiring.
#![allow(dead_code)]

use murk_core::graph::{
    AstRole, EdgeAttrs, EdgeRelation, MdgGraph, NodeAttrs, NodeId, NodeKind, PdgRel, RefRole,
};

pub struct GraphBuilder {
    pub graph: MdgGraph,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: MdgGraph::new(),
        }
    }

    /// Function declaration with its CFG start marker.
    pub fn function(&mut self, name: &str) -> NodeId {
        let decl = self.graph.add_node(
            name,
            NodeKind::VariableDeclarator,
            NodeAttrs {
                identifier_name: Some(name.to_string()),
                ..Default::default()
            },
        );
        let cfg = self.graph.add_node(
            format!("cfg_{name}"),
            NodeKind::CfgFunctionStart,
            NodeAttrs::default(),
        );
        self.graph
            .add_edge(decl, cfg, EdgeRelation::Fd, EdgeAttrs::default());
        decl
    }

    /// The function-expression AST node the declaration initializes,
    /// carrying the source location.
    pub fn function_ast(&mut self, decl: NodeId, file: &str, line: u32) -> NodeId {
        let name = self.graph.node(decl).name().to_string();
        let ast = self.graph.add_node(
            format!("{name}_fnexpr"),
            NodeKind::FunctionExpression,
            NodeAttrs {
                location_raw: Some(format!(r#"{{"start":{{"line":{line}}},"fname":"{file}"}}"#)),
                ..Default::default()
            },
        );
        self.graph
            .add_edge(decl, ast, EdgeRelation::Ast(AstRole::Init), EdgeAttrs::default());
        ast
    }

    pub fn param(&mut self, decl: NodeId, name: &str, index: u32) -> NodeId {
        let fn_name = self.graph.node(decl).name().to_string();
        let param = self.graph.add_node(
            format!("{fn_name}_{name}"),
            NodeKind::PdgObject,
            NodeAttrs {
                identifier_name: Some(format!("{fn_name}.{name}-v1")),
                ..Default::default()
            },
        );
        self.graph.add_edge(
            decl,
            param,
            EdgeRelation::Ref(RefRole::Param),
            EdgeAttrs {
                param_index: Some(index.to_string()),
                ..Default::default()
            },
        );
        param
    }

    pub fn taint(&mut self, target: NodeId) -> murk_core::graph::EdgeId {
        let source = self.graph.add_node(
            format!("ts_{}", self.graph.node_count()),
            NodeKind::TaintSource,
            NodeAttrs::default(),
        );
        self.graph.add_edge(
            source,
            target,
            EdgeRelation::Pdg(PdgRel::Taint),
            EdgeAttrs::default(),
        )
    }

    pub fn so(&mut self, from: NodeId, prop: &str, uid: &str) -> NodeId {
        let node = self.graph.add_node(
            uid,
            NodeKind::PdgObject,
            NodeAttrs {
                identifier_name: Some(uid.to_string()),
                ..Default::default()
            },
        );
        self.graph.add_edge(
            from,
            node,
            EdgeRelation::Pdg(PdgRel::So),
            EdgeAttrs {
                identifier_name: Some(prop.to_string()),
                ..Default::default()
            },
        );
        node
    }

    pub fn nv(&mut self, from: NodeId, prop: &str, uid: &str) -> NodeId {
        let node = self.graph.add_node(
            uid,
            NodeKind::PdgObject,
            NodeAttrs {
                identifier_name: Some(uid.to_string()),
                ..Default::default()
            },
        );
        self.graph.add_edge(
            from,
            node,
            EdgeRelation::Pdg(PdgRel::Nv),
            EdgeAttrs {
                identifier_name: Some(prop.to_string()),
                ..Default::default()
            },
        );
        node
    }

    pub fn dep(&mut self, from: NodeId, to: NodeId) {
        self.graph
            .add_edge(from, to, EdgeRelation::Pdg(PdgRel::Dep), EdgeAttrs::default());
    }

    /// A `TAINT_SINK` node fed by `from`, annotated by a statement in
    /// `context` with a source location.
    pub fn sink(
        &mut self,
        from: NodeId,
        sink_name: &str,
        context: &str,
        file: &str,
        line: u32,
    ) -> NodeId {
        let sink = self.graph.add_node(
            format!("sink_{sink_name}_{line}"),
            NodeKind::TaintSink,
            NodeAttrs {
                identifier_name: Some(sink_name.to_string()),
                ..Default::default()
            },
        );
        self.dep(from, sink);
        let stmt = self.graph.add_node(
            format!("stmt_{sink_name}_{line}"),
            NodeKind::ExpressionStatement,
            NodeAttrs {
                function_context: Some(context.to_string()),
                ..Default::default()
            },
        );
        self.graph
            .add_edge(stmt, sink, EdgeRelation::Sink, EdgeAttrs::default());
        let ast = self.graph.add_node(
            format!("ast_{sink_name}_{line}"),
            NodeKind::CallExpression,
            NodeAttrs {
                location_raw: Some(format!(r#"{{"start":{{"line":{line}}},"fname":"{file}"}}"#)),
                ..Default::default()
            },
        );
        self.graph.add_edge(
            stmt,
            ast,
            EdgeRelation::Ast(AstRole::Expression),
            EdgeAttrs::default(),
        );
        sink
    }

    /// Wire `module.exports = <decl>`.
    pub fn export_directly(&mut self, decl: NodeId) {
        let name = self.graph.node(decl).name().to_string();
        let fn_obj = self.graph.add_node(
            format!("{name}_obj"),
            NodeKind::PdgObject,
            NodeAttrs {
                identifier_name: Some(format!("{name}-o1")),
                ..Default::default()
            },
        );
        self.graph.add_edge(
            decl,
            fn_obj,
            EdgeRelation::Ref(RefRole::Obj),
            EdgeAttrs::default(),
        );
        let sub = self.graph.add_node(
            format!("{name}_export_sub"),
            NodeKind::PdgObject,
            NodeAttrs::default(),
        );
        self.dep(fn_obj, sub);
        let module = self.graph.add_node(
            format!("{name}_module"),
            NodeKind::PdgObject,
            NodeAttrs {
                identifier_name: Some("module-o1".to_string()),
                ..Default::default()
            },
        );
        self.graph.add_edge(
            module,
            sub,
            EdgeRelation::Pdg(PdgRel::So),
            EdgeAttrs {
                identifier_name: Some("exports".to_string()),
                ..Default::default()
            },
        );
    }

    /// A call site inside `caller` invoking `callee`.
    pub fn call(&mut self, caller: NodeId, callee: NodeId, uid: &str) -> NodeId {
        let context = format!("cfg_{}", self.graph.node(caller).name());
        let call = self.graph.add_node(
            uid,
            NodeKind::PdgCall,
            NodeAttrs {
                function_context: Some(context),
                ..Default::default()
            },
        );
        self.graph
            .add_edge(call, callee, EdgeRelation::Cg, EdgeAttrs::default());
        call
    }

    /// Bind `arg` to the callee parameter `param_name` at `call`.
    pub fn bind_arg(&mut self, arg: NodeId, call: NodeId, param_name: &str) {
        let bound = self.graph.node(arg).name().to_string();
        self.graph.add_edge(
            arg,
            call,
            EdgeRelation::Pdg(PdgRel::Arg(param_name.to_string())),
            EdgeAttrs {
                identifier_name: Some(bound),
                ..Default::default()
            },
        );
    }
}

/// Write a JavaScript source file and return its path as a string.
pub fn write_source(dir: &tempfile::TempDir, name: &str, lines: &[&str]) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, lines.join("\n") + "\n").expect("write source file");
    path.to_string_lossy().to_string()
}
