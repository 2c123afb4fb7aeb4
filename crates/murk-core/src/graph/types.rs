//! Node and edge vocabulary of the Module Dependency Graph
//!
//! The MDG combines AST, control-flow, call-graph and program-dependence
//! edges over one node arena. Node kinds and edge relations form closed
//! vocabularies; anything outside them is preserved verbatim so that a
//! newer parser does not break loading.

use std::fmt;

/// Kind of an MDG node, as emitted in the `Type` CSV column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    // AST kinds
    CallExpression,
    NewExpression,
    Identifier,
    Literal,
    VariableDeclarator,
    FunctionExpression,
    ArrowFunctionExpression,
    MemberExpression,
    BinaryExpression,
    UnaryExpression,
    LogicalExpression,
    AssignmentExpression,
    ExpressionStatement,
    ReturnStatement,
    TemplateLiteral,
    ForOfStatement,
    // CFG markers
    CfgFunctionStart,
    // PDG abstractions
    PdgObject,
    PdgCall,
    PdgReturn,
    PdgParam,
    // Taint markers
    TaintSource,
    TaintSink,
    /// Anything the loader does not recognize; kept for diagnostics.
    Other(String),
}

impl NodeKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "CallExpression" => NodeKind::CallExpression,
            "NewExpression" => NodeKind::NewExpression,
            "Identifier" => NodeKind::Identifier,
            "Literal" => NodeKind::Literal,
            "VariableDeclarator" => NodeKind::VariableDeclarator,
            "FunctionExpression" => NodeKind::FunctionExpression,
            "ArrowFunctionExpression" => NodeKind::ArrowFunctionExpression,
            "MemberExpression" => NodeKind::MemberExpression,
            "BinaryExpression" => NodeKind::BinaryExpression,
            "UnaryExpression" => NodeKind::UnaryExpression,
            "LogicalExpression" => NodeKind::LogicalExpression,
            "AssignmentExpression" => NodeKind::AssignmentExpression,
            "ExpressionStatement" => NodeKind::ExpressionStatement,
            "ReturnStatement" => NodeKind::ReturnStatement,
            "TemplateLiteral" => NodeKind::TemplateLiteral,
            "ForOfStatement" => NodeKind::ForOfStatement,
            "CFG_F_START" => NodeKind::CfgFunctionStart,
            "PDG_OBJECT" => NodeKind::PdgObject,
            "PDG_CALL" => NodeKind::PdgCall,
            "PDG_RETURN" => NodeKind::PdgReturn,
            "PDG_PARAM" => NodeKind::PdgParam,
            "TAINT_SOURCE" => NodeKind::TaintSource,
            "TAINT_SINK" => NodeKind::TaintSink,
            other => NodeKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::CallExpression => "CallExpression",
            NodeKind::NewExpression => "NewExpression",
            NodeKind::Identifier => "Identifier",
            NodeKind::Literal => "Literal",
            NodeKind::VariableDeclarator => "VariableDeclarator",
            NodeKind::FunctionExpression => "FunctionExpression",
            NodeKind::ArrowFunctionExpression => "ArrowFunctionExpression",
            NodeKind::MemberExpression => "MemberExpression",
            NodeKind::BinaryExpression => "BinaryExpression",
            NodeKind::UnaryExpression => "UnaryExpression",
            NodeKind::LogicalExpression => "LogicalExpression",
            NodeKind::AssignmentExpression => "AssignmentExpression",
            NodeKind::ExpressionStatement => "ExpressionStatement",
            NodeKind::ReturnStatement => "ReturnStatement",
            NodeKind::TemplateLiteral => "TemplateLiteral",
            NodeKind::ForOfStatement => "ForOfStatement",
            NodeKind::CfgFunctionStart => "CFG_F_START",
            NodeKind::PdgObject => "PDG_OBJECT",
            NodeKind::PdgCall => "PDG_CALL",
            NodeKind::PdgReturn => "PDG_RETURN",
            NodeKind::PdgParam => "PDG_PARAM",
            NodeKind::TaintSource => "TAINT_SOURCE",
            NodeKind::TaintSink => "TAINT_SINK",
            NodeKind::Other(s) => s,
        }
    }

    /// Function-like AST nodes (the bodies functions are declared with).
    pub fn is_function_expression(&self) -> bool {
        matches!(
            self,
            NodeKind::FunctionExpression | NodeKind::ArrowFunctionExpression
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a syntax edge (`RelationType` on an `AST` edge).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AstRole {
    Init,
    Callee,
    Arg,
    Property,
    Object,
    Left,
    Right,
    Expression,
    /// Unlabeled or unrecognized syntax role.
    Other(String),
}

impl AstRole {
    fn parse(raw: &str) -> Self {
        match raw {
            "init" => AstRole::Init,
            "callee" => AstRole::Callee,
            "arg" => AstRole::Arg,
            "property" => AstRole::Property,
            "object" => AstRole::Object,
            "left" => AstRole::Left,
            "right" => AstRole::Right,
            "expression" => AstRole::Expression,
            other => AstRole::Other(other.to_string()),
        }
    }
}

/// Role of a `REF` edge joining an AST node to its PDG abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefRole {
    Obj,
    Param,
    Call,
    Return,
}

impl RefRole {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "obj" => Some(RefRole::Obj),
            "param" => Some(RefRole::Param),
            "call" => Some(RefRole::Call),
            "return" => Some(RefRole::Return),
            _ => None,
        }
    }
}

/// Data/points-to relation of a `PDG` edge.
///
/// `Arg` carries the name of the parameter the argument binds to; the CSV
/// encodes it as `ARG(paramName)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PdgRel {
    /// Sub-object: a property/key lookup.
    So,
    /// New version of an object after a mutation.
    Nv,
    /// Dependency/assignment.
    Dep,
    /// Argument binding at a call site.
    Arg(String),
    /// Return-value edge.
    Ret,
    /// Taint introduction from a source.
    Taint,
}

impl PdgRel {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SO" => Some(PdgRel::So),
            "NV" => Some(PdgRel::Nv),
            "DEP" => Some(PdgRel::Dep),
            "RET" => Some(PdgRel::Ret),
            "TAINT" => Some(PdgRel::Taint),
            other => {
                let inner = other.strip_prefix("ARG(")?.strip_suffix(')')?;
                Some(PdgRel::Arg(inner.to_string()))
            }
        }
    }

    /// The parameter name bound by an `ARG` edge.
    pub fn arg_name(&self) -> Option<&str> {
        match self {
            PdgRel::Arg(name) => Some(name),
            _ => None,
        }
    }
}

/// Relation carried by an MDG edge: the `RelationLabel` CSV column decides
/// the variant, the `RelationType` column its payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeRelation {
    Ast(AstRole),
    Cfg,
    /// Call-graph edge: call site to callee definition.
    Cg,
    /// Function-definition edge: declaration to its CFG start marker.
    Fd,
    /// Sink-annotation edge: containing CFG node to a `TAINT_SINK`.
    Sink,
    Ref(RefRole),
    Pdg(PdgRel),
    /// Transient argument-to-parameter shortcut; scoped to one detection
    /// pass and removed before it returns.
    Parameter,
    Other(String),
}

impl EdgeRelation {
    pub fn parse(label: &str, relation_type: &str) -> Self {
        match label {
            "AST" => EdgeRelation::Ast(AstRole::parse(relation_type)),
            "CFG" => EdgeRelation::Cfg,
            "CG" => EdgeRelation::Cg,
            "FD" => EdgeRelation::Fd,
            "SINK" => EdgeRelation::Sink,
            "REF" => match RefRole::parse(relation_type) {
                Some(role) => EdgeRelation::Ref(role),
                None => EdgeRelation::Other(format!("REF/{relation_type}")),
            },
            "PDG" | "TAINT" => match PdgRel::parse(relation_type) {
                Some(rel) => EdgeRelation::Pdg(rel),
                None => EdgeRelation::Other(format!("PDG/{relation_type}")),
            },
            "PARAMETER" => EdgeRelation::Parameter,
            other => EdgeRelation::Other(other.to_string()),
        }
    }

    pub fn as_pdg(&self) -> Option<&PdgRel> {
        match self {
            EdgeRelation::Pdg(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn is_pdg(&self) -> bool {
        matches!(self, EdgeRelation::Pdg(_))
    }

    pub fn is_ast(&self, role: &AstRole) -> bool {
        matches!(self, EdgeRelation::Ast(r) if r == role)
    }

    pub fn is_ref(&self, role: RefRole) -> bool {
        matches!(self, EdgeRelation::Ref(r) if *r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_round_trips() {
        for raw in ["PDG_OBJECT", "TAINT_SINK", "CFG_F_START", "CallExpression"] {
            assert_eq!(NodeKind::parse(raw).as_str(), raw);
        }
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let kind = NodeKind::parse("SomeFutureNode");
        assert_eq!(kind, NodeKind::Other("SomeFutureNode".to_string()));
        assert_eq!(kind.as_str(), "SomeFutureNode");
    }

    #[test]
    fn arg_relation_carries_parameter_name() {
        let rel = PdgRel::parse("ARG(target)").unwrap();
        assert_eq!(rel.arg_name(), Some("target"));
    }

    #[test]
    fn malformed_arg_relation_is_rejected() {
        assert_eq!(PdgRel::parse("ARG(broken"), None);
        assert_eq!(PdgRel::parse("ARGUMENT"), None);
    }

    #[test]
    fn edge_relation_parses_by_label() {
        assert_eq!(
            EdgeRelation::parse("PDG", "SO"),
            EdgeRelation::Pdg(PdgRel::So)
        );
        assert_eq!(
            EdgeRelation::parse("REF", "param"),
            EdgeRelation::Ref(RefRole::Param)
        );
        assert_eq!(
            EdgeRelation::parse("AST", "init"),
            EdgeRelation::Ast(AstRole::Init)
        );
        assert_eq!(EdgeRelation::parse("CG", ""), EdgeRelation::Cg);
    }

    #[test]
    fn taint_label_maps_into_pdg_relations() {
        assert_eq!(
            EdgeRelation::parse("TAINT", "TAINT"),
            EdgeRelation::Pdg(PdgRel::Taint)
        );
    }
}
