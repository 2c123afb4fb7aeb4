//! Interaction protocol: from sink to entry point
//!
//! Given the function containing a sink, walk outward through callers and
//! return chains until an externally reachable function is found — an
//! export, a top-level call, or a server-initialization idiom — and record
//! *how* it is reached as an ordered call path, innermost call last. The
//! call paths, together with reconstructed parameter types, form the final
//! taint-summary records.

pub mod exports;

use crate::config::Config;
use crate::detect::Detection;
use crate::graph::{AstRole, MdgGraph, NodeId};
use crate::recon::{self, ReconContext, TypeNode};
use crate::report::VulnRecord;
use crate::taint::CallGraph;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    Method,
    New,
    TopLevel,
    ServerInitialization,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Call => "Call",
            CallKind::Method => "Method",
            CallKind::New => "New",
            CallKind::TopLevel => "TopLevel",
            CallKind::ServerInitialization => "ServerInitialization",
        }
    }
}

/// One element of a call path.
#[derive(Debug, Clone)]
pub struct CallStep {
    pub kind: CallKind,
    pub prop: Option<String>,
    pub fn_name: Option<String>,
    /// Declaration whose parameters the caller controls at this step.
    pub fn_node: Option<NodeId>,
    pub port: Option<u16>,
}

impl CallStep {
    fn new(kind: CallKind) -> Self {
        Self {
            kind,
            prop: None,
            fn_name: None,
            fn_node: None,
            port: None,
        }
    }
}

/// One link of the rendered interaction protocol, innermost call nested
/// under `returns`.
#[derive(Debug, Clone, Serialize)]
pub struct TaintSummaryCall {
    pub source: String,
    pub params_types: serde_json::Value,
    pub tainted_params: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<Box<TaintSummaryCall>>,
}

fn create_server_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\bcreateServer\b").expect("valid pattern"))
}

fn listen_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"\.listen\((\d+|"(\d+)")\)"#).expect("valid pattern"))
}

/// `createServer` + `.listen(port)` in the raw entry-file source marks a
/// server program; the exploit is an HTTP request, not a module call.
pub fn server_initialization_port(source_file: &str) -> Option<u16> {
    let content = std::fs::read_to_string(source_file).ok()?;
    if !create_server_pattern().is_match(&content) {
        return None;
    }
    let captures = listen_pattern().captures(&content)?;
    let digits = captures
        .get(2)
        .or_else(|| captures.get(1))
        .map(|m| m.as_str())?;
    digits.parse().ok()
}

/// How an exported function is reached, when it is exported at all.
/// The four shapes are checked in priority order, first match wins.
fn get_exported_type(graph: &MdgGraph, decl: NodeId) -> Option<Vec<CallStep>> {
    if let Some(fn_name) = exports::directly_exported(graph, decl) {
        let mut step = CallStep::new(CallKind::Call);
        step.fn_name = Some(fn_name);
        step.fn_node = Some(decl);
        return Some(vec![step]);
    }

    let export = exports::property_exported(graph, decl)
        .or_else(|| exports::prototype_exported(graph, decl))
        .or_else(|| exports::this_property_exported(graph, decl))?;

    let mut method = CallStep::new(CallKind::Method);
    method.prop = export.prop_name.clone();
    method.fn_name = Some(export.fn_node_name.clone());
    method.fn_node = Some(decl);

    if !export.is_function {
        return Some(vec![method]);
    }
    let mut ctor = CallStep::new(CallKind::New);
    ctor.fn_name = Some(export.obj_name.clone());
    ctor.fn_node = export.source.or(Some(decl));
    Some(vec![ctor, method])
}

/// All call paths from an externally reachable entry point down to `decl`,
/// innermost last. A function reachable from two entry points yields two
/// paths. Cycles in the call/return graph are cut by the visited list.
pub fn find_call_path(
    graph: &MdgGraph,
    cg: &CallGraph,
    decl: NodeId,
    visited: &mut Vec<NodeId>,
    main_file: &str,
    vuln_type: &str,
) -> Vec<Vec<CallStep>> {
    if visited.contains(&decl) {
        return Vec::new();
    }
    visited.push(decl);

    // A function whose recorded file differs from the entry file cannot be
    // the entry point itself; one without a recorded file still can.
    let in_main_file = function_source_file(graph, decl)
        .map(|fname| fname == main_file)
        .unwrap_or(true);
    if in_main_file {
        if vuln_type == "path-traversal" {
            if let Some(port) = server_initialization_port(main_file) {
                let mut step = CallStep::new(CallKind::ServerInitialization);
                step.fn_name = Some(main_file.to_string());
                step.port = Some(port);
                return vec![vec![step]];
            }
        }
        if let Some(path) = get_exported_type(graph, decl) {
            return vec![path];
        }
        if exports::called_at_top_level(graph, cg, decl) {
            let mut step = CallStep::new(CallKind::TopLevel);
            step.fn_name = graph.node(decl).identifier_name.clone();
            step.fn_node = Some(decl);
            return vec![vec![step]];
        }
    }

    let mut call_paths: Vec<Vec<CallStep>> = Vec::new();

    // Callers replace the head of the path.
    for caller in exports::function_is_called(graph, cg, decl) {
        if caller == decl {
            continue;
        }
        call_paths.extend(find_call_path(graph, cg, caller, visited, main_file, vuln_type));
    }

    // Returners extend the path: the entry point is invoked, its return
    // value is then called.
    for returner in exports::function_is_returned(graph, cg, decl) {
        let origin = returner.export.source.unwrap_or(returner.decl);
        let mut inner = find_call_path(graph, cg, origin, visited, main_file, vuln_type);
        let step = return_step(&returner.export, decl);
        for path in &mut inner {
            path.push(step.clone());
        }
        call_paths.extend(inner);
    }
    call_paths
}

fn return_step(export: &exports::PropertyExport, decl: NodeId) -> CallStep {
    let mut step = match (&export.prop_name, export.is_function) {
        (None, _) => CallStep::new(CallKind::Call),
        (Some(_), true) => CallStep::new(CallKind::New),
        (Some(_), false) => CallStep::new(CallKind::Method),
    };
    step.prop = export.prop_name.clone();
    step.fn_name = Some(export.obj_name.clone());
    step.fn_node = Some(decl);
    step
}

/// File recorded on the function expression the declaration initializes.
fn function_source_file(graph: &MdgGraph, decl: NodeId) -> Option<String> {
    graph
        .targets_where(decl, |e| e.relation.is_ast(&AstRole::Init))
        .find(|&n| graph.node(n).kind.is_function_expression())
        .and_then(|n| graph.node(n).location())
        .map(|loc| loc.fname)
}

/// Entry-point shape of one call path.
pub fn classify_path(path: &[CallStep]) -> &'static str {
    match path {
        [only] => match only.kind {
            CallKind::Call => "VFunExported",
            CallKind::Method => "VFunPropOfExportedObj",
            CallKind::New => "VNewCall",
            CallKind::ServerInitialization => "VServerInitialization",
            CallKind::TopLevel => "VTopLevel",
        },
        [first, ..] => match first.kind {
            CallKind::New => "VNewCall",
            CallKind::Call | CallKind::Method => "VFunRetByExport",
            _ => "unknown",
        },
        [] => "unknown",
    }
}

/// Reconstructed parameter types per function name appearing in any path.
/// Reconstruction runs once per function.
fn get_function_args(
    graph: &MdgGraph,
    config: &Config,
    call_paths: &[Vec<CallStep>],
    cx: ReconContext<'_>,
) -> BTreeMap<String, (Vec<String>, TypeNode)> {
    let mut map = BTreeMap::new();
    for step in call_paths.iter().flatten() {
        if step.kind == CallKind::ServerInitialization {
            continue;
        }
        let (Some(fn_name), Some(fn_node)) = (&step.fn_name, step.fn_node) else {
            continue;
        };
        if map.contains_key(fn_name) {
            continue;
        }
        let reconstructed = recon::reconstruct_param_types(graph, fn_node, cx, config);
        map.insert(fn_name.clone(), reconstructed);
    }
    map
}

/// Render one call-path element as the source expression used in the
/// report. Depth 0 is the outermost entry point.
fn build_call(
    step: &CallStep,
    function_args: &BTreeMap<String, (Vec<String>, TypeNode)>,
    depth: usize,
) -> TaintSummaryCall {
    if depth == 0 && step.kind == CallKind::ServerInitialization {
        return TaintSummaryCall {
            source: String::new(),
            params_types: serde_json::json!({}),
            tainted_params: Vec::new(),
            returns: None,
        };
    }

    let source = if depth == 0 {
        match (step.kind, &step.prop) {
            (CallKind::Call, _) => "module.exports".to_string(),
            (CallKind::Method, Some(prop)) => format!("module.exports.{prop}"),
            (CallKind::Method, None) => "module.exports".to_string(),
            (CallKind::New, None) => "new module.exports".to_string(),
            (CallKind::New, Some(prop)) => format!("new module.exports.{prop}"),
            (CallKind::TopLevel, _) => step.fn_name.clone().unwrap_or_default(),
            (CallKind::ServerInitialization, _) => String::new(),
        }
    } else {
        match (step.kind, &step.prop) {
            (CallKind::Method, Some(prop)) => format!(".{prop}"),
            (CallKind::New, _) => "new".to_string(),
            _ => String::new(),
        }
    };

    let (tainted_params, params_types) = step
        .fn_name
        .as_ref()
        .and_then(|name| function_args.get(name))
        .map(|(names, tree)| {
            (
                names.clone(),
                serde_json::to_value(tree).unwrap_or_default(),
            )
        })
        .unwrap_or((Vec::new(), serde_json::json!({})));

    TaintSummaryCall {
        source,
        params_types,
        tainted_params,
        returns: None,
    }
}

fn step_to_value(graph: &MdgGraph, step: &CallStep) -> serde_json::Value {
    let mut value = serde_json::Map::new();
    value.insert("type".to_string(), step.kind.as_str().into());
    if let Some(prop) = &step.prop {
        value.insert("prop".to_string(), prop.clone().into());
    }
    if let Some(fn_name) = &step.fn_name {
        value.insert("fn_name".to_string(), fn_name.clone().into());
    }
    if let Some(node) = step.fn_node {
        value.insert("fn_id".to_string(), graph.node(node).uid.clone().into());
    }
    if let Some(port) = step.port {
        value.insert("port".to_string(), port.into());
    }
    serde_json::Value::Object(value)
}

/// Expand one detection into its full vulnerability records: one per call
/// path, with source, tainted parameters, reconstructed types, and the
/// nested return protocol.
pub fn get_vulnerability_info(
    graph: &MdgGraph,
    cg: &CallGraph,
    detection: &Detection,
    main_file: &str,
    config: &Config,
) -> Vec<VulnRecord> {
    let Some(sink_node) = detection.sink_node else {
        tracing::warn!("detection carries no sink anchor; keeping base record");
        return vec![detection.record.clone()];
    };
    let Some(parent) = cg.enclosing_function(graph, sink_node) else {
        tracing::warn!("Unable to detect sink function.");
        return vec![detection.record.clone()];
    };

    let mut visited = Vec::new();
    let call_paths = find_call_path(
        graph,
        cg,
        parent,
        &mut visited,
        main_file,
        &detection.record.vuln_type,
    );
    if call_paths.is_empty() {
        tracing::warn!("Module not exported as expected.");
        return vec![detection.record.clone()];
    }

    let recon_cx = ReconContext {
        vuln_type: &detection.record.vuln_type,
        polluted_object: detection.polluted_object,
        polluting_value: detection.polluting_value,
    };
    let function_args = get_function_args(graph, config, &call_paths, recon_cx);
    build_taint_summary(graph, detection, &call_paths, &function_args, main_file)
}

fn build_taint_summary(
    graph: &MdgGraph,
    detection: &Detection,
    call_paths: &[Vec<CallStep>],
    function_args: &BTreeMap<String, (Vec<String>, TypeNode)>,
    main_file: &str,
) -> Vec<VulnRecord> {
    let mut records = Vec::new();
    for path in call_paths {
        // Build the protocol from the innermost call outward.
        let mut current: Option<TaintSummaryCall> = None;
        for (position, step) in path.iter().enumerate().rev() {
            let mut call = build_call(step, function_args, position);
            if let Some(inner) = current.take() {
                call.returns = Some(Box::new(inner));
            }
            current = Some(call);
        }
        let Some(entry) = current else {
            continue;
        };

        let shape = classify_path(path);
        let mut record = detection.record.clone();
        record.shape = Some(shape.to_string());
        record.filename = Some(main_file.to_string());
        record.source = Some(entry.source);
        record.source_lineno = detection.source_lineno;
        record.tainted_params = Some(entry.tainted_params);
        record.params_types = Some(entry.params_types);
        if let Some(returns) = entry.returns {
            record.returns = serde_json::to_value(&returns).ok();
        }
        if shape == "VServerInitialization" {
            if let Some(port) = path.first().and_then(|s| s.port) {
                record.client = Some(serde_json::json!({"type": "GET", "port": port}));
            }
        }
        record.call_paths = Some(serde_json::Value::Array(
            path.iter().map(|s| step_to_value(graph, s)).collect(),
        ));
        records.push(record);
    }
    records
}
