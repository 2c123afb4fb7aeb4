//! Injection matcher
//!
//! Structural pattern: a function parameter's PDG object reaches a
//! `TAINT_SINK` through an unbroken PDG path (`ARG` edges admitted only
//! when marked valid by the propagator). The sink's containing statement is
//! joined to it by a `SINK` edge and carries the source location on its AST
//! node. Under `BottomUpGreedy` each candidate is additionally confirmed
//! through the call graph.

use super::{Detection, DetectionContext, Detector, DetectorMetadata, QueryMode};
use crate::graph::{EdgeRelation, EdgeSelector, MdgGraph, NodeId, NodeKind, RefRole, Walk};
use crate::report::{code_line_from_file, LineNo, VulnRecord};
use std::collections::HashSet;

pub struct InjectionDetector {
    metadata: DetectorMetadata,
}

impl InjectionDetector {
    pub fn new() -> Self {
        Self {
            metadata: DetectorMetadata {
                id: "injection",
                name: "injection",
                description: "Tainted data reaches a dangerous call (eval, exec, fs, ...)",
                vuln_types: &["code-injection", "command-injection", "path-traversal"],
            },
        }
    }
}

impl Default for InjectionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for InjectionDetector {
    fn metadata(&self) -> &DetectorMetadata {
        &self.metadata
    }

    fn find_vulnerable_paths(&self, cx: &mut DetectionContext<'_>) -> Vec<Detection> {
        let walk = Walk::one_or_more(EdgeSelector::unbroken_pdg());
        let mut detections: Vec<Detection> = Vec::new();
        let mut seen: HashSet<(String, String, String, String)> = HashSet::new();

        let functions: Vec<NodeId> = cx
            .graph
            .nodes_of_kind(&NodeKind::VariableDeclarator)
            .collect();
        for function in functions {
            let params: Vec<NodeId> = cx
                .graph
                .targets_where(function, |e| e.relation.is_ref(RefRole::Param))
                .collect();
            for param in params {
                let sinks =
                    walk.targets(cx.graph, param, |n| n.kind == NodeKind::TaintSink);
                if sinks.is_empty() {
                    continue;
                }
                if cx.mode == QueryMode::BottomUpGreedy {
                    let graph: &MdgGraph = cx.graph;
                    if !cx.propagator.confirm_vulnerability(graph, function, param) {
                        continue;
                    }
                }
                for sink in sinks {
                    let Some(detection) = build_detection(cx, sink) else {
                        continue;
                    };
                    if seen.insert(detection.record.dedup_key()) {
                        cx.flush(&detection.record);
                        detections.push(detection);
                    }
                }
            }
        }
        detections
    }
}

/// Assemble a record for one sink node. Missing location data degrades to
/// `"?"`; an unknown sink identifier drops the candidate.
fn build_detection(cx: &DetectionContext<'_>, sink: NodeId) -> Option<Detection> {
    let graph: &MdgGraph = cx.graph;
    let sink_name = graph.node(sink).name().to_string();
    let Some(vuln_type) = cx.config.injection_type(&sink_name) else {
        tracing::warn!(sink = %sink_name, "sink not present in config; skipping candidate");
        return None;
    };

    let sink_cfg = graph
        .sources_where(sink, |e| e.relation == EdgeRelation::Sink)
        .next();
    let sink_ast = sink_cfg.and_then(|cfg| {
        graph
            .targets_where(cfg, |e| matches!(e.relation, EdgeRelation::Ast(_)))
            .next()
    });

    let location = sink_ast.and_then(|ast| graph.node(ast).location());
    let (lineno, file) = match &location {
        Some(loc) => (LineNo::Line(loc.start.line), loc.fname.clone()),
        None => (LineNo::Unknown, cx.source_file.to_string()),
    };
    let sink_line = match lineno {
        LineNo::Line(line) => code_line_from_file(&file, line).unwrap_or_else(|| sink_name.clone()),
        LineNo::Unknown => sink_name.clone(),
    };

    let mut record = VulnRecord::base(vuln_type, sink_line, lineno);
    record.file = Some(file);

    let mut detection = Detection::new(record);
    detection.sink_node = sink_cfg.or(Some(sink));
    Some(detection)
}
