//! Prototype-pollution matcher
//!
//! Structural pattern ("lookup-lookup-assign"): an object is read under a
//! dynamic key (wildcard `SO`), mutated under a dynamic key (wildcard `NV`),
//! and the new version is read under a second dynamic key — the shape of
//! `a[k1][k2] = v`. The pattern extends across call boundaries through
//! transient `PARAMETER` edges so pollution inside a helper function is
//! still caught. A candidate is reported only when three taint paths are
//! simultaneously satisfiable: to the lookup key, to the assignment target,
//! and to the polluting value.

use super::{Detection, DetectionContext, Detector, DetectorMetadata, QueryMode};
use crate::graph::{
    EdgeRelation, EdgeSelector, MdgGraph, NodeId, NodeKind, PdgRel, RefRole, ScratchSession, Walk,
};
use crate::report::{code_line_from_file, LineNo, VulnRecord};
use std::collections::{HashMap, HashSet};

pub struct PrototypePollutionDetector {
    metadata: DetectorMetadata,
}

impl PrototypePollutionDetector {
    pub fn new() -> Self {
        Self {
            metadata: DetectorMetadata {
                id: "proto-pollution",
                name: "prototype-pollution",
                description: "Attacker-controlled keys and value reach a nested dynamic assignment",
                vuln_types: &["prototype-pollution"],
            },
        }
    }
}

impl Default for PrototypePollutionDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The lookup-lookup-assign triple plus the base object it starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Candidate {
    base: NodeId,
    first_lookup: NodeId,
    assignment: NodeId,
    second_lookup: NodeId,
}

impl Detector for PrototypePollutionDetector {
    fn metadata(&self) -> &DetectorMetadata {
        &self.metadata
    }

    fn find_vulnerable_paths(&self, cx: &mut DetectionContext<'_>) -> Vec<Detection> {
        // Transient argument-to-parameter shortcuts for the cross-call
        // pattern; removed before this pass returns, on every path out.
        let mut scratch = ScratchSession::begin();
        scratch.link_parameters(cx.graph);
        let detections = run_pass(cx);
        scratch.finish(cx.graph);
        debug_assert_eq!(cx.graph.parameter_edge_count(), 0);
        detections
    }
}

fn run_pass(cx: &mut DetectionContext<'_>) -> Vec<Detection> {
    let candidates = collect_candidates(cx.graph);
    tracing::debug!(count = candidates.len(), "pollution pattern candidates");

    let mut detections: Vec<Detection> = Vec::new();
    let mut seen: HashSet<(String, String, String, String)> = HashSet::new();

    for candidate in candidates {
        if !taint_reaches_key(cx.graph, candidate.first_lookup) {
            continue;
        }
        if !taint_reaches_assignment(cx.graph, candidate.assignment) {
            continue;
        }
        let values = tainted_values(cx.graph, candidate.second_lookup);
        if values.is_empty() {
            continue;
        }

        if cx.mode == QueryMode::BottomUpGreedy && !confirm_triple(cx, &candidate, values[0]) {
            continue;
        }

        for value in values {
            let Some(mut detection) = build_detection(cx, &candidate, value) else {
                continue;
            };
            if seen.insert(detection.record.dedup_key()) {
                detection.polluted_object = Some(candidate.base);
                detection.polluting_value = Some(value);
                cx.flush(&detection.record);
                detections.push(detection);
            }
        }
    }
    detections
}

/// Match the wildcard lookup/mutation/lookup triple, directly or across
/// call boundaries through `ARG`/`PARAMETER` chains.
fn collect_candidates(graph: &MdgGraph) -> Vec<Candidate> {
    let so_wildcard = EdgeSelector::so_wildcard();
    let nv_wildcard = EdgeSelector::nv_wildcard();
    let cross_call = Walk::one_or_more(EdgeSelector::call_binding());

    let mut candidates = Vec::new();
    let mut dedup = HashSet::new();

    for base in graph.nodes_of_kind(&NodeKind::PdgObject) {
        for first in graph.outgoing(base).filter(|e| so_wildcard.matches(e)) {
            let sub_obj = first.to;

            // Mutation sites: the looked-up object itself, or any object
            // it is bound to through a call chain.
            let mut mutation_sites = vec![sub_obj];
            mutation_sites.extend(cross_call.targets(graph, sub_obj, |n| {
                n.kind == NodeKind::PdgObject
            }));

            for site in mutation_sites {
                for nv in graph.outgoing(site).filter(|e| nv_wildcard.matches(e)) {
                    let assignment = nv.to;
                    for second in graph
                        .outgoing(assignment)
                        .filter(|e| so_wildcard.matches(e))
                    {
                        let candidate = Candidate {
                            base,
                            first_lookup: sub_obj,
                            assignment,
                            second_lookup: second.to,
                        };
                        if dedup.insert((sub_obj, assignment, second.to)) {
                            candidates.push(candidate);
                        }
                    }
                }
            }
        }
    }
    candidates
}

/// A taint source reaches the first lookup object over `{SO,ARG,DEP}`.
fn taint_reaches_key(graph: &MdgGraph, first_lookup: NodeId) -> bool {
    let walk = Walk::one_or_more(EdgeSelector::taint_step());
    taint_targets(graph)
        .any(|key| walk.reaches(graph, key, |n| n.id == first_lookup))
}

/// A taint source reaches the mutated version over `{SO,ARG,DEP}`.
fn taint_reaches_assignment(graph: &MdgGraph, assignment: NodeId) -> bool {
    let walk = Walk::one_or_more(EdgeSelector::taint_step());
    taint_targets(graph).any(|sub_key| walk.reaches(graph, sub_key, |n| n.id == assignment))
}

/// Taint-fed objects whose value flows into the assigned property:
/// `value -{SO,ARG,DEP}*-> dep -DEP-> property`. These are the polluting
/// values.
fn tainted_values(graph: &MdgGraph, second_lookup: NodeId) -> Vec<NodeId> {
    let deps: Vec<NodeId> = graph
        .sources_where(second_lookup, |e| {
            e.relation == EdgeRelation::Pdg(PdgRel::Dep)
        })
        .collect();
    if deps.is_empty() {
        return Vec::new();
    }
    let walk = Walk::zero_or_more(EdgeSelector::taint_step());
    let mut values = Vec::new();
    for value in taint_targets(graph) {
        if deps
            .iter()
            .any(|&dep| walk.reaches(graph, value, |n| n.id == dep))
        {
            values.push(value);
        }
    }
    values
}

fn taint_targets(graph: &MdgGraph) -> impl Iterator<Item = NodeId> + '_ {
    graph
        .nodes_of_kind(&NodeKind::TaintSource)
        .flat_map(move |source| {
            graph.targets_where(source, |e| e.relation == EdgeRelation::Pdg(PdgRel::Taint))
        })
}

/// Bottom-up confirmation of the three related sinks: the key feeding the
/// first lookup, the sub-key feeding the mutation, and the polluting value
/// must each be reachable from some confirmed-tainted function parameter.
/// An all-exported triple short-circuits.
fn confirm_triple(cx: &mut DetectionContext<'_>, candidate: &Candidate, value: NodeId) -> bool {
    let dep = |graph: &MdgGraph, node: NodeId| {
        graph
            .sources_where(node, |e| e.relation == EdgeRelation::Pdg(PdgRel::Dep))
            .next()
            .unwrap_or(node)
    };
    let key = dep(cx.graph, candidate.first_lookup);
    let sub_key = dep(cx.graph, candidate.assignment);
    let targets = [key, sub_key, value];

    if targets.iter().all(|&t| cx.graph.node(t).is_exported) {
        return true;
    }

    let mut scratch = ScratchSession::begin();
    scratch.mark_pollution_sinks(cx.graph, &targets);

    // Joint satisfiability, tracked per target node.
    let mut confirmed: HashMap<NodeId, bool> = HashMap::new();
    for target in targets {
        let ok = object_is_tainted(cx, target);
        confirmed.insert(target, ok);
        if !ok {
            break;
        }
    }

    scratch.finish(cx.graph);
    targets.iter().all(|t| confirmed.get(t).copied().unwrap_or(false))
}

/// Whether some function parameter flows into the marked node over
/// validity-gated PDG edges, with the flow confirmed through the call
/// graph.
fn object_is_tainted(cx: &mut DetectionContext<'_>, target: NodeId) -> bool {
    let walk = Walk::zero_or_more(EdgeSelector::unbroken_pdg());
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
            let graph: &MdgGraph = cx.graph;
            if !walk.reaches(graph, param, |n| {
                n.id == target && graph.is_pollution_sink(target)
            }) {
                continue;
            }
            if cx.propagator.confirm_vulnerability(graph, function, param) {
                return true;
            }
        }
    }
    false
}

/// Resolve the AST anchors of one accepted candidate and assemble its
/// record. The statement holding the assignment is found through the `REF`
/// predecessor of the assigned property; the taint source statement through
/// the `REF` predecessor of the polluting value.
fn build_detection(
    cx: &DetectionContext<'_>,
    candidate: &Candidate,
    value: NodeId,
) -> Option<Detection> {
    let graph: &MdgGraph = cx.graph;
    // The statement anchor is the node holding the value under its `obj`
    // role; a `param` REF would name the declaring function instead.
    let ref_pred = |node: NodeId| {
        graph
            .sources_where(node, |e| e.relation.is_ref(RefRole::Obj))
            .next()
            .or_else(|| {
                graph
                    .sources_where(node, |e| matches!(e.relation, EdgeRelation::Ref(_)))
                    .next()
            })
    };
    let Some(assignment_cfg) = ref_pred(candidate.second_lookup) else {
        tracing::warn!("pollution candidate without an assignment statement; skipping");
        return None;
    };
    let source_cfg = ref_pred(value);

    let sink_lineno =
        LineNo::from_location(graph.node(assignment_cfg).location().map(|l| l.start.line));
    let sink_line = match sink_lineno {
        LineNo::Line(line) => code_line_from_file(cx.source_file, line)
            .unwrap_or_else(|| graph.node(assignment_cfg).name().to_string()),
        LineNo::Unknown => graph.node(assignment_cfg).name().to_string(),
    };

    let mut record = VulnRecord::base("prototype-pollution", sink_line, sink_lineno);
    record.file = Some(cx.source_file.to_string());

    let mut detection = Detection::new(record);
    detection.sink_node = Some(assignment_cfg);
    detection.source_lineno = source_cfg
        .and_then(|cfg| graph.node(cfg).location())
        .map(|l| l.start.line);
    Some(detection)
}
