//! Call-path properties over the full pipeline: a sink reachable from two
//! exported entry points must produce two distinct summary entries.

mod common;

use common::{write_source, GraphBuilder};
use murk_core::{AnalysisEngine, Config};

fn source_lines() -> Vec<&'static str> {
    vec![
        "function run(x) { eval(x); }",
        "module.exports.first = function (a) { run(a); };",
        "module.exports.second = function (b) { run(b); };",
    ]
}

/// `run` is called from two directly exported wrappers, each with a
/// tainted parameter feeding the call.
fn two_entry_points(source: &str) -> GraphBuilder {
    let mut b = GraphBuilder::new();
    let run = b.function("run");
    b.function_ast(run, source, 1);
    let x = b.param(run, "x", 1);
    b.sink(x, "eval", "cfg_run", source, 1);

    for (name, line) in [("first", 2), ("second", 3)] {
        let wrapper = b.function(name);
        b.function_ast(wrapper, source, line);
        b.export_directly(wrapper);
        let param = b.param(wrapper, "a", 1);
        b.taint(param);
        let call = b.call(wrapper, run, &format!("call_{name}"));
        b.bind_arg(param, call, "x");
    }
    b
}

#[test]
fn sink_behind_two_entry_points_yields_two_summary_entries() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "app.js", &source_lines());
    let b = two_entry_points(&source);

    let mut engine =
        AnalysisEngine::new(b.graph, Config::builtin()).with_reconstruction(true);
    let summary = engine.analyze(&source, None);

    assert_eq!(
        summary.len(),
        2,
        "one record per distinct call path: {:?}",
        summary.records()
    );
    let paths: Vec<_> = summary
        .records()
        .iter()
        .map(|r| r.call_paths.clone().unwrap())
        .collect();
    assert_ne!(paths[0], paths[1], "call paths reference distinct entries");
    for record in summary.records() {
        assert_eq!(record.shape.as_deref(), Some("VFunExported"));
        assert_eq!(record.vuln_type, "code-injection");
    }
}

#[test]
fn without_reconstruction_the_sink_is_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "app.js", &source_lines());
    let b = two_entry_points(&source);

    let mut engine = AnalysisEngine::new(b.graph, Config::builtin());
    let summary = engine.analyze(&source, None);
    assert_eq!(summary.len(), 1);
}
