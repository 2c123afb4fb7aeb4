//! Murk core: graph-based taint analysis for JavaScript/Node.js
//!
//! The engine consumes a Module Dependency Graph (AST + CFG + call-graph +
//! PDG edges) produced by an external parser, detects injection and
//! prototype-pollution flows, and emits a taint summary with reconstructed
//! attacker-controlled parameter shapes and call paths.

pub mod config;
pub mod detect;
pub mod graph;
pub mod interaction;
pub mod names;
pub mod recon;
pub mod report;
pub mod taint;

pub use config::{Config, ConfigError};
pub use detect::{DetectionContext, Detector, DetectorRegistry, QueryMode};
pub use graph::{load_graph, LoadError, MdgGraph};
pub use report::{IntermediateWriter, ReportError, TaintSummary, VulnRecord};
pub use taint::TaintPropagator;

/// One analysis run over one graph: build the call-graph fixpoint, run the
/// detectors, optionally expand each detection into full vulnerability
/// records with reconstructed types and call paths.
///
/// Single-threaded by design: the engine holds the graph mutably for the
/// whole run, and transient graph state makes concurrent analyses against
/// one store unsafe.
pub struct AnalysisEngine {
    graph: MdgGraph,
    config: Config,
    registry: DetectorRegistry,
    mode: QueryMode,
    reconstruct: bool,
}

impl AnalysisEngine {
    pub fn new(graph: MdgGraph, config: Config) -> Self {
        Self {
            graph,
            config,
            registry: DetectorRegistry::with_defaults(),
            mode: QueryMode::default(),
            reconstruct: false,
        }
    }

    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable reconstruction of attacker-controlled data and call paths.
    pub fn with_reconstruction(mut self, reconstruct: bool) -> Self {
        self.reconstruct = reconstruct;
        self
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &MdgGraph {
        &self.graph
    }

    /// Run the full pipeline against `source_file` (the original,
    /// non-normalized entry file).
    pub fn analyze(
        &mut self,
        source_file: &str,
        intermediate: Option<&IntermediateWriter>,
    ) -> TaintSummary {
        let merged = self.graph.verify_linear_versioning();
        if !merged.is_empty() {
            tracing::warn!(
                count = merged.len(),
                "object version chains merge; the parser should version linearly"
            );
        }

        tracing::info!("building call graph");
        let mut propagator = TaintPropagator::process_cg(&mut self.graph);

        let detections = {
            let mut cx = DetectionContext {
                graph: &mut self.graph,
                propagator: &mut propagator,
                config: &self.config,
                mode: self.mode,
                source_file,
                intermediate,
            };
            self.registry.run_all(&mut cx)
        };
        tracing::info!(count = detections.len(), "detection complete");

        let mut summary = TaintSummary::new();
        if self.reconstruct {
            let cg = propagator.call_graph();
            for detection in &detections {
                let records = interaction::get_vulnerability_info(
                    &self.graph,
                    cg,
                    detection,
                    source_file,
                    &self.config,
                );
                for record in records {
                    summary.push_unique(record);
                }
            }
        } else {
            for detection in detections {
                summary.push_unique(detection.record);
            }
        }
        summary
    }
}
