//! Vulnerability pattern matchers
//!
//! Each detector encodes the structural graph pattern of one vulnerability
//! class, runs it against the MDG, and filters candidates by confirmed
//! taint propagation. Detectors share one contract and run under a query
//! mode: `Intra` accepts structural matches as-is (cheap, more false
//! positives), `BottomUpGreedy` re-confirms every candidate through the
//! call-graph propagator.

pub mod injection;
pub mod proto_pollution;

pub use injection::InjectionDetector;
pub use proto_pollution::PrototypePollutionDetector;

use crate::config::Config;
use crate::graph::{MdgGraph, NodeId};
use crate::report::{IntermediateWriter, VulnRecord};
use crate::taint::TaintPropagator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    /// Single structural pass, no cross-procedure confirmation.
    Intra,
    /// Every structural candidate is confirmed through the call graph.
    #[default]
    BottomUpGreedy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorMetadata {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Vulnerability types this detector can report.
    pub vuln_types: &'static [&'static str],
}

/// Everything a detector needs for one pass over the graph.
pub struct DetectionContext<'a> {
    pub graph: &'a mut MdgGraph,
    pub propagator: &'a mut TaintPropagator,
    pub config: &'a Config,
    pub mode: QueryMode,
    /// The original (non-normalized) source file; sink line text is read
    /// from it.
    pub source_file: &'a str,
    pub intermediate: Option<&'a IntermediateWriter>,
}

impl DetectionContext<'_> {
    /// Flush an accepted candidate to the intermediate output. Write
    /// failures are logged, never fatal to the pass.
    pub fn flush(&self, record: &VulnRecord) {
        if let Some(writer) = self.intermediate {
            if let Err(err) = writer.append(record) {
                tracing::warn!(%err, "could not flush intermediate output");
            }
        }
    }
}

/// A confirmed structural match, with the graph anchors reconstruction
/// needs.
#[derive(Debug, Clone)]
pub struct Detection {
    pub record: VulnRecord,
    /// Statement node containing the sink; anchor for the parent-function
    /// lookup during call-path reconstruction.
    pub sink_node: Option<NodeId>,
    pub source_lineno: Option<u32>,
    /// Pollution only: the object whose prototype is reached.
    pub polluted_object: Option<NodeId>,
    /// Pollution only: the attacker-controlled assigned value.
    pub polluting_value: Option<NodeId>,
}

impl Detection {
    pub fn new(record: VulnRecord) -> Self {
        Self {
            record,
            sink_node: None,
            source_lineno: None,
            polluted_object: None,
            polluting_value: None,
        }
    }
}

pub trait Detector {
    fn metadata(&self) -> &DetectorMetadata;
    fn find_vulnerable_paths(&self, cx: &mut DetectionContext<'_>) -> Vec<Detection>;
}

pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(InjectionDetector::new()));
        registry.register(Box::new(PrototypePollutionDetector::new()));
        registry
    }

    pub fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn detectors(&self) -> impl Iterator<Item = &dyn Detector> {
        self.detectors.iter().map(|d| d.as_ref())
    }

    pub fn get(&self, id: &str) -> Option<&dyn Detector> {
        self.detectors
            .iter()
            .find(|d| d.metadata().id == id)
            .map(|d| d.as_ref())
    }

    /// Run every detector in sequence. The propagation memo is cleared
    /// between detectors: their top-level taint queries are independent.
    pub fn run_all(&self, cx: &mut DetectionContext<'_>) -> Vec<Detection> {
        let mut detections = Vec::new();
        for detector in &self.detectors {
            tracing::info!(detector = detector.metadata().name, "running detector");
            cx.propagator.reset();
            detections.extend(detector.find_vulnerable_paths(cx));
        }
        detections
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
