//! Scan command - runs the detection pipeline over an exported MDG

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use murk_core::{load_graph, AnalysisEngine, Config, IntermediateWriter, QueryMode};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Structural matching only; no cross-procedure confirmation
    Intra,
    /// Confirm every candidate through the call graph (default)
    BottomUpGreedy,
}

impl From<ModeArg> for QueryMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Intra => QueryMode::Intra,
            ModeArg::BottomUpGreedy => QueryMode::BottomUpGreedy,
        }
    }
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Directory holding the exported graph (nodes.csv, rels.csv)
    #[arg(long, value_name = "DIR")]
    pub graph: PathBuf,

    /// Original JavaScript source file the graph was built from
    #[arg(long, value_name = "FILE")]
    pub file: PathBuf,

    /// Directory for the taint summary and intermediate output
    #[arg(short, long, value_name = "DIR", default_value = "murk-results")]
    pub output: PathBuf,

    /// Detection query mode
    #[arg(long, value_enum, default_value_t = ModeArg::BottomUpGreedy)]
    pub mode: ModeArg,

    /// Reconstruct attacker-controlled data and call paths
    #[arg(long)]
    pub reconstruct: bool,

    /// Path to a sink/signature configuration file (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the summary to stdout as JSON
    #[arg(long)]
    pub print: bool,
}

impl ScanArgs {
    pub fn run(&self) -> Result<()> {
        let config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::builtin(),
        };

        anyhow::ensure!(
            self.file.exists(),
            "Input file doesn't exist: {}",
            self.file.display()
        );
        let graph = load_graph(&self.graph)
            .with_context(|| format!("loading graph from {}", self.graph.display()))?;

        std::fs::create_dir_all(&self.output)
            .with_context(|| format!("creating output directory {}", self.output.display()))?;
        let summary_path = self.output.join("taint_summary.json");
        let intermediate = IntermediateWriter::new(self.output.join("taint_summary_detection.json"));
        intermediate.init()?;

        let source_file = self.file.to_string_lossy().to_string();
        let mut engine = AnalysisEngine::new(graph, config)
            .with_mode(self.mode.into())
            .with_reconstruction(self.reconstruct);
        let summary = engine.analyze(&source_file, Some(&intermediate));

        summary.save(&summary_path)?;
        if summary.is_empty() {
            println!("No vulnerabilities detected.");
        } else {
            println!(
                "Detected {} vulnerabilit{}.",
                summary.len(),
                if summary.len() == 1 { "y" } else { "ies" }
            );
        }
        println!("Taint summary written to {}", summary_path.display());

        if self.print {
            println!("{}", summary.to_json()?);
        }
        Ok(())
    }
}
