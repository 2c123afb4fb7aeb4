//! CLI subcommands

pub mod explain;
pub mod scan;

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a Module Dependency Graph for taint-style vulnerabilities
    Scan(scan::ScanArgs),
    /// Show what a detector looks for
    Explain(explain::ExplainArgs),
}
