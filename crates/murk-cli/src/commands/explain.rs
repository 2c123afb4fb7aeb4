//! Explain command - describes a detector and its vulnerability classes

use anyhow::Result;
use clap::Args;
use murk_core::DetectorRegistry;

#[derive(Args, Debug)]
pub struct ExplainArgs {
    /// Detector id (e.g. "injection", "proto-pollution")
    #[arg(value_name = "DETECTOR")]
    pub detector_id: String,
}

impl ExplainArgs {
    pub fn run(&self) -> Result<()> {
        let registry = DetectorRegistry::with_defaults();
        match registry.get(&self.detector_id) {
            Some(detector) => {
                let metadata = detector.metadata();
                println!("{} ({})", metadata.name, metadata.id);
                println!("  {}", metadata.description);
                println!("  Reports: {}", metadata.vuln_types.join(", "));
                Ok(())
            }
            None => {
                println!("Unknown detector '{}'. Available detectors:", self.detector_id);
                for detector in registry.detectors() {
                    println!("  {} - {}", detector.metadata().id, detector.metadata().description);
                }
                Ok(())
            }
        }
    }
}
