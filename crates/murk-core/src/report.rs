//! Vulnerability records and the taint summary
//!
//! The final output is a JSON array with one object per confirmed
//! vulnerability. An intermediate file of the same shape is flushed after
//! every accepted candidate so that a crash leaves partial results on disk.

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to write report '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A sink line number, or `"?"` when the node carried no usable location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineNo {
    Line(u32),
    Unknown,
}

impl LineNo {
    pub fn from_location(line: Option<u32>) -> Self {
        match line {
            Some(line) => LineNo::Line(line),
            None => LineNo::Unknown,
        }
    }
}

impl Serialize for LineNo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LineNo::Line(line) => serializer.serialize_u32(*line),
            LineNo::Unknown => serializer.serialize_str("?"),
        }
    }
}

impl std::fmt::Display for LineNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineNo::Line(line) => write!(f, "{line}"),
            LineNo::Unknown => f.write_str("?"),
        }
    }
}

/// One confirmed vulnerability. Detection-time records carry only the base
/// fields; reconstruction fills in source, parameter shapes and call paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VulnRecord {
    /// Entry-point shape (`VFunExported`, ...); present after reconstruction.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub vuln_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub sink: String,
    pub sink_lineno: LineNo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tainted_params: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params_types: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_paths: Option<serde_json::Value>,
}

impl VulnRecord {
    pub fn base(vuln_type: impl Into<String>, sink: impl Into<String>, sink_lineno: LineNo) -> Self {
        Self {
            shape: None,
            filename: None,
            vuln_type: vuln_type.into(),
            file: None,
            sink: sink.into(),
            sink_lineno,
            source: None,
            source_lineno: None,
            tainted_params: None,
            params_types: None,
            returns: None,
            client: None,
            call_paths: None,
        }
    }

    /// Structural identity for deduplication: two records with the same
    /// vulnerability type, file, sink text and sink line are one finding.
    pub fn dedup_key(&self) -> (String, String, String, String) {
        (
            self.vuln_type.clone(),
            self.file
                .clone()
                .or_else(|| self.filename.clone())
                .unwrap_or_default(),
            self.sink.clone(),
            self.sink_lineno.to_string(),
        )
    }
}

/// The final report: an ordered set of records, deduplicated structurally.
#[derive(Debug, Default, Clone)]
pub struct TaintSummary {
    records: Vec<VulnRecord>,
}

impl TaintSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless a structurally identical record is already present.
    pub fn push_unique(&mut self, record: VulnRecord) -> bool {
        if self.records.iter().any(|r| r == &record) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Drop records that repeat an earlier record's dedup key.
    pub fn dedup_structural(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.records.retain(|r| seen.insert(r.dedup_key()));
    }

    pub fn records(&self) -> &[VulnRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(&self.records)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let mut json = self.to_json()?;
        json.push('\n');
        std::fs::write(path, json).map_err(|e| ReportError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

impl Serialize for TaintSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.records.len()))?;
        for record in &self.records {
            seq.serialize_element(record)?;
        }
        seq.end()
    }
}

/// Flushes each accepted candidate to disk before detection continues, so
/// partial results survive a crash.
#[derive(Debug)]
pub struct IntermediateWriter {
    path: PathBuf,
}

impl IntermediateWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn init(&self) -> Result<(), ReportError> {
        std::fs::write(&self.path, "[]\n").map_err(|e| ReportError::Write {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Read-modify-write append; duplicates are dropped.
    pub fn append(&self, record: &VulnRecord) -> Result<(), ReportError> {
        let mut records: Vec<serde_json::Value> = match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let value = serde_json::to_value(record)?;
        if !records.contains(&value) {
            records.push(value);
        }
        let mut json = serde_json::to_string_pretty(&records)?;
        json.push('\n');
        std::fs::write(&self.path, json).map_err(|e| ReportError::Write {
            path: self.path.clone(),
            source: e,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sink line text from the original source file, 1-indexed, trimmed of
/// leading whitespace and the trailing newline.
pub fn code_line_from_file(path: &str, lineno: u32) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content
        .lines()
        .nth(lineno.saturating_sub(1) as usize)
        .map(|line| line.trim_start().to_string())
}
