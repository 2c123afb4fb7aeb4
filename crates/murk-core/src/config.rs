//! Analysis configuration
//!
//! A JSON document supplies the per-vulnerability-class sink tables, the
//! built-in function argument-type signatures, and the prototype method
//! lists used by type inference. The `sinks` and `sources` sections are
//! mandatory: their absence is a fatal error raised before any query runs.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid JSON in '{path}': {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Config file is missing the {section}")]
    MissingSection { section: &'static str },
}

/// One entry of a sink table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SinkEntry {
    pub sink: String,
    /// 1-indexed dangerous argument position.
    #[serde(default)]
    pub arg: Option<u32>,
    /// `"new"` marks constructor sinks (`new Function(...)`).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Module that must be required for the sink to apply.
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub packages: Option<Vec<String>>,
}

impl SinkEntry {
    pub fn is_new_sink(&self) -> bool {
        self.kind.as_deref() == Some("new")
    }
}

/// Argument-type signature of a Node.js built-in.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FunctionSignature {
    pub args_types: Vec<String>,
    /// Trailing arguments beyond the signature reuse the first type.
    #[serde(rename = "rest?", default)]
    pub rest: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Prototypes {
    pub array: Vec<String>,
    pub string: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    sinks: Option<HashMap<String, Vec<SinkEntry>>>,
    sources: Option<Vec<String>>,
    #[serde(rename = "functions-signatures", default)]
    functions_signatures: HashMap<String, FunctionSignature>,
    #[serde(default)]
    prototypes: Prototypes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Vulnerability type -> sink entries.
    pub sinks: HashMap<String, Vec<SinkEntry>>,
    pub sources: Vec<String>,
    pub functions_signatures: HashMap<String, FunctionSignature>,
    pub prototypes: Prototypes,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        let sinks = raw
            .sinks
            .ok_or(ConfigError::MissingSection { section: "sinks" })?;
        let sources = raw
            .sources
            .ok_or(ConfigError::MissingSection { section: "sources" })?;
        Ok(Self {
            sinks,
            sources,
            functions_signatures: raw.functions_signatures,
            prototypes: raw.prototypes,
        })
    }

    /// Stock sink/signature tables; lets the engine run without an external
    /// config file.
    pub fn builtin() -> Self {
        let content = include_str!("builtin_config.json");
        Self::from_json(content).expect("builtin config is well-formed")
    }

    /// Every sink name across all vulnerability classes.
    pub fn sink_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .sinks
            .values()
            .flatten()
            .map(|entry| entry.sink.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn is_sink(&self, name: &str) -> bool {
        self.sinks
            .values()
            .flatten()
            .any(|entry| entry.sink == name)
    }

    /// Vulnerability type a sink identifier belongs to.
    pub fn injection_type(&self, sink_name: &str) -> Option<&str> {
        for (vuln_type, entries) in &self.sinks {
            if entries.iter().any(|entry| entry.sink == sink_name) {
                return Some(vuln_type);
            }
        }
        None
    }

    /// Sinks reached through a constructor call.
    pub fn new_sinks(&self) -> impl Iterator<Item = &SinkEntry> {
        self.sinks.values().flatten().filter(|e| e.is_new_sink())
    }

    /// Sinks gated on a required package.
    pub fn package_sinks(&self) -> impl Iterator<Item = &SinkEntry> {
        self.sinks
            .values()
            .flatten()
            .filter(|e| e.package.is_some() || e.packages.is_some())
    }

    pub fn signature(&self, function: &str) -> Option<&FunctionSignature> {
        self.functions_signatures.get(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_is_complete() {
        let config = Config::builtin();
        assert!(config.is_sink("eval"));
        assert!(config.is_sink("exec"));
        assert_eq!(config.injection_type("eval"), Some("code-injection"));
        assert_eq!(config.injection_type("exec"), Some("command-injection"));
        assert_eq!(config.injection_type("readFile"), Some("path-traversal"));
        assert!(!config.prototypes.array.is_empty());
        assert!(!config.prototypes.string.is_empty());
    }

    #[test]
    fn missing_sinks_is_fatal() {
        let err = Config::from_json(r#"{"sources": []}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingSection { section: "sinks" }
        ));
    }

    #[test]
    fn missing_sources_is_fatal() {
        let err = Config::from_json(r#"{"sinks": {}}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingSection { section: "sources" }
        ));
    }

    #[test]
    fn sink_entries_parse_kind_and_packages() {
        let config = Config::from_json(
            r#"{
                "sinks": {
                    "code-injection": [
                        {"sink": "Function", "arg": 1, "type": "new"},
                        {"sink": "exec", "arg": 1, "package": "child_process"}
                    ]
                },
                "sources": ["req"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.new_sinks().count(), 1);
        assert_eq!(config.package_sinks().count(), 1);
        assert!(config.is_sink("Function"));
    }

    #[test]
    fn signatures_support_rest_arguments() {
        let config = Config::from_json(
            r#"{
                "sinks": {},
                "sources": [],
                "functions-signatures": {
                    "join": {"args_types": ["string"], "rest?": true}
                }
            }"#,
        )
        .unwrap();

        let sig = config.signature("join").unwrap();
        assert!(sig.rest);
        assert_eq!(sig.args_types, vec!["string"]);
    }

    #[test]
    fn sink_names_are_sorted_and_deduplicated() {
        let config = Config::from_json(
            r#"{
                "sinks": {
                    "a": [{"sink": "exec"}, {"sink": "eval"}],
                    "b": [{"sink": "eval"}]
                },
                "sources": []
            }"#,
        )
        .unwrap();
        assert_eq!(config.sink_names(), vec!["eval", "exec"]);
    }
}
