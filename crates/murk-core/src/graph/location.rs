//! Source locations attached to MDG nodes
//!
//! Locations arrive as JSON strings inside the `Location` CSV column.
//! Malformed or missing location data is never an error: consumers fall
//! back to a `"?"` placeholder for line numbers.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SourcePosition {
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// Position and originating file of a node, as recorded by the MDG parser.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceLocation {
    pub start: SourcePosition,
    #[serde(default)]
    pub end: Option<SourcePosition>,
    /// Originating filename (the parser records the original, pre-normalization path).
    pub fname: String,
}

impl SourceLocation {
    /// Parse a `Location` JSON payload, degrading to `None` on any defect.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw?;
        if raw.is_empty() {
            return None;
        }
        serde_json::from_str(raw).ok()
    }
}
