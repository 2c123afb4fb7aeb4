//! MDG import from the parser's CSV export
//!
//! The parser ships two files, `nodes.csv` and `rels.csv`, delimited by the
//! non-ASCII character `¿` (U+00BF) so that JavaScript source fragments in
//! the `Raw`/`Code` columns cannot collide with the separator. Loading is
//! idempotent per run: every load builds a fresh graph.

use super::{EdgeAttrs, EdgeRelation, MdgGraph, NodeAttrs, NodeKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const FIELD_DELIMITER: char = '\u{00BF}';
pub const NODES_FILE: &str = "nodes.csv";
pub const RELS_FILE: &str = "rels.csv";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read graph file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Graph file '{path}' is empty")]
    Empty { path: PathBuf },
    #[error("Graph file '{path}' is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: String },
}

/// Load `nodes.csv` and `rels.csv` from `dir` into a fresh graph.
pub fn load_graph(dir: &Path) -> Result<MdgGraph, LoadError> {
    let mut graph = MdgGraph::new();
    load_nodes(&mut graph, &dir.join(NODES_FILE))?;
    load_rels(&mut graph, &dir.join(RELS_FILE))?;
    tracing::info!(
        nodes = graph.node_count(),
        "graph loaded from {}",
        dir.display()
    );
    Ok(graph)
}

struct Header {
    columns: HashMap<String, usize>,
    path: PathBuf,
}

impl Header {
    fn parse(line: &str, path: &Path) -> Self {
        let columns = split_fields(line)
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();
        Self {
            columns,
            path: path.to_path_buf(),
        }
    }

    fn required(&self, column: &str) -> Result<usize, LoadError> {
        self.columns
            .get(column)
            .copied()
            .ok_or_else(|| LoadError::MissingColumn {
                path: self.path.clone(),
                column: column.to_string(),
            })
    }

    fn optional(&self, column: &str) -> Option<usize> {
        self.columns.get(column).copied()
    }
}

fn load_nodes(graph: &mut MdgGraph, path: &Path) -> Result<(), LoadError> {
    let records = read_records(path)?;
    let mut lines = records.iter();
    let header = Header::parse(
        lines.next().ok_or_else(|| LoadError::Empty {
            path: path.to_path_buf(),
        })?,
        path,
    );

    let id_col = header.required("Id:ID")?;
    let type_col = header.required("Type")?;
    let sub_type_col = header.optional("SubType");
    let context_col = header.optional("FunctionContext");
    let name_col = header.optional("IdentifierName");
    let raw_col = header.optional("Raw");
    let location_col = header.optional("Location");
    let code_col = header.optional("Code");

    for record in lines {
        let fields = split_fields(record);
        let Some(uid) = field(&fields, Some(id_col)) else {
            tracing::warn!("skipping node row without an id");
            continue;
        };
        let kind = NodeKind::parse(&field(&fields, Some(type_col)).unwrap_or_default());
        graph.add_node(
            uid,
            kind,
            NodeAttrs {
                sub_type: field(&fields, sub_type_col),
                function_context: field(&fields, context_col),
                identifier_name: field(&fields, name_col),
                raw: field(&fields, raw_col),
                code: field(&fields, code_col),
                location_raw: field(&fields, location_col),
            },
        );
    }
    Ok(())
}

fn load_rels(graph: &mut MdgGraph, path: &Path) -> Result<(), LoadError> {
    let records = read_records(path)?;
    let mut lines = records.iter();
    let header = Header::parse(
        lines.next().ok_or_else(|| LoadError::Empty {
            path: path.to_path_buf(),
        })?,
        path,
    );

    let from_col = header.required("FromId:START_ID")?;
    let to_col = header.required("ToId:END_ID")?;
    let label_col = header.required("RelationLabel:TYPE")?;
    let rel_type_col = header.optional("RelationType");
    let name_col = header.optional("IdentifierName");
    let arg_idx_col = header.optional("ArgumentIndex");
    let param_idx_col = header.optional("ParamIndex");
    let elem_idx_col = header.optional("ElementIndex");

    for record in lines {
        let fields = split_fields(record);
        let (Some(from_uid), Some(to_uid)) =
            (field(&fields, Some(from_col)), field(&fields, Some(to_col)))
        else {
            tracing::warn!("skipping relationship row without endpoint ids");
            continue;
        };
        let (Some(from), Some(to)) = (graph.node_by_uid(&from_uid), graph.node_by_uid(&to_uid))
        else {
            tracing::warn!(%from_uid, %to_uid, "skipping relationship with unknown endpoint");
            continue;
        };
        let label = field(&fields, Some(label_col)).unwrap_or_default();
        let rel_type = field(&fields, rel_type_col).unwrap_or_default();
        graph.add_edge(
            from,
            to,
            EdgeRelation::parse(&label, &rel_type),
            EdgeAttrs {
                identifier_name: field(&fields, name_col),
                argument_index: field(&fields, arg_idx_col).and_then(|v| v.parse().ok()),
                param_index: field(&fields, param_idx_col),
                element_index: field(&fields, elem_idx_col).and_then(|v| v.parse().ok()),
            },
        );
    }
    Ok(())
}

/// Read a CSV file as logical records: physical lines are merged while a
/// quoted field spans a line break (source code in `Raw`/`Code` may contain
/// newlines).
fn read_records(path: &Path) -> Result<Vec<String>, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut records = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        if current.matches('"').count() % 2 == 0 {
            if !current.trim().is_empty() {
                records.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if !current.trim().is_empty() {
        records.push(current);
    }
    Ok(records)
}

fn split_fields(record: &str) -> Vec<String> {
    record
        .split(FIELD_DELIMITER)
        .map(|f| unquote(f.trim()))
        .collect()
}

fn unquote(field: &str) -> String {
    let stripped = field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field);
    stripped.replace("\"\"", "\"")
}

/// Non-empty value of a column, when the column exists in the header.
fn field(fields: &[String], index: Option<usize>) -> Option<String> {
    let value = fields.get(index?)?;
    if value.is_empty() {
        None
    } else {
        Some(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PdgRel, RefRole};
    use std::io::Write;

    const D: char = FIELD_DELIMITER;

    fn write_graph_dir(nodes: &str, rels: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut f = std::fs::File::create(dir.path().join(NODES_FILE)).unwrap();
        f.write_all(nodes.as_bytes()).unwrap();
        let mut f = std::fs::File::create(dir.path().join(RELS_FILE)).unwrap();
        f.write_all(rels.as_bytes()).unwrap();
        dir
    }

    fn node_header() -> String {
        [
            "Id:ID",
            "Type",
            "SubType",
            "FunctionContext",
            "IdentifierName",
            "Raw",
            "InternalStructure",
            "Location",
            "Code",
        ]
        .join(&D.to_string())
    }

    fn rel_header() -> String {
        [
            "FromId:START_ID",
            "ToId:END_ID",
            "RelationLabel:TYPE",
            "RelationType",
            "IdentifierName",
            "ArgumentIndex",
            "ParamIndex",
            "StmtIndex",
            "ElementIndex",
            "ExpressionIndex",
            "MethodIndex",
            "SourceObjName",
            "IsProp",
        ]
        .join(&D.to_string())
    }

    #[test]
    fn loads_nodes_and_relationships() {
        let nodes = format!(
            "{}\n1{D}PDG_OBJECT{D}{D}f1{D}fn.a-v1{D}{D}{D}{D}\n2{D}TAINT_SINK{D}{D}f1{D}eval{D}{D}{D}{D}\n",
            node_header()
        );
        let rels = format!(
            "{}\n1{D}2{D}PDG{D}SO{D}*{D}{D}{D}{D}{D}{D}{D}{D}\n",
            rel_header()
        );
        let dir = write_graph_dir(&nodes, &rels);

        let graph = load_graph(dir.path()).unwrap();
        assert_eq!(graph.node_count(), 2);
        let a = graph.node_by_uid("1").unwrap();
        assert_eq!(graph.node(a).name(), "fn.a-v1");
        let edge = graph.outgoing(a).next().unwrap();
        assert_eq!(edge.relation, EdgeRelation::Pdg(PdgRel::So));
        assert!(edge.is_wildcard());
    }

    #[test]
    fn parses_ref_and_arg_relations() {
        let nodes = format!(
            "{}\n10{D}VariableDeclarator{D}{D}{D}f{D}{D}{D}{D}\n11{D}PDG_OBJECT{D}{D}{D}f.x-v1{D}{D}{D}{D}\n12{D}PDG_CALL{D}{D}{D}g(){D}{D}{D}{D}\n",
            node_header()
        );
        let rels = format!(
            "{}\n10{D}11{D}REF{D}param{D}x{D}{D}1{D}{D}{D}{D}{D}{D}\n11{D}12{D}PDG{D}ARG(y){D}g.y-v1{D}1{D}{D}{D}{D}{D}{D}{D}\n",
            rel_header()
        );
        let dir = write_graph_dir(&nodes, &rels);

        let graph = load_graph(dir.path()).unwrap();
        let decl = graph.node_by_uid("10").unwrap();
        let ref_edge = graph.outgoing(decl).next().unwrap();
        assert!(ref_edge.relation.is_ref(RefRole::Param));
        assert_eq!(ref_edge.param_index.as_deref(), Some("1"));

        let obj = graph.node_by_uid("11").unwrap();
        let arg_edge = graph.outgoing(obj).next().unwrap();
        assert_eq!(
            arg_edge.relation,
            EdgeRelation::Pdg(PdgRel::Arg("y".to_string()))
        );
        assert_eq!(arg_edge.argument_index, Some(1));
    }

    #[test]
    fn skips_rows_with_unknown_endpoints() {
        let nodes = format!("{}\n1{D}PDG_OBJECT{D}{D}{D}a{D}{D}{D}{D}\n", node_header());
        let rels = format!(
            "{}\n1{D}99{D}PDG{D}DEP{D}{D}{D}{D}{D}{D}{D}{D}{D}\n",
            rel_header()
        );
        let dir = write_graph_dir(&nodes, &rels);

        let graph = load_graph(dir.path()).unwrap();
        let a = graph.node_by_uid("1").unwrap();
        assert_eq!(graph.outgoing(a).count(), 0);
    }

    #[test]
    fn quoted_fields_with_newlines_are_one_record() {
        let nodes = format!(
            "{}\n1{D}Identifier{D}{D}{D}x{D}\"line1\nline2\"{D}{D}{D}\n",
            node_header()
        );
        let rels = format!("{}\n", rel_header());
        let dir = write_graph_dir(&nodes, &rels);

        let graph = load_graph(dir.path()).unwrap();
        assert_eq!(graph.node_count(), 1);
        let n = graph.node_by_uid("1").unwrap();
        assert_eq!(graph.node(n).raw.as_deref(), Some("line1\nline2"));
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let nodes = format!("Type{D}SubType\nPDG_OBJECT{D}\n");
        let rels = format!("{}\n", rel_header());
        let dir = write_graph_dir(&nodes, &rels);

        let err = load_graph(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn { column, .. } if column == "Id:ID"));
    }

    #[test]
    fn location_json_survives_loading() {
        let nodes = format!(
            "{}\n1{D}CallExpression{D}{D}{D}{D}{D}{D}\"{{\"\"start\"\":{{\"\"line\"\":4}},\"\"fname\"\":\"\"a.js\"\"}}\"{D}\n",
            node_header()
        );
        let rels = format!("{}\n", rel_header());
        let dir = write_graph_dir(&nodes, &rels);

        let graph = load_graph(dir.path()).unwrap();
        let n = graph.node_by_uid("1").unwrap();
        let loc = graph.node(n).location().unwrap();
        assert_eq!(loc.start.line, 4);
        assert_eq!(loc.fname, "a.js");
    }
}
