//! Reconstructed parameter types
//!
//! The shape of an attacker-controlled value is a tagged tree: leaves carry
//! a set of inferred JavaScript types, interior nodes mirror the property
//! structure the program exercises, and unions collect alternatives. The
//! report serialization collapses single-type leaves to plain strings and
//! renders multi-type positions as `{"_union": [...]}` objects.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

pub type TypeSet = BTreeSet<String>;

#[derive(Debug, Clone, PartialEq)]
pub enum TypeNode {
    Leaf(TypeSet),
    Object(BTreeMap<String, TypeNode>),
    Array(Vec<TypeNode>),
    Union(Vec<TypeNode>),
}

impl TypeNode {
    pub fn any() -> Self {
        TypeNode::single("any")
    }

    pub fn single(ty: impl Into<String>) -> Self {
        let mut set = TypeSet::new();
        set.insert(ty.into());
        TypeNode::Leaf(set)
    }

    pub fn union_of(types: &[&str]) -> Self {
        TypeNode::Union(types.iter().map(|t| TypeNode::single(*t)).collect())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, TypeNode::Leaf(set) if set.len() == 1 && set.contains("any"))
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, TypeNode>> {
        match self {
            TypeNode::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, TypeNode>> {
        match self {
            TypeNode::Object(map) => Some(map),
            _ => None,
        }
    }

    /// A lazy object carries no concrete structure: every key is the
    /// wildcard and every leaf is `any` — the analysis saw only dynamic
    /// access.
    pub fn is_lazy_object(&self) -> bool {
        match self {
            TypeNode::Object(map) => map
                .iter()
                .all(|(key, value)| key == "*" && (value.is_lazy_object() || value.is_any())),
            _ => false,
        }
    }
}

impl Serialize for TypeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TypeNode::Leaf(set) => match set.len() {
                0 => serializer.serialize_str("any"),
                1 => serializer.serialize_str(set.iter().next().expect("non-empty")),
                _ => {
                    let mut map = serializer.serialize_map(Some(1))?;
                    map.serialize_entry("_union", &set.iter().collect::<Vec<_>>())?;
                    map.end()
                }
            },
            TypeNode::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            TypeNode::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            TypeNode::Union(items) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("_union", items)?;
                map.end()
            }
        }
    }
}
