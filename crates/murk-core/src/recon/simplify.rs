//! Shape simplification for reconstructed parameters
//!
//! Structural reconstruction over-approximates: numeric-keyed maps are
//! really arrays, all-wildcard maps carry no concrete structure, and the
//! polluted object of a pollution record has an attacker-defined shape
//! rather than a programmer-defined one. This pass rewrites those cases.

use super::types::TypeNode;
use crate::config::Config;
use std::collections::BTreeMap;

/// Simplify every top-level parameter entry in place. `polluted_object` and
/// `polluting_values` name the pollution-specific positions; both are empty
/// for injection records.
pub fn simplify_objects(
    params: &mut BTreeMap<String, TypeNode>,
    config: &Config,
    polluted_object: Option<&str>,
    polluting_values: &[String],
) {
    let keys: Vec<String> = params.keys().cloned().collect();
    for key in keys {
        let node = params.remove(&key).expect("key listed above");
        let simplified = simplify_entry(&key, node, config, polluted_object, polluting_values);
        params.insert(key, simplified);
    }
}

fn simplify_entry(
    key: &str,
    node: TypeNode,
    config: &Config,
    polluted_object: Option<&str>,
    polluting_values: &[String],
) -> TypeNode {
    if looks_like_object(&node) && polluted_object == Some(key) {
        return TypeNode::single("object");
    }
    if looks_like_object(&node) && polluting_values.iter().any(|v| v == key) {
        return TypeNode::union_of(&["polluted_object2", "polluted_object3"]);
    }

    if let TypeNode::Object(map) = &node {
        if map.keys().any(|k| is_numeric(k)) {
            return fold_numeric_keys(map);
        }
        let has_length = map.contains_key("length");
        if has_length
            && map.keys().all(|k| {
                k == "length" || k == "*" || config.prototypes.string.iter().any(|m| m == k)
            })
        {
            return TypeNode::Union(vec![
                TypeNode::single("object"),
                TypeNode::Array(vec![TypeNode::single("string"), TypeNode::single("string")]),
                TypeNode::single("string"),
            ]);
        }
        if has_length && map.keys().all(|k| k == "length" || k == "*") {
            return TypeNode::union_of(&["object", "array"]);
        }
        if looks_like_object(&node) {
            return TypeNode::union_of(&["object", "array"]);
        }
        let mut inner = map.clone();
        simplify_objects(&mut inner, config, None, &[]);
        return TypeNode::Object(inner);
    }

    if node.is_any() && polluted_object == Some(key) {
        return TypeNode::single("object");
    }
    node
}

/// Dynamic access or a `length` read: the map stands for an object or an
/// array, not a record of concrete properties.
fn looks_like_object(node: &TypeNode) -> bool {
    match node {
        TypeNode::Object(map) => map.contains_key("*") || map.contains_key("length"),
        _ => false,
    }
}

fn is_numeric(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_digit())
}

/// Rebuild a numeric-keyed map as an array literal shape, padding missing
/// indices with `any`. Non-index keys force a union with the original map.
fn fold_numeric_keys(map: &BTreeMap<String, TypeNode>) -> TypeNode {
    let mut indexed: Vec<(usize, &TypeNode)> = map
        .iter()
        .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
        .collect();
    indexed.sort_by_key(|&(i, _)| i);

    let mut items: Vec<TypeNode> = Vec::new();
    for (index, value) in indexed {
        while items.len() < index {
            items.push(TypeNode::any());
        }
        items.insert(index.min(items.len()), value.clone());
    }

    let pure_array = map
        .keys()
        .all(|k| k == "length" || k == "*" || is_numeric(k));
    if pure_array {
        if items.len() == 1 && items[0].is_any() {
            TypeNode::single("array")
        } else {
            TypeNode::Array(items)
        }
    } else {
        TypeNode::Union(vec![TypeNode::Object(map.clone()), TypeNode::Array(items)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(entries: &[(&str, TypeNode)]) -> TypeNode {
        TypeNode::Object(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn simplify(params: &mut BTreeMap<String, TypeNode>) {
        simplify_objects(params, &Config::builtin(), None, &[]);
    }

    #[test]
    fn numeric_keys_fold_into_array_shapes() {
        let mut params = BTreeMap::new();
        params.insert(
            "list".to_string(),
            object(&[
                ("0", TypeNode::single("string")),
                ("2", TypeNode::single("number")),
            ]),
        );
        simplify(&mut params);
        assert_eq!(
            params["list"],
            TypeNode::Array(vec![
                TypeNode::single("string"),
                TypeNode::any(),
                TypeNode::single("number"),
            ])
        );
    }

    #[test]
    fn single_any_element_collapses_to_plain_array() {
        let mut params = BTreeMap::new();
        params.insert("list".to_string(), object(&[("0", TypeNode::any())]));
        simplify(&mut params);
        assert_eq!(params["list"], TypeNode::single("array"));
    }

    #[test]
    fn mixed_numeric_and_named_keys_union_both_readings() {
        let mut params = BTreeMap::new();
        let original = object(&[
            ("0", TypeNode::single("string")),
            ("name", TypeNode::single("string")),
        ]);
        params.insert("mixed".to_string(), original.clone());
        simplify(&mut params);
        assert_eq!(
            params["mixed"],
            TypeNode::Union(vec![original, TypeNode::Array(vec![TypeNode::single("string")])])
        );
    }

    #[test]
    fn length_with_string_methods_widens_to_stringish_union() {
        let mut params = BTreeMap::new();
        params.insert(
            "s".to_string(),
            object(&[
                ("length", TypeNode::any()),
                ("split", TypeNode::any()),
            ]),
        );
        simplify(&mut params);
        assert_eq!(
            params["s"],
            TypeNode::Union(vec![
                TypeNode::single("object"),
                TypeNode::Array(vec![TypeNode::single("string"), TypeNode::single("string")]),
                TypeNode::single("string"),
            ])
        );
    }

    #[test]
    fn lazy_objects_collapse_to_object_array_union() {
        let mut params = BTreeMap::new();
        params.insert(
            "o".to_string(),
            object(&[("*", object(&[("*", TypeNode::any())]))]),
        );
        simplify(&mut params);
        assert_eq!(params["o"], TypeNode::union_of(&["object", "array"]));
    }

    #[test]
    fn polluted_object_becomes_plain_object() {
        let mut params = BTreeMap::new();
        params.insert("a".to_string(), object(&[("*", TypeNode::any())]));
        simplify_objects(&mut params, &Config::builtin(), Some("a"), &[]);
        assert_eq!(params["a"], TypeNode::single("object"));
    }

    #[test]
    fn polluting_value_becomes_polluted_union() {
        let mut params = BTreeMap::new();
        params.insert("v".to_string(), object(&[("*", TypeNode::any())]));
        simplify_objects(
            &mut params,
            &Config::builtin(),
            None,
            &["v".to_string()],
        );
        assert_eq!(
            params["v"],
            TypeNode::union_of(&["polluted_object2", "polluted_object3"])
        );
    }

    #[test]
    fn any_leaf_polluted_object_becomes_object() {
        let mut params = BTreeMap::new();
        params.insert("a".to_string(), TypeNode::any());
        simplify_objects(&mut params, &Config::builtin(), Some("a"), &[]);
        assert_eq!(params["a"], TypeNode::single("object"));
    }

    #[test]
    fn concrete_structures_recurse_without_pollution_specials() {
        let mut params = BTreeMap::new();
        params.insert(
            "req".to_string(),
            object(&[("body", object(&[("*", TypeNode::any())]))]),
        );
        simplify(&mut params);
        let inner = params["req"].as_object().unwrap();
        assert_eq!(inner["body"], TypeNode::union_of(&["object", "array"]));
    }
}
