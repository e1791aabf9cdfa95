//! Overlay merge
//!
//! Entries are sorted by full dotted key before insertion so the outcome,
//! including which pair of keys is reported on a conflict, does not depend
//! on the iteration order of the input map.

use std::collections::BTreeMap;

use crate::error::MergeError;
use crate::tree::{join, ConfigTree, Node};
use crate::KEY_SEPARATOR;

/// Split a dotted key into its segments.
///
/// Fails when the key is empty or any segment is empty (leading, trailing
/// or doubled separators).
pub fn split_key(key: &str) -> Result<Vec<&str>, MergeError> {
    if key.is_empty() {
        return Err(MergeError::InvalidKey(key.to_string()));
    }
    let segments: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(MergeError::InvalidKey(key.to_string()));
    }
    Ok(segments)
}

/// Merge a flat map of dotted keys into a nested tree.
///
/// A key that would place a value where another key already needs nested
/// entries (or the reverse) is rejected with [`MergeError::Conflict`].
pub fn merge<I, K, V>(entries: I) -> Result<ConfigTree, MergeError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut sorted: Vec<(String, String)> = entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut tree = ConfigTree::new();
    for (key, value) in sorted {
        insert(&mut tree.root, &key, value)?;
    }
    Ok(tree)
}

fn insert(root: &mut BTreeMap<String, Node>, key: &str, value: String) -> Result<(), MergeError> {
    let segments = split_key(key)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| MergeError::InvalidKey(key.to_string()))?;

    let mut current = root;
    let mut walked = String::new();
    for segment in parents {
        walked = join(&walked, segment);
        let node = current
            .entry((*segment).to_string())
            .or_insert_with(|| Node::Branch(BTreeMap::new()));
        current = match node {
            Node::Branch(children) => children,
            Node::Leaf(_) => {
                return Err(MergeError::Conflict {
                    existing: walked,
                    incoming: key.to_string(),
                })
            }
        };
    }

    if let Some(node) = current.get(*last) {
        if node.is_branch() {
            return Err(MergeError::Conflict {
                existing: node.first_leaf_path(&join(&walked, last)),
                incoming: key.to_string(),
            });
        }
    }
    current.insert((*last).to_string(), Node::Leaf(value));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_input() {
        let tree = merge(Vec::<(String, String)>::new()).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_nested_merge() {
        let tree = merge(pairs(&[
            ("aws.tags.owner", "alice"),
            ("aws.region", "us-east-1"),
        ]))
        .unwrap();

        assert_eq!(tree.get_str("aws.tags.owner"), Some("alice"));
        assert_eq!(tree.get_str("aws.region"), Some("us-east-1"));
        assert_eq!(tree.get_str("aws.tags.missing"), None);
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn test_round_trip() {
        let input: HashMap<String, String> = pairs(&[
            ("a", "1"),
            ("b.c", "2"),
            ("b.d.e", "3"),
            ("b.d.f", "4"),
            ("x.y.z.w", "5"),
        ])
        .into_iter()
        .collect();

        let tree = merge(&input).unwrap();
        let flat = tree.flatten();

        assert_eq!(flat.len(), input.len());
        for (k, v) in &input {
            assert_eq!(flat.get(k), Some(v));
        }
    }

    #[test]
    fn test_conflict_leaf_then_branch() {
        let err = merge(pairs(&[("a.b", "x"), ("a.b.c", "y")])).unwrap_err();
        assert_eq!(
            err,
            MergeError::Conflict {
                existing: "a.b".to_string(),
                incoming: "a.b.c".to_string(),
            }
        );
    }

    #[test]
    fn test_conflict_independent_of_order() {
        let forward = merge(pairs(&[("a.b", "x"), ("a.b.c", "y"), ("q", "1")])).unwrap_err();
        let reverse = merge(pairs(&[("q", "1"), ("a.b.c", "y"), ("a.b", "x")])).unwrap_err();
        assert_eq!(forward, reverse);

        let map: HashMap<&str, &str> = [("a.b.c", "y"), ("a.b", "x")].into_iter().collect();
        assert_eq!(merge(map).unwrap_err(), forward);
    }

    #[test]
    fn test_conflict_deeper_branch() {
        let err = merge(pairs(&[("a.b.c.d", "y"), ("a.b", "x")])).unwrap_err();
        assert!(matches!(err, MergeError::Conflict { .. }));
        assert!(err.to_string().contains("a.b.c.d"));
    }

    #[test]
    fn test_invalid_keys() {
        for key in ["", ".", "a..b", ".a", "a."] {
            let err = merge(pairs(&[(key, "v")])).unwrap_err();
            assert_eq!(err, MergeError::InvalidKey(key.to_string()), "key {:?}", key);
        }
    }

    #[test]
    fn test_siblings_do_not_conflict() {
        let tree = merge(pairs(&[("a.b", "x"), ("a.bc.d", "y"), ("a.b-c", "z")])).unwrap();
        assert_eq!(tree.get_str("a.b"), Some("x"));
        assert_eq!(tree.get_str("a.bc.d"), Some("y"));
        assert_eq!(tree.get_str("a.b-c"), Some("z"));
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("a.b.c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split_key("single").unwrap(), vec!["single"]);
        assert!(split_key("a..c").is_err());
    }
}
