//! Nested configuration tree

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::merge::split_key;
use crate::KEY_SEPARATOR;

/// A node of the configuration tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Leaf(String),
    Branch(BTreeMap<String, Node>),
}

impl Node {
    /// Render this node as JSON: leaves become strings, branches objects.
    pub fn to_value(&self) -> Value {
        match self {
            Node::Leaf(s) => Value::String(s.clone()),
            Node::Branch(children) => Value::Object(
                children
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }

    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            Node::Leaf(s) => Some(s),
            Node::Branch(_) => None,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Node::Branch(_))
    }

    /// First leaf path below this node, in key order.
    pub(crate) fn first_leaf_path(&self, prefix: &str) -> String {
        match self {
            Node::Leaf(_) => prefix.to_string(),
            Node::Branch(children) => match children.iter().next() {
                Some((k, child)) => child.first_leaf_path(&join(prefix, k)),
                None => prefix.to_string(),
            },
        }
    }
}

/// The nested form of an overlay.
///
/// Built by [`crate::merge`]; read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConfigTree {
    pub(crate) root: BTreeMap<String, Node>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        fn count(node: &Node) -> usize {
            match node {
                Node::Leaf(_) => 1,
                Node::Branch(children) => children.values().map(count).sum(),
            }
        }
        self.root.values().map(count).sum()
    }

    /// Top-level entries.
    pub fn root(&self) -> &BTreeMap<String, Node> {
        &self.root
    }

    /// Walk the tree along a dotted path.
    ///
    /// Returns `None` for malformed paths, missing segments, or when a leaf
    /// is reached before the path is exhausted.
    pub fn get(&self, path: &str) -> Option<&Node> {
        let segments = split_key(path).ok()?;
        let (first, rest) = segments.split_first()?;
        let mut current = self.root.get(*first)?;
        for segment in rest {
            match current {
                Node::Branch(children) => current = children.get(*segment)?,
                Node::Leaf(_) => return None,
            }
        }
        Some(current)
    }

    /// Leaf value at a dotted path.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Node::as_leaf)
    }

    /// Re-flatten into dotted keys.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        fn walk(prefix: &str, node: &Node, out: &mut BTreeMap<String, String>) {
            match node {
                Node::Leaf(v) => {
                    out.insert(prefix.to_string(), v.clone());
                }
                Node::Branch(children) => {
                    for (k, child) in children {
                        walk(&join(prefix, k), child, out);
                    }
                }
            }
        }

        let mut out = BTreeMap::new();
        for (k, node) in &self.root {
            walk(k, node, &mut out);
        }
        out
    }

    /// Render the whole tree as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.root
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }
}

pub(crate) fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", prefix, KEY_SEPARATOR, segment)
    }
}
