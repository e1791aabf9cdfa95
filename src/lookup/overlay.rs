use eraflow_overlay::{ConfigTree, Node};
use serde_json::Value;

use super::{LookupError, Provider};

/// Serves values from the merged invocation overlay.
///
/// A key naming a sub-tree resolves to that sub-tree as an object.
#[derive(Debug, Clone, Default)]
pub struct OverlayProvider {
    tree: ConfigTree,
}

impl OverlayProvider {
    pub fn new(tree: ConfigTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }
}

impl Provider for OverlayProvider {
    fn name(&self) -> &str {
        "overlay"
    }

    fn lookup(&self, key: &str) -> Result<Option<Value>, LookupError> {
        Ok(self.tree.get(key).map(Node::to_value))
    }
}
