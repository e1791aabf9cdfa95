use thiserror::Error;

/// Errors produced while merging an overlay into a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// Two keys imply a leaf and a branch at the same path.
    #[error("overlay key '{incoming}' conflicts with '{existing}': a path cannot hold both a value and nested keys")]
    Conflict { existing: String, incoming: String },

    /// The key is empty or has an empty segment.
    #[error("invalid overlay key '{0}': segments must be non-empty and separated by single dots")]
    InvalidKey(String),
}
