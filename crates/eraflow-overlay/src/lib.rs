//! Dotted-key overlay merging.
//!
//! Turns a flat map such as `{"aws.tags.owner": "alice", "aws.region": "us-east-1"}`
//! into a nested [`ConfigTree`], rejecting overlays whose keys imply both a
//! value and a sub-tree at the same path.

mod error;
mod merge;
mod tree;

pub use error::MergeError;
pub use merge::{merge, split_key};
pub use tree::{ConfigTree, Node};

/// Separator between path segments of a dotted key.
pub const KEY_SEPARATOR: char = '.';
