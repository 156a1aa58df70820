//! State values and the operations that derive new values from old ones.
//!
//! State is an immutable tree of [`Node`] handles. A write never mutates a
//! node in place: it builds a new parent with one key changed, leaving
//! everything else shared, so identity checks stay meaningful across writes.

mod node;
mod operations;

pub use node::{same_state, Node, NodeValue};
pub use operations::{apply_operation, StateOperation, MAX_ARRAY_PAD};
