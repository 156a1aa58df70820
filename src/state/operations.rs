//! Single-key state operations.
//!
//! Every operation produces a new parent value by shallow-copying the
//! parent's direct entries and changing exactly one key. Values nested
//! below the touched key are shared with the original.

use crate::error::{Result, StoreError};
use crate::state::node::{Node, NodeValue};
use crate::types::{Key, Path};

/// How many `null`s an array write past the end may insert.
pub const MAX_ARRAY_PAD: usize = 1024;

/// A change to one key of a container value.
#[derive(Clone, Debug)]
pub enum StateOperation {
    /// Insert or replace the value under the key.
    Set(Node),
    /// Remove the key entirely.
    Delete,
}

impl StateOperation {
    pub fn name(&self) -> &'static str {
        match self {
            StateOperation::Set(_) => "set",
            StateOperation::Delete => "delete",
        }
    }
}

/// Apply an operation to `parent`, the value stored at `parent_path`.
///
/// Array writes past the end pad with `null` up to the index, at most
/// [`MAX_ARRAY_PAD`] of them. Deleting an array index shifts the following
/// elements down.
pub fn apply_operation(
    parent_path: &Path,
    parent: &Node,
    key: &Key,
    operation: StateOperation,
) -> Result<Node> {
    match (parent.value(), key) {
        (NodeValue::Object(map), Key::Field(name)) => {
            let mut map = map.clone();
            match operation {
                StateOperation::Set(value) => {
                    map.insert(name.clone(), value);
                }
                StateOperation::Delete => {
                    map.remove(name);
                }
            }
            Ok(Node::new(NodeValue::Object(map)))
        }

        (NodeValue::Array(items), Key::Index(index)) => {
            let mut items = items.clone();
            let index = *index;
            match operation {
                StateOperation::Set(value) => {
                    let len = items.len();
                    if index < len {
                        items[index] = value;
                    } else {
                        if index - len > MAX_ARRAY_PAD {
                            return Err(StoreError::IndexOutOfRange {
                                path: parent_path.clone(),
                                index,
                                len,
                            });
                        }
                        items.resize_with(index, Node::null);
                        items.push(value);
                    }
                }
                StateOperation::Delete => {
                    if index < items.len() {
                        items.remove(index);
                    }
                }
            }
            Ok(Node::new(NodeValue::Array(items)))
        }

        _ => Err(StoreError::NotAContainer {
            path: parent_path.clone(),
            key: key.clone(),
        }),
    }
}
