//! Conversion between the in-memory state and its persisted form.

use crate::error::Result;
use crate::state::Node;
use serde_json::Value;

/// Bidirectional transform between what the store holds and what is
/// persisted, e.g. to leave session-only fields out of storage.
pub trait PersistenceCodec {
    /// In-memory state to persisted form.
    fn encode(&self, state: &Node) -> Result<Value>;

    /// Persisted form to in-memory state.
    fn decode(&self, persisted: Value) -> Result<Node>;
}

/// Persists the state exactly as held.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityCodec;

impl PersistenceCodec for IdentityCodec {
    fn encode(&self, state: &Node) -> Result<Value> {
        Ok(state.to_json())
    }

    fn decode(&self, persisted: Value) -> Result<Node> {
        Ok(Node::from(persisted))
    }
}
