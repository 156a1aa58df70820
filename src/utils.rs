//! Helpers for stores holding collections.

use crate::error::Result;
use crate::state::Node;
use crate::store::{ChildStore, Store};
use crate::types::Key;

/// Append `value` to the array held by `store`.
///
/// Fails with `NotAContainer` when the state is not an array and with
/// `OrphanedWrite` when it is absent.
pub fn push_to_store_array<S: Store>(store: &S, value: impl Into<Node>) -> Result<()> {
    let len = store
        .state()
        .and_then(|state| state.as_array().map(<[Node]>::len))
        .unwrap_or(0);
    store.child(Key::Index(len)).set(value.into())
}

/// One child store per element currently in the array held by `store`.
///
/// Empty when the state is absent or not an array.
pub fn spread_array_store<S: Store>(store: &S) -> Vec<ChildStore> {
    let len = match store.state() {
        Some(state) => state.as_array().map_or(0, <[Node]>::len),
        None => 0,
    };
    (0..len).map(|i| store.child(Key::Index(i))).collect()
}

/// One child store per field currently in the object held by `store`,
/// in key order.
pub fn spread_object_store<S: Store>(store: &S) -> Vec<(String, ChildStore)> {
    let keys: Vec<String> = match store.state() {
        Some(state) => state
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default(),
        None => Vec::new(),
    };
    keys.into_iter()
        .map(|name| {
            let child = store.child(name.as_str());
            (name, child)
        })
        .collect()
}
