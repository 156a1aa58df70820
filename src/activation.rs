//! Activation tracking for child stores.
//!
//! A child path is *active* while it has at least one subscriber or at
//! least one active child of its own. Active paths cache their last known
//! value, refreshed on every root commit, so reads are O(1). Inactive paths
//! are recomputed from the nearest active ancestor on each read.
//!
//! The registry is owned by one tree and keyed by [`Path`], so every store
//! handle for the same path shares the same activation state.

use crate::state::Node;
use crate::types::{Key, Path};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Bookkeeping for one active path.
#[derive(Debug, Default)]
struct Activation {
    subscribers: usize,
    active_children: BTreeSet<Key>,
    last_known: Option<Node>,
}

impl Activation {
    fn should_be_active(&self) -> bool {
        self.subscribers > 0 || !self.active_children.is_empty()
    }
}

/// Per-tree registry of active paths.
///
/// The root path always has an entry. Its `last_known` is unused because
/// the root value is canonical.
#[derive(Debug)]
pub struct ActivationRegistry {
    entries: HashMap<Path, Activation>,
}

impl ActivationRegistry {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(Path::root(), Activation::default());
        Self { entries }
    }

    /// Whether `path` currently caches its value. The root always does.
    pub fn is_active(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of live subscribers registered at exactly `path`.
    pub fn subscriber_count(&self, path: &Path) -> usize {
        self.entries.get(path).map(|e| e.subscribers).unwrap_or(0)
    }

    /// All active child paths, shallowest first.
    pub fn active_paths(&self) -> Vec<Path> {
        let mut paths: Vec<Path> = self
            .entries
            .keys()
            .filter(|p| !p.is_root())
            .cloned()
            .collect();
        paths.sort_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.cmp(b)));
        paths
    }

    /// Current value at `path`, given the canonical root value.
    ///
    /// Active paths answer from their cache; inactive ones index into the
    /// value of their parent.
    pub fn lookup(&self, path: &Path, root_state: &Node) -> Option<Node> {
        if path.is_root() {
            return Some(root_state.clone());
        }
        if let Some(entry) = self.entries.get(path) {
            return entry.last_known.clone();
        }
        let parent = path.parent()?;
        let key = path.last()?;
        self.lookup(&parent, root_state)?.get(key)
    }

    /// Register a subscriber at `path`, activating it (and its ancestors) if needed.
    pub fn add_subscriber(&mut self, path: &Path, root_state: &Node) {
        if !self.entries.contains_key(path) {
            self.activate(path, root_state);
        }
        if let Some(entry) = self.entries.get_mut(path) {
            entry.subscribers += 1;
        }
    }

    /// Drop one subscriber from `path`, deactivating whatever no longer needs to be active.
    pub fn remove_subscriber(&mut self, path: &Path) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
        }
        self.maybe_deactivate(path);
    }

    /// Re-seed every cached value from a new root value.
    pub fn refresh(&mut self, root_state: &Node) {
        let mut pending = vec![(Path::root(), Some(root_state.clone()))];

        while let Some((path, value)) = pending.pop() {
            let children: Vec<Key> = match self.entries.get(&path) {
                Some(entry) => entry.active_children.iter().cloned().collect(),
                None => continue,
            };

            for key in children {
                let child_value = value.as_ref().and_then(|v| v.get(&key));
                let child_path = path.child(key);
                if let Some(entry) = self.entries.get_mut(&child_path) {
                    entry.last_known = child_value.clone();
                }
                pending.push((child_path, child_value));
            }
        }
    }

    fn activate(&mut self, path: &Path, root_state: &Node) {
        let (parent, key) = match (path.parent(), path.last()) {
            (Some(parent), Some(key)) => (parent, key.clone()),
            _ => return,
        };

        if !self.entries.contains_key(&parent) {
            self.activate(&parent, root_state);
        }

        let last_known = self.lookup(&parent, root_state).and_then(|v| v.get(&key));

        if let Some(parent_entry) = self.entries.get_mut(&parent) {
            parent_entry.active_children.insert(key);
        }
        self.entries.insert(
            path.clone(),
            Activation {
                subscribers: 0,
                active_children: BTreeSet::new(),
                last_known,
            },
        );

        trace!(path = %path, "activated");
    }

    fn maybe_deactivate(&mut self, path: &Path) {
        if path.is_root() {
            return;
        }
        let should_remove = match self.entries.get(path) {
            Some(entry) => !entry.should_be_active(),
            None => false,
        };
        if !should_remove {
            return;
        }

        self.entries.remove(path);
        trace!(path = %path, "deactivated");

        if let (Some(parent), Some(key)) = (path.parent(), path.last()) {
            if let Some(parent_entry) = self.entries.get_mut(&parent) {
                parent_entry.active_children.remove(key);
            }
            self.maybe_deactivate(&parent);
        }
    }
}

impl Default for ActivationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(keys: &[&str]) -> Path {
        Path::from_keys(keys.iter().map(|k| Key::from(*k)).collect())
    }

    #[test]
    fn test_subscribe_activates_ancestors() {
        let root = Node::from(json!({"a": {"b": {"c": 1}}}));
        let mut registry = ActivationRegistry::new();

        registry.add_subscriber(&path(&["a", "b", "c"]), &root);

        assert!(registry.is_active(&path(&["a"])));
        assert!(registry.is_active(&path(&["a", "b"])));
        assert!(registry.is_active(&path(&["a", "b", "c"])));
        assert_eq!(registry.subscriber_count(&path(&["a", "b"])), 0);
        assert_eq!(
            registry.active_paths(),
            vec![path(&["a"]), path(&["a", "b"]), path(&["a", "b", "c"])]
        );
    }

    #[test]
    fn test_unsubscribe_deactivates_chain() {
        let root = Node::from(json!({"a": {"b": 1}}));
        let mut registry = ActivationRegistry::new();

        registry.add_subscriber(&path(&["a", "b"]), &root);
        registry.remove_subscriber(&path(&["a", "b"]));

        assert!(registry.active_paths().is_empty());
        assert!(registry.is_active(&Path::root()));
    }

    #[test]
    fn test_parent_stays_active_while_subscribed() {
        let root = Node::from(json!({"a": {"b": 1}}));
        let mut registry = ActivationRegistry::new();

        registry.add_subscriber(&path(&["a"]), &root);
        registry.add_subscriber(&path(&["a", "b"]), &root);
        registry.remove_subscriber(&path(&["a", "b"]));

        assert!(registry.is_active(&path(&["a"])));
        assert!(!registry.is_active(&path(&["a", "b"])));
    }

    #[test]
    fn test_counts_multiple_subscribers() {
        let root = Node::from(json!({"a": 1}));
        let mut registry = ActivationRegistry::new();

        registry.add_subscriber(&path(&["a"]), &root);
        registry.add_subscriber(&path(&["a"]), &root);
        registry.remove_subscriber(&path(&["a"]));
        assert!(registry.is_active(&path(&["a"])));

        registry.remove_subscriber(&path(&["a"]));
        assert!(!registry.is_active(&path(&["a"])));

        // extra removals are harmless
        registry.remove_subscriber(&path(&["a"]));
        assert!(registry.active_paths().is_empty());
    }

    #[test]
    fn test_lookup_uses_cache_until_refresh() {
        let first = Node::from(json!({"a": {"b": 1}}));
        let second = Node::from(json!({"a": {"b": 2}}));
        let mut registry = ActivationRegistry::new();

        registry.add_subscriber(&path(&["a", "b"]), &first);
        // cached value wins over the root passed in
        assert_eq!(registry.lookup(&path(&["a", "b"]), &second).and_then(|n| n.as_i64()), Some(1));

        registry.refresh(&second);
        assert_eq!(registry.lookup(&path(&["a", "b"]), &second).and_then(|n| n.as_i64()), Some(2));
    }

    #[test]
    fn test_inactive_lookup_recomputes() {
        let first = Node::from(json!({"x": 1}));
        let second = Node::from(json!({"x": 2}));
        let registry = ActivationRegistry::new();

        assert_eq!(registry.lookup(&path(&["x"]), &first).and_then(|n| n.as_i64()), Some(1));
        assert_eq!(registry.lookup(&path(&["x"]), &second).and_then(|n| n.as_i64()), Some(2));
        assert!(registry.lookup(&path(&["x", "y"]), &second).is_none());
    }

    #[test]
    fn test_refresh_handles_vanished_parent() {
        let first = Node::from(json!({"a": {"b": 1}}));
        let second = Node::from(json!({}));
        let mut registry = ActivationRegistry::new();

        registry.add_subscriber(&path(&["a", "b"]), &first);
        registry.refresh(&second);

        assert!(registry.lookup(&path(&["a"]), &second).is_none());
        assert!(registry.lookup(&path(&["a", "b"]), &second).is_none());
        assert!(registry.is_active(&path(&["a", "b"])));
    }
}
