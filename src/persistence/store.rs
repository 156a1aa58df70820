//! A root store that survives restarts.

use crate::error::Result;
use crate::persistence::codec::{IdentityCodec, PersistenceCodec};
use crate::persistence::migration::{Migrator, NonMigrationManager, VERSION_KEY};
use crate::persistence::storage::{KeyValueStorage, Persistence};
use crate::state::Node;
use crate::store::{RootStore, Store, StoreHandle};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info};

/// How a [`PersistentStore`] resolves and encodes its state.
pub struct PersistenceOptions {
    /// Upgrades values persisted at an older version.
    pub migrator: Box<dyn Migrator>,
    /// Converts between the held and the persisted shape.
    pub codec: Box<dyn PersistenceCodec>,
}

impl PersistenceOptions {
    pub fn with_migrator(mut self, migrator: impl Migrator + 'static) -> Self {
        self.migrator = Box::new(migrator);
        self
    }

    pub fn with_codec(mut self, codec: impl PersistenceCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            migrator: Box::new(NonMigrationManager),
            codec: Box::new(IdentityCodec),
        }
    }
}

impl fmt::Debug for PersistenceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceOptions").finish_non_exhaustive()
    }
}

/// A [`RootStore`] loaded from and written back to durable storage.
///
/// The starting state is whatever storage holds under the key, brought up
/// to the current version by the configured migrator, or the default
/// state when nothing usable is stored. Construction does not write.
///
/// Every later commit is encoded and stored before it becomes visible.
/// If encoding or storing fails the write fails and the tree is left as it
/// was.
#[derive(Clone)]
pub struct PersistentStore {
    root: RootStore,
    persistence: Persistence,
}

impl PersistentStore {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        key: impl Into<String>,
        default_state: impl Into<Node>,
        options: PersistenceOptions,
    ) -> Result<Self> {
        let persistence = Persistence::new(storage, key);
        let default_state = default_state.into();
        let codec: Rc<dyn PersistenceCodec> = Rc::from(options.codec);

        let default_persisted = codec.encode(&default_state)?;
        let stored = persistence.get()?;
        let found_stored = stored.is_some();
        let resolved = options.migrator.run(stored, &default_persisted)?;

        let initial = if resolved == default_persisted {
            default_state
        } else {
            codec.decode(resolved)?
        };

        debug!(
            key = persistence.key(),
            found_stored,
            version = ?held_version(&initial),
            "loaded persistent store"
        );

        let root = RootStore::new(initial);
        let writer = persistence.clone();
        root.set_commit_hook(Rc::new(move |state: &Node| {
            let encoded = codec.encode(state)?;
            writer.put(&encoded)
        }));

        Ok(Self { root, persistence })
    }

    /// Key the state is stored under.
    pub fn key(&self) -> &str {
        self.persistence.key()
    }

    /// The underlying root store.
    pub fn root(&self) -> &RootStore {
        &self.root
    }

    /// Remove the persisted value. The in-memory state is left alone; the
    /// next write stores it again.
    pub fn clear_persisted(&self) -> Result<()> {
        info!(key = self.persistence.key(), "clearing persisted state");
        self.persistence.clear()
    }
}

impl Deref for PersistentStore {
    type Target = RootStore;

    fn deref(&self) -> &RootStore {
        &self.root
    }
}

impl Store for PersistentStore {
    fn handle(&self) -> &StoreHandle {
        self.root.handle()
    }

    fn set(&self, value: Node) -> Result<()> {
        self.root.set(value)
    }
}

impl fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStore")
            .field("key", &self.persistence.key())
            .field("root", &self.root)
            .finish()
    }
}

/// Schema version carried by a held state, read without converting the tree.
fn held_version(state: &Node) -> Option<u64> {
    state.field(VERSION_KEY).and_then(|version| version.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::storage::MemoryStorage;
    use serde_json::json;

    fn open(storage: &MemoryStorage) -> PersistentStore {
        PersistentStore::new(
            Arc::new(storage.clone()),
            "app",
            json!({"_version": 1, "name": "default"}),
            PersistenceOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_construction_does_not_write() {
        let storage = MemoryStorage::new();
        let store = open(&storage);

        assert_eq!(store.value().to_json(), json!({"_version": 1, "name": "default"}));
        assert_eq!(storage.write_count(), 0);
        assert!(storage.raw("app").is_none());
    }

    #[test]
    fn test_each_set_writes_once() {
        let storage = MemoryStorage::new();
        let store = open(&storage);

        store.child("name").set(Node::from("first")).unwrap();
        assert_eq!(storage.write_count(), 1);
        assert_eq!(
            storage.raw("app").as_deref(),
            Some(r#"{"_version":1,"name":"first"}"#)
        );

        store.child("name").set(Node::from("second")).unwrap();
        assert_eq!(storage.write_count(), 2);
    }

    #[test]
    fn test_restores_previous_session() {
        let storage = MemoryStorage::new();
        {
            let store = open(&storage);
            store.child("name").set(Node::from("kept")).unwrap();
        }

        let store = open(&storage);
        assert_eq!(store.child("name").state(), Some(Node::from("kept")));
    }

    #[test]
    fn test_clear_persisted() {
        let storage = MemoryStorage::new();
        let store = open(&storage);
        store.child("name").set(Node::from("x")).unwrap();

        store.clear_persisted().unwrap();
        assert!(storage.raw("app").is_none());
        assert_eq!(store.child("name").state(), Some(Node::from("x")));
    }

    #[test]
    fn test_held_version_reads_the_version_field() {
        let items: Vec<_> = (0..10_000).map(|i| json!({"id": i})).collect();
        let state = Node::from(json!({"_version": 7, "items": items}));
        assert_eq!(held_version(&state), Some(7));

        assert_eq!(held_version(&Node::from(json!({"_version": "7"}))), None);
        assert_eq!(held_version(&Node::from(json!([1, 2]))), None);
    }
}
