//! Durable state: storage backends, schema migrations, and the
//! [`PersistentStore`] tying them to a store tree.
//!
//! # Example
//!
//! ```ignore
//! let storage = Arc::new(MemoryStorage::new());
//!
//! let mut migrations = MigrationManager::new();
//! migrations.register_migration(1, |old| {
//!     Ok(json!({"_version": 2, "title": old["name"]}))
//! });
//!
//! let store = PersistentStore::new(
//!     storage,
//!     "settings",
//!     json!({"_version": 2, "title": ""}),
//!     PersistenceOptions::default().with_migrator(migrations),
//! )?;
//!
//! store.child("title").set(Node::from("saved"))?;
//! ```

mod codec;
mod file;
mod migration;
mod storage;
mod store;

pub use codec::{IdentityCodec, PersistenceCodec};
pub use file::{FileStorage, FileStorageConfig};
pub use migration::{
    version_of, MigrationFn, MigrationManager, Migrator, NonMigrationManager, VERSION_KEY,
};
pub use storage::{KeyValueStorage, MemoryStorage, Persistence};
pub use store::{PersistenceOptions, PersistentStore};
