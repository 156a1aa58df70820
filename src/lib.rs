//! # App State
//!
//! A hierarchical, observable state container. One immutable value tree
//! lives in a root store; any path into it can be handed out as a store of
//! its own that reads, writes and watches just that slice.
//!
//! ## Core Concepts
//!
//! - **Stores**: [`RootStore`] owns the value, [`ChildStore`]s address one
//!   key below another store
//! - **State**: immutable [`Node`] trees; writes rebuild the path to the root
//!   and share everything else
//! - **Activation**: only subscribed paths cache their value; everything else
//!   is read through from the root on demand
//! - **Subscriptions**: synchronous callbacks plus bounded event streams
//! - **Persistence**: [`PersistentStore`] loads, migrates and saves state
//! - **Undo**: [`UndoManager`] keeps a bounded history of snapshots
//!
//! ## Example
//!
//! ```ignore
//! use app_state::{RootStore, Store, Node};
//! use serde_json::json;
//!
//! let store = RootStore::new(json!({"user": {"name": "ada", "visits": 0}}));
//! let visits = store.child("user").child("visits");
//!
//! let _sub = visits.subscribe(|v| println!("visits: {:?}", v));
//! visits.set(Node::from(1))?;
//!
//! assert_eq!(store.value().to_json(), json!({"user": {"name": "ada", "visits": 1}}));
//! ```

pub mod activation;
pub mod error;
pub mod persistence;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod undo;
pub mod utils;

// Re-exports
pub use activation::ActivationRegistry;
pub use error::{Result, StoreError};
pub use persistence::{
    FileStorage, FileStorageConfig, IdentityCodec, KeyValueStorage, MemoryStorage,
    MigrationManager, Migrator, NonMigrationManager, Persistence, PersistenceCodec,
    PersistenceOptions, PersistentStore, VERSION_KEY,
};
pub use state::{apply_operation, same_state, Node, NodeValue, StateOperation, MAX_ARRAY_PAD};
pub use store::{ChildStore, RootStore, Store, StoreHandle};
pub use subscriptions::{
    ActionKind, DropReason, EventHandle, EventStreamConfig, EventStreamId, StoreAction,
    StoreEvent, Subscription,
};
pub use types::*;
pub use undo::{SnapshotStrategy, UndoDirection, UndoManager, UndoStrategy};
pub use utils::{push_to_store_array, spread_array_store, spread_object_store};
