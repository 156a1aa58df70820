//! Change subscriptions and commit event streams.
//!
//! Two kinds of listeners are supported:
//! - [`Subscription`]s: synchronous callbacks registered on any store handle,
//!   invoked in subscription order before the triggering `set` returns.
//! - Event streams: bounded channels receiving a [`StoreEvent`] for every
//!   root commit, for observers such as debugging tools. Slow consumers are
//!   dropped rather than slowing the store down.
//!
//! # Example
//!
//! ```ignore
//! let store = RootStore::new(json!({"count": 0}));
//! let events = store.events(EventStreamConfig::default());
//!
//! store.child("count").set(Node::from(1))?;
//!
//! match events.recv()? {
//!     StoreEvent::Changed { action, state, .. } => println!("{}: {}", action.label(), state),
//!     StoreEvent::Dropped { reason } => println!("closed: {:?}", reason),
//! }
//! ```

mod manager;
mod types;

pub(crate) use manager::{Callback, EventBroadcaster, Removed, SubscriberList};
pub use types::{
    ActionKind, DropReason, EventHandle, EventStreamConfig, EventStreamId, StoreAction,
    StoreEvent, Subscription,
};
