//! Store handles and the tree they share.
//!
//! A tree is created by [`RootStore::new`]. Every handle derived from it,
//! root or child, points at the same shared core, which owns:
//! - the canonical root value,
//! - the [`ActivationRegistry`] deciding which paths cache their value,
//! - the ordered change subscribers and commit event streams.
//!
//! All mutation funnels through a single root commit: a child write rebuilds each
//! ancestor with one key changed until it reaches the root, and the root
//! commit refreshes caches and notifies subscribers before returning.

use crate::activation::ActivationRegistry;
use crate::error::{Result, StoreError};
use crate::state::{apply_operation, same_state, Node, StateOperation};
use crate::subscriptions::{
    Callback, EventBroadcaster, EventHandle, EventStreamConfig, EventStreamId, Removed,
    StoreAction, StoreEvent, SubscriberList, Subscription,
};
use crate::types::{Generation, Key, Path, SubscriptionId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

/// Runs before a root commit becomes visible. An error aborts the commit.
pub(crate) type CommitHook = Rc<dyn Fn(&Node) -> Result<()>>;

/// State shared by every handle of one tree.
pub(crate) struct TreeCore {
    state: Node,
    generation: Generation,
    registry: ActivationRegistry,
    subscribers: SubscriberList,
    events: EventBroadcaster,
    commit_hook: Option<CommitHook>,
    notifying: bool,
}

type Tree = Rc<RefCell<TreeCore>>;

impl TreeCore {
    fn new(state: Node) -> Self {
        Self {
            state,
            generation: Generation::default(),
            registry: ActivationRegistry::new(),
            subscribers: SubscriberList::new(),
            events: EventBroadcaster::new(),
            commit_hook: None,
            notifying: false,
        }
    }

    fn lookup(&self, path: &Path) -> Option<Node> {
        self.registry.lookup(path, &self.state)
    }

    fn add_subscriber(&mut self, path: Path, callback: Callback) -> SubscriptionId {
        self.registry.add_subscriber(&path, &self.state);
        let current = self.lookup(&path);
        self.subscribers.add(path, callback, current)
    }

    /// Unregister `id`. The returned callback must be dropped by the
    /// caller after this borrow ends, since it may own other subscriptions.
    pub(crate) fn remove_subscriber(&mut self, id: SubscriptionId) -> Option<Callback> {
        let Removed { path, callback } = self.subscribers.remove(id)?;
        self.registry.remove_subscriber(&path);
        Some(callback)
    }

    fn take_due(&mut self, id: SubscriptionId) -> Option<(Callback, Option<Node>, Generation)> {
        let path = self.subscribers.path_of(id)?.clone();
        let current = self.registry.lookup(&path, &self.state);
        self.subscribers.take_due(id, current, self.generation)
    }
}

/// Opaque reference to a location in a tree.
#[derive(Clone)]
pub struct StoreHandle {
    tree: Tree,
    path: Path,
}

impl StoreHandle {
    fn child(&self, key: Key) -> StoreHandle {
        StoreHandle {
            tree: Rc::clone(&self.tree),
            path: self.path.child(key),
        }
    }

    fn state(&self) -> Option<Node> {
        self.tree.borrow().lookup(&self.path)
    }

    pub(crate) fn generation(&self) -> Generation {
        self.tree.borrow().generation
    }

    /// Register a callback that also receives the generation of the
    /// commit being delivered.
    pub(crate) fn subscribe_tagged<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<Node>, Generation) + 'static,
    {
        let id = self
            .tree
            .borrow_mut()
            .add_subscriber(self.path.clone(), Rc::new(callback));
        Subscription::new(id, Rc::downgrade(&self.tree))
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::RootStore {}
    impl Sealed for super::ChildStore {}
    impl Sealed for crate::persistence::PersistentStore {}
}

/// A handle to "the value at some path" of a state tree.
///
/// Handles are cheap to clone. Handles created independently for the same
/// path are interchangeable: they read the same value, share activation
/// state, and compare equal under [`Store::refers_to_same_state_as`].
pub trait Store: sealed::Sealed {
    #[doc(hidden)]
    fn handle(&self) -> &StoreHandle;

    /// Replace the value at this path.
    fn set(&self, value: Node) -> Result<()>;

    /// Location of this store within its tree.
    fn path(&self) -> &Path {
        &self.handle().path
    }

    /// Current value, or `None` when the path does not exist.
    fn state(&self) -> Option<Node> {
        self.handle().state()
    }

    /// Set the value computed from the current one.
    fn set_using<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Option<Node>) -> Node,
        Self: Sized,
    {
        let next = f(self.state());
        self.set(next)
    }

    /// Handle for the value under `key`.
    fn child(&self, key: impl Into<Key>) -> ChildStore
    where
        Self: Sized,
    {
        ChildStore {
            handle: self.handle().child(key.into()),
        }
    }

    /// Call `callback` with the new value whenever it changes.
    ///
    /// Root subscribers are called once per commit, in commit order, even
    /// for commits made from inside another callback. Other subscribers are
    /// called with the latest value whenever its identity differs from the
    /// one they last received. The current value is not delivered; see
    /// [`Store::subscribe_with_current`].
    fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<Node>) + 'static,
        Self: Sized,
    {
        self.handle()
            .subscribe_tagged(move |value, _generation| callback(value))
    }

    /// Like [`Store::subscribe`], but also calls `callback` with the current value right away.
    fn subscribe_with_current<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<Node>) + 'static,
        Self: Sized,
    {
        let callback: Rc<dyn Fn(Option<Node>)> = Rc::new(callback);
        let forward = Rc::clone(&callback);
        let subscription = self.subscribe(move |value| forward(value));
        callback(self.state());
        notify(&self.handle().tree);
        subscription
    }

    /// Whether `other` addresses the same value in the same tree.
    fn refers_to_same_state_as<O: Store>(&self, other: &O) -> bool
    where
        Self: Sized,
    {
        Rc::ptr_eq(&self.handle().tree, &other.handle().tree) && self.path() == other.path()
    }

    /// Current value decoded into `T`.
    fn state_as<T: DeserializeOwned>(&self) -> Result<Option<T>>
    where
        Self: Sized,
    {
        self.state().map(|node| node.deserialize_into()).transpose()
    }

    /// Serialize `value` and set it.
    fn set_from<T: Serialize>(&self, value: &T) -> Result<()>
    where
        Self: Sized,
    {
        self.set(Node::from_serialize(value)?)
    }
}

/// The top of a store tree. Owns the canonical value.
#[derive(Clone)]
pub struct RootStore {
    handle: StoreHandle,
}

impl RootStore {
    pub fn new(initial: impl Into<Node>) -> Self {
        let tree = Rc::new(RefCell::new(TreeCore::new(initial.into())));
        Self {
            handle: StoreHandle {
                tree,
                path: Path::root(),
            },
        }
    }

    /// Create a store from any serializable initial value.
    pub fn from_serialize<T: Serialize>(initial: &T) -> Result<Self> {
        Ok(Self::new(Node::from_serialize(initial)?))
    }

    /// The canonical value. Never absent.
    pub fn value(&self) -> Node {
        self.handle.tree.borrow().state.clone()
    }

    /// Number of commits so far.
    pub fn generation(&self) -> Generation {
        self.handle.tree.borrow().generation
    }

    /// Open a stream receiving an event for every commit.
    pub fn events(&self, config: EventStreamConfig) -> EventHandle {
        self.handle.tree.borrow_mut().events.subscribe(&config)
    }

    /// Close a stream opened by [`RootStore::events`].
    pub fn close_events(&self, id: EventStreamId) {
        self.handle.tree.borrow_mut().events.unsubscribe(id);
    }

    /// Number of open event streams.
    pub fn event_stream_count(&self) -> usize {
        self.handle.tree.borrow().events.len()
    }

    /// Every child path currently caching its value.
    pub fn active_paths(&self) -> Vec<Path> {
        self.handle.tree.borrow().registry.active_paths()
    }

    /// Total live subscribers across the tree.
    pub fn subscriber_count(&self) -> usize {
        self.handle.tree.borrow().subscribers.len()
    }

    pub(crate) fn set_commit_hook(&self, hook: CommitHook) {
        self.handle.tree.borrow_mut().commit_hook = Some(hook);
    }
}

impl Store for RootStore {
    fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    /// Replace the canonical value and notify. Never diffs: an unchanged
    /// value is still a commit.
    fn set(&self, value: Node) -> Result<()> {
        commit(&self.handle.tree, value, StoreAction::set(Path::root()))
    }
}

impl std::fmt::Debug for RootStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootStore")
            .field("generation", &self.generation())
            .field("state", &self.value())
            .finish()
    }
}

/// A store for one key of its parent's value.
///
/// Writes rebuild the parent with the key replaced and hand the result up
/// to the parent, recursively, until the root commits.
#[derive(Clone)]
pub struct ChildStore {
    handle: StoreHandle,
}

impl ChildStore {
    /// The key of this store within its parent.
    pub fn key(&self) -> &Key {
        // child paths are never empty
        &self.handle.path.keys()[self.handle.path.depth() - 1]
    }

    pub fn parent_path(&self) -> Path {
        self.handle.path.parent().unwrap_or_default()
    }

    /// Remove this key from the parent value entirely.
    ///
    /// Differs from setting `null`: the key no longer appears in the
    /// parent. Does nothing when the parent or the key is already absent.
    pub fn delete(&self) -> Result<()> {
        let parent_path = self.parent_path();
        let parent = match self.handle.tree.borrow().lookup(&parent_path) {
            Some(parent) => parent,
            None => return Ok(()),
        };
        if !parent.contains_key(self.key()) {
            return Ok(());
        }
        let operation = StateOperation::Delete;
        trace!(path = %parent_path, key = %self.key(), op = operation.name(), "rebuilding parent");
        let next = apply_operation(&parent_path, &parent, self.key(), operation)?;
        write_at(
            &self.handle.tree,
            &parent_path,
            next,
            StoreAction::delete(self.handle.path.clone()),
        )
    }

    /// Whether this path currently caches its value.
    pub fn is_active(&self) -> bool {
        self.handle.tree.borrow().registry.is_active(&self.handle.path)
    }
}

impl Store for ChildStore {
    fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    /// A value identical to the current one is a no-op: nothing is
    /// committed and nobody is notified.
    fn set(&self, value: Node) -> Result<()> {
        if same_state(Some(&value), self.state().as_ref()) {
            return Ok(());
        }
        write_at(
            &self.handle.tree,
            &self.handle.path,
            value,
            StoreAction::set(self.handle.path.clone()),
        )
    }
}

impl std::fmt::Debug for ChildStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildStore")
            .field("path", &self.handle.path)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Store `value` at `path`, rebuilding each ancestor up to the root.
fn write_at(tree: &Tree, path: &Path, value: Node, action: StoreAction) -> Result<()> {
    let (parent_path, key) = match (path.parent(), path.last()) {
        (Some(parent_path), Some(key)) => (parent_path, key),
        _ => return commit(tree, value, action),
    };

    // a null parent is as missing as an absent one
    let parent = tree
        .borrow()
        .lookup(&parent_path)
        .filter(|parent| !parent.is_null())
        .ok_or_else(|| StoreError::OrphanedWrite { path: path.clone() })?;
    let operation = StateOperation::Set(value);
    trace!(path = %parent_path, key = %key, op = operation.name(), "rebuilding parent");
    let next = apply_operation(&parent_path, &parent, key, operation)?;
    write_at(tree, &parent_path, next, action)
}

/// Replace the root value, refresh caches, publish, then notify.
fn commit(tree: &Tree, value: Node, action: StoreAction) -> Result<()> {
    let hook = tree.borrow().commit_hook.clone();
    if let Some(hook) = hook {
        hook(&value)?;
    }

    {
        let mut core = tree.borrow_mut();
        let core = &mut *core;
        core.state = value;
        core.generation = core.generation.next();
        core.registry.refresh(&core.state);
        core.subscribers.push_commit(core.generation, &core.state);

        debug!(
            generation = core.generation.0,
            action = %action.label(),
            "state committed"
        );

        core.events.broadcast(StoreEvent::Changed {
            generation: core.generation,
            action,
            state: core.state.clone(),
        });
    }

    notify(tree);
    Ok(())
}

/// Deliver pending changes to subscribers in subscription order.
///
/// A write made from inside a callback commits immediately; its delivery
/// is folded into the running pass, which repeats until nothing is owed.
fn notify(tree: &Tree) {
    {
        let mut core = tree.borrow_mut();
        if core.notifying {
            return;
        }
        core.notifying = true;
    }
    let _guard = NotifyGuard(tree);

    loop {
        let ids = tree.borrow().subscribers.ids();
        let mut delivered = false;

        for id in ids {
            let due = tree.borrow_mut().take_due(id);
            if let Some((callback, value, generation)) = due {
                delivered = true;
                callback(value, generation);
            }
        }

        if !delivered {
            break;
        }
    }
}

/// Clears the notifying flag even if a callback panics.
struct NotifyGuard<'a>(&'a Tree);

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut core) = self.0.try_borrow_mut() {
            core.notifying = false;
        }
    }
}
