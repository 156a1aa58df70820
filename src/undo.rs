//! Undo/redo history over any store.
//!
//! The manager keeps an ordered stack of snapshots and a cursor into it.
//! `undo` and `redo` move the cursor and write the snapshot back through the
//! store's ordinary `set`, so to the store they are indistinguishable from
//! any other write.
//!
//! # Invariants
//!
//! - Pushing a snapshot discards everything after the cursor (the redo tail).
//! - With `max_depth > 0`, at most `max_depth` undo steps are retained; the
//!   oldest snapshot is dropped first.
//! - In recording mode, commits made by the manager itself are not recorded,
//!   including ones whose delivery is deferred to a running notification pass.

use crate::error::{Result, StoreError};
use crate::state::Node;
use crate::store::Store;
use crate::subscriptions::Subscription;
use crate::types::Generation;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use tracing::trace;

/// Which way the cursor moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoDirection {
    Undo,
    Redo,
}

/// Customizes what is recorded and how it is restored.
pub trait UndoStrategy {
    /// Snapshot to record for a store value.
    fn extract(&self, state: &Node) -> Node {
        state.clone()
    }

    /// Whether `next` gets its own history entry. Returning `false`
    /// coalesces: `next` replaces the current entry instead.
    fn should_push(&self, _current: &Node, _next: &Node) -> bool {
        true
    }

    /// Restore a snapshot into the store.
    fn apply(&self, store: &dyn Store, snapshot: &Node, _direction: UndoDirection) -> Result<()> {
        store.set(snapshot.clone())
    }
}

/// Records whole values and restores them verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotStrategy;

impl UndoStrategy for SnapshotStrategy {}

#[derive(Debug, Default)]
struct History {
    stack: VecDeque<Node>,
    cursor: usize,
    max_depth: usize,
}

impl History {
    fn current(&self) -> Option<&Node> {
        self.stack.get(self.cursor)
    }

    fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    fn can_redo(&self) -> bool {
        self.cursor + 1 < self.stack.len()
    }

    fn push(&mut self, snapshot: Node, new_entry: bool) {
        if self.stack.is_empty() {
            self.stack.push_back(snapshot);
            self.cursor = 0;
            return;
        }

        self.stack.truncate(self.cursor + 1);
        if new_entry {
            self.stack.push_back(snapshot);
            self.cursor += 1;
        } else {
            self.stack[self.cursor] = snapshot;
        }

        if self.max_depth > 0 {
            while self.stack.len() > self.max_depth + 1 {
                self.stack.pop_front();
                self.cursor -= 1;
            }
        }
    }
}

/// Undo/redo for one store.
pub struct UndoManager<S: Store, U: UndoStrategy = SnapshotStrategy> {
    store: S,
    strategy: Rc<U>,
    history: Rc<RefCell<History>>,
    /// Set while `apply` runs.
    applying: Rc<Cell<bool>>,
    /// Generations committed by `apply` whose delivery was deferred.
    own_commits: Rc<RefCell<BTreeSet<Generation>>>,
    recording: Option<Subscription>,
}

impl<S: Store> UndoManager<S> {
    /// Manual mode: snapshots are taken only by [`UndoManager::push_current_state`].
    ///
    /// `max_depth` bounds the number of undo steps; 0 means unbounded.
    /// The current state is recorded as the starting point.
    pub fn new(store: S, max_depth: usize) -> Self {
        Self::with_strategy(store, max_depth, SnapshotStrategy)
    }

    /// Recording mode: every change emitted by the store is snapshotted.
    pub fn recording(store: S, max_depth: usize) -> Self {
        Self::recording_with_strategy(store, max_depth, SnapshotStrategy)
    }
}

impl<S: Store, U: UndoStrategy + 'static> UndoManager<S, U> {
    pub fn with_strategy(store: S, max_depth: usize, strategy: U) -> Self {
        let manager = Self {
            store,
            strategy: Rc::new(strategy),
            history: Rc::new(RefCell::new(History {
                max_depth,
                ..History::default()
            })),
            applying: Rc::new(Cell::new(false)),
            own_commits: Rc::new(RefCell::new(BTreeSet::new())),
            recording: None,
        };
        manager.push_current_state();
        manager
    }

    pub fn recording_with_strategy(store: S, max_depth: usize, strategy: U) -> Self {
        let mut manager = Self::with_strategy(store, max_depth, strategy);

        let history = Rc::clone(&manager.history);
        let strategy = Rc::clone(&manager.strategy);
        let applying = Rc::clone(&manager.applying);
        let own_commits = Rc::clone(&manager.own_commits);
        let subscription = manager.store.handle().subscribe_tagged(move |state, generation| {
            let own = {
                let mut own_commits = own_commits.borrow_mut();
                let own = own_commits.contains(&generation);
                own_commits.retain(|g| *g > generation);
                own
            };
            if own || applying.get() {
                return;
            }
            if let Some(state) = state {
                record(&history, strategy.as_ref(), &state);
            }
        });
        manager.recording = Some(subscription);
        manager
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether changes are being recorded automatically.
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Record the store's current value. Absent values are not recorded.
    pub fn push_current_state(&self) {
        if let Some(state) = self.store.state() {
            record(&self.history, self.strategy.as_ref(), &state);
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.borrow().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.borrow().can_redo()
    }

    /// Number of steps `undo` can take.
    pub fn undo_depth(&self) -> usize {
        self.history.borrow().cursor
    }

    /// Snapshot at the cursor.
    pub fn current(&self) -> Option<Node> {
        self.history.borrow().current().cloned()
    }

    /// Restore the previous snapshot.
    pub fn undo(&self) -> Result<()> {
        let snapshot = {
            let mut history = self.history.borrow_mut();
            if !history.can_undo() {
                return Err(StoreError::NothingToUndo);
            }
            history.cursor -= 1;
            history.stack[history.cursor].clone()
        };
        self.apply(&snapshot, UndoDirection::Undo).map_err(|e| {
            self.history.borrow_mut().cursor += 1;
            e
        })
    }

    /// Restore the next snapshot.
    pub fn redo(&self) -> Result<()> {
        let snapshot = {
            let mut history = self.history.borrow_mut();
            if !history.can_redo() {
                return Err(StoreError::NothingToRedo);
            }
            history.cursor += 1;
            history.stack[history.cursor].clone()
        };
        self.apply(&snapshot, UndoDirection::Redo).map_err(|e| {
            self.history.borrow_mut().cursor -= 1;
            e
        })
    }

    /// Discard the current snapshot and everything after it, then restore
    /// the previous one. Returns the discarded snapshot.
    pub fn drop_current_undo_state(&self) -> Result<Node> {
        let (dropped, previous) = {
            let mut history = self.history.borrow_mut();
            if !history.can_undo() {
                return Err(StoreError::NothingToUndo);
            }
            let cursor = history.cursor;
            let dropped = history.stack[cursor].clone();
            history.stack.truncate(cursor);
            history.cursor = cursor - 1;
            (dropped, history.stack[history.cursor].clone())
        };
        self.apply(&previous, UndoDirection::Undo)?;
        Ok(dropped)
    }

    /// Forget all history and start over from the current value.
    pub fn reset(&self) {
        {
            let mut history = self.history.borrow_mut();
            history.stack.clear();
            history.cursor = 0;
        }
        self.push_current_state();
    }

    fn apply(&self, snapshot: &Node, direction: UndoDirection) -> Result<()> {
        trace!(?direction, path = %self.store.path(), "applying undo snapshot");
        let handle = self.store.handle();
        let before = handle.generation();
        let was_applying = self.applying.replace(true);
        let result = self.strategy.apply(&self.store, snapshot, direction);
        self.applying.set(was_applying);

        // inside a notification pass these commits are delivered later
        let after = handle.generation();
        if self.is_recording() && after > before {
            self.own_commits
                .borrow_mut()
                .extend((before.0 + 1..=after.0).map(Generation));
        }
        result
    }
}

fn record<U: UndoStrategy + ?Sized>(history: &RefCell<History>, strategy: &U, state: &Node) {
    let snapshot = strategy.extract(state);
    let mut history = history.borrow_mut();
    let new_entry = match history.current() {
        Some(current) => strategy.should_push(current, &snapshot),
        None => true,
    };
    history.push(snapshot, new_entry);
}
