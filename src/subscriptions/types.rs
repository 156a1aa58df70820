//! Subscription types: change listeners and the commit event stream.

use crate::state::Node;
use crate::store::TreeCore;
use crate::types::{Generation, Path, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::Weak;

/// Configuration for a commit event stream.
#[derive(Clone, Debug)]
pub struct EventStreamConfig {
    /// Max buffered events before the consumer is dropped.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// What kind of write produced a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Set,
    Delete,
}

/// Metadata describing the write behind a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAction {
    pub kind: ActionKind,
    /// Path of the store handle the write was issued on.
    pub origin: Path,
}

impl StoreAction {
    pub fn set(origin: Path) -> Self {
        Self {
            kind: ActionKind::Set,
            origin,
        }
    }

    pub fn delete(origin: Path) -> Self {
        Self {
            kind: ActionKind::Delete,
            origin,
        }
    }

    /// Short label such as `set /todos/3`.
    pub fn label(&self) -> String {
        let kind = match self.kind {
            ActionKind::Set => "set",
            ActionKind::Delete => "delete",
        };
        format!("{} {}", kind, self.origin)
    }
}

/// Events emitted on a commit event stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// The root value was replaced.
    Changed {
        generation: Generation,
        action: StoreAction,
        state: Node,
    },

    /// The stream was closed.
    Dropped { reason: DropReason },
}

/// Why an event stream was closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly closed.
    Unsubscribed,
}

/// Identifier of one event stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventStreamId(pub u64);

/// Receiving end of a commit event stream.
pub struct EventHandle {
    pub id: EventStreamId,
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl EventHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.receiver.try_iter().collect()
    }
}

/// A live change listener.
///
/// Unsubscribes when dropped. [`Subscription::unsubscribe`] may be called
/// any number of times.
pub struct Subscription {
    id: SubscriptionId,
    tree: Weak<RefCell<TreeCore>>,
    live: Cell<bool>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, tree: Weak<RefCell<TreeCore>>) -> Self {
        Self {
            id,
            tree,
            live: Cell::new(true),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.live.get()
    }

    /// Stop receiving changes.
    pub fn unsubscribe(&self) {
        if !self.live.replace(false) {
            return;
        }
        if let Some(tree) = self.tree.upgrade() {
            // the callback may hold subscriptions of its own; release it
            // only once the tree is no longer borrowed
            let callback = tree.borrow_mut().remove_subscriber(self.id);
            drop(callback);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("live", &self.live.get())
            .finish()
    }
}
