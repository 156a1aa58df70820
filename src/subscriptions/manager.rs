//! Subscriber bookkeeping and commit event broadcasting.

use crate::state::{same_state, Node};
use crate::types::{Generation, Path, SubscriptionId};
use crossbeam_channel::{bounded, Sender};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use tracing::warn;

use super::types::{DropReason, EventHandle, EventStreamConfig, EventStreamId, StoreEvent};

/// Change callback. Receives the new value at the subscribed path and the
/// generation it belongs to.
pub(crate) type Callback = Rc<dyn Fn(Option<Node>, Generation)>;

/// Internal subscriber state.
struct Subscriber {
    path: Path,
    callback: Callback,
    /// Value most recently delivered (or seen at registration).
    last_emitted: Option<Node>,
    /// Root subscribers only: commits not yet delivered, oldest first.
    backlog: VecDeque<(Generation, Node)>,
}

/// A removed subscriber. Holds the callback so the caller can drop it
/// once the tree is no longer borrowed.
pub(crate) struct Removed {
    pub path: Path,
    pub callback: Callback,
}

/// Ordered set of change subscribers for one tree.
///
/// Root subscribers get every commit, in order. Other subscribers get the
/// latest value of their slice whenever it differs from what they last saw,
/// so several commits landing within one notification pass reach them as one.
pub(crate) struct SubscriberList {
    entries: BTreeMap<SubscriptionId, Subscriber>,
    next_id: u64,
}

impl SubscriberList {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Register a subscriber. `current` is the value it has already seen.
    pub fn add(&mut self, path: Path, callback: Callback, current: Option<Node>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Subscriber {
                path,
                callback,
                last_emitted: current,
                backlog: VecDeque::new(),
            },
        );
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> Option<Removed> {
        self.entries.remove(&id).map(|s| Removed {
            path: s.path,
            callback: s.callback,
        })
    }

    /// Queue a committed root value for every root subscriber.
    pub fn push_commit(&mut self, generation: Generation, state: &Node) {
        for subscriber in self.entries.values_mut() {
            if subscriber.path.is_root() {
                subscriber.backlog.push_back((generation, state.clone()));
            }
        }
    }

    /// Subscriber ids in subscription order.
    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.entries.keys().copied().collect()
    }

    pub fn path_of(&self, id: SubscriptionId) -> Option<&Path> {
        self.entries.get(&id).map(|s| &s.path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Next delivery owed to subscriber `id`, if any, marked as delivered.
    ///
    /// `current` is the value now at the subscriber's path; it is only
    /// consulted for non-root subscribers.
    pub fn take_due(
        &mut self,
        id: SubscriptionId,
        current: Option<Node>,
        generation: Generation,
    ) -> Option<(Callback, Option<Node>, Generation)> {
        let subscriber = self.entries.get_mut(&id)?;
        if subscriber.path.is_root() {
            let (generation, state) = subscriber.backlog.pop_front()?;
            subscriber.last_emitted = Some(state.clone());
            return Some((Rc::clone(&subscriber.callback), Some(state), generation));
        }
        if same_state(subscriber.last_emitted.as_ref(), current.as_ref()) {
            return None;
        }
        subscriber.last_emitted = current.clone();
        Some((Rc::clone(&subscriber.callback), current, generation))
    }
}

/// Fan-out of commit events to channel consumers.
///
/// Consumers that fall behind or hang up are dropped; a commit never waits
/// on or fails because of a consumer.
pub(crate) struct EventBroadcaster {
    sinks: BTreeMap<EventStreamId, Sender<StoreEvent>>,
    next_id: u64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            sinks: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Open a new stream.
    pub fn subscribe(&mut self, config: &EventStreamConfig) -> EventHandle {
        let id = EventStreamId(self.next_id);
        self.next_id += 1;
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        self.sinks.insert(id, sender);
        EventHandle { id, receiver }
    }

    /// Close a stream.
    pub fn unsubscribe(&mut self, id: EventStreamId) {
        if let Some(sender) = self.sinks.remove(&id) {
            // best effort
            let _ = sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn broadcast(&mut self, event: StoreEvent) {
        if self.sinks.is_empty() {
            return;
        }

        let mut to_remove = Vec::new();
        for (id, sender) in &self.sinks {
            if sender.try_send(event.clone()).is_err() {
                to_remove.push(*id);
            }
        }

        for id in to_remove {
            if let Some(sender) = self.sinks.remove(&id) {
                warn!(stream = id.0, "dropping slow or disconnected event consumer");
                let _ = sender.try_send(StoreEvent::Dropped {
                    reason: DropReason::BufferOverflow,
                });
            }
        }
    }
}
