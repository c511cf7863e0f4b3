//! Change Bus
//!
//! Every observed composite owns one [`ChangeBus`]. The bus dispatches on a
//! closed event-kind enum rather than string keys: it keeps one ordered
//! subscriber list per kind plus one wildcard list, and every registration
//! is identified by a [`SubscriptionId`] so it can be removed precisely
//! even when the same callback was registered more than once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::value::{Key, Path, Value};

/// Unique identifier for one bus registration.
///
/// Returned by `watch` and by pipe installation; removing by id guarantees
/// exactly that registration is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What happened to a field.
///
/// `Set` and `Delete` stay distinct when events are piped to ancestors;
/// wildcard subscribers receive both and can branch on [`ChangeEvent::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A field was written (including the aggregate list-length event).
    Set,
    /// A field was removed.
    Delete,
}

/// Which events a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Only events of one kind.
    Kind(EventKind),
    /// Every event on the bus.
    Any,
}

/// A change notification.
///
/// `path` runs from the bus the subscriber watched down to the mutation
/// site. `value` and `old_value` are raw values, never surrogates; `value`
/// is `None` for deletes and `old_value` is `None` when the field did not
/// previously exist.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub path: Path,
    pub value: Option<Value>,
    pub old_value: Option<Value>,
}

impl ChangeEvent {
    /// The same event as seen one level up, with `key` prepended.
    pub(crate) fn prefixed(&self, key: &Key) -> ChangeEvent {
        let mut path = Path::with_capacity(self.path.len() + 1);
        path.push(key.clone());
        path.extend(self.path.iter().cloned());
        ChangeEvent {
            kind: self.kind,
            path,
            value: self.value.clone(),
            old_value: self.old_value.clone(),
        }
    }
}

pub(crate) type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

type SubscriberList = RwLock<Vec<(SubscriptionId, Callback)>>;

/// Per-value event dispatcher.
pub(crate) struct ChangeBus {
    set_subs: SubscriberList,
    delete_subs: SubscriberList,
    any_subs: SubscriberList,
}

impl ChangeBus {
    pub(crate) fn new() -> Self {
        Self {
            set_subs: RwLock::new(Vec::new()),
            delete_subs: RwLock::new(Vec::new()),
            any_subs: RwLock::new(Vec::new()),
        }
    }

    fn list(&self, filter: EventFilter) -> &SubscriberList {
        match filter {
            EventFilter::Kind(EventKind::Set) => &self.set_subs,
            EventFilter::Kind(EventKind::Delete) => &self.delete_subs,
            EventFilter::Any => &self.any_subs,
        }
    }

    /// Register `callback` for events matching `filter`.
    pub(crate) fn on(&self, filter: EventFilter, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.list(filter)
            .write()
            .expect("subscriber lock poisoned")
            .push((id, callback));
        id
    }

    /// Remove the registration with the given id.
    ///
    /// Returns whether a registration was found.
    pub(crate) fn off(&self, id: SubscriptionId) -> bool {
        for list in [&self.set_subs, &self.delete_subs, &self.any_subs] {
            let mut subs = list.write().expect("subscriber lock poisoned");
            if let Some(pos) = subs.iter().position(|(sub_id, _)| *sub_id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    /// Dispatch `event` to kind-specific subscribers first, wildcard
    /// subscribers second, each group in registration order.
    ///
    /// The lists are snapshotted before any callback runs, so a callback
    /// may register or remove subscribers; such changes take effect from
    /// the next trigger.
    pub(crate) fn trigger(&self, event: &ChangeEvent) {
        trace!(kind = ?event.kind, path = ?event.path, "trigger");

        let kind_subs: Vec<Callback> = self
            .list(EventFilter::Kind(event.kind))
            .read()
            .expect("subscriber lock poisoned")
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        let any_subs: Vec<Callback> = self
            .any_subs
            .read()
            .expect("subscriber lock poisoned")
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in kind_subs.iter().chain(any_subs.iter()) {
            callback(event);
        }
    }

    /// Total number of registrations across all lists.
    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        [&self.set_subs, &self.delete_subs, &self.any_subs]
            .iter()
            .map(|list| list.read().expect("subscriber lock poisoned").len())
            .sum()
    }
}
