//! Per-value observation state.
//!
//! A [`NodeState`] is what a composite cell's `OnceLock` slot holds once
//! the value has been wrapped: the value's event bus plus the pipe table
//! recording which fields currently forward a child's events here. The
//! state is created lazily on first wrap and dropped with the cell, so the
//! bus never outlives its value and never keeps it alive.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::observe::bus::{ChangeBus, ChangeEvent, SubscriptionId};
use crate::track::collector::{self, DepKey};
use crate::value::Key;

pub(crate) struct NodeState {
    pub(crate) bus: ChangeBus,
    /// Field -> forwarding-callback registration on that field's child bus.
    pub(crate) pipes: RwLock<HashMap<Key, SubscriptionId>>,
}

impl NodeState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            bus: ChangeBus::new(),
            pipes: RwLock::new(HashMap::new()),
        })
    }

    /// Fire `event` on this value's bus.
    ///
    /// While a dependency-collection session is active the bus also reports
    /// itself (keyed by the event's first path segment), so mutations made
    /// inside a memoized computation become dependencies of it.
    pub(crate) fn trigger(self: &Arc<Self>, event: &ChangeEvent) {
        if let Some(first) = event.path.first() {
            collector::report(self, DepKey::Exact(first.clone()));
        }
        self.bus.trigger(event);
    }
}
