//! Event Propagation ("piping")
//!
//! When a reactive field holds another composite, the parent bus subscribes
//! to the child bus so that any change inside the child bubbles up with the
//! field name prepended to the reported path. The subscription id is
//! recorded in the parent's pipe table keyed by the field, so overwriting
//! or deleting the field tears down exactly that forwarding callback —
//! including when the same field has since been re-piped to a different
//! child.
//!
//! Forwarding callbacks hold only a `Weak` reference to the parent: the
//! child never keeps its parent alive, and a forwarder whose parent is gone
//! is inert.

use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::observe::bus::EventFilter;
use crate::observe::node::NodeState;
use crate::value::{Key, Value};

/// Install a forwarding callback from `child`'s bus onto `parent`,
/// re-triggering every child event with `key` prepended to its path.
pub(crate) fn pipe(parent: &Arc<NodeState>, child: &Arc<NodeState>, key: Key) {
    trace!(key = %key, "pipe installed");

    let weak_parent = Arc::downgrade(parent);
    let prefix = key.clone();
    let id = child.bus.on(
        EventFilter::Any,
        Arc::new(move |event| {
            if let Some(parent) = weak_parent.upgrade() {
                parent.trigger(&event.prefixed(&prefix));
            }
        }),
    );

    parent
        .pipes
        .write()
        .expect("pipe table lock poisoned")
        .insert(key, id);
}

/// Remove the forwarding callback recorded for `key`, if any.
///
/// `old_child` is the value previously stored at `key`. Returns whether a
/// pipe was removed; a recorded pipe whose old child carries no observation
/// state is an invariant violation ([`Error::StaleDependency`]).
pub(crate) fn unpipe(parent: &Arc<NodeState>, old_child: &Value, key: &Key) -> Result<bool> {
    let id = match parent
        .pipes
        .write()
        .expect("pipe table lock poisoned")
        .remove(key)
    {
        Some(id) => id,
        // Never piped: the child was stored but not yet revealed by a read.
        None => return Ok(false),
    };

    trace!(key = %key, "pipe removed");

    let child = old_child
        .node()
        .ok_or_else(|| Error::StaleDependency(key.clone()))?;
    child.bus.off(id);
    Ok(true)
}
