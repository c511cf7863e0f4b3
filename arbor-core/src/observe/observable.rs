//! Interception Layer
//!
//! Rust has no transparent proxy mechanism, so the surrogate returned by
//! [`wrap`] is an explicit handle: every read goes through
//! [`Observable::get`]/[`Observable::child`] and every write through
//! [`Observable::set`]/[`Observable::remove`]. The trade-off versus
//! call-site transparency is deliberate and visible in the API.
//!
//! # What the traps do
//!
//! - **Read**: returns the stored raw value. If it is composite, its
//!   observation state is created on demand and a pipe from this value to
//!   it is ensured, so later mutations of the child reach watchers here
//!   with a rooted path. Reads fire no events, but they report to any
//!   active dependency-collection session.
//! - **Write**: composite values are given observation state up front,
//!   writes of an identical value (pointer identity for composites, value
//!   identity for scalars) are suppressed entirely, and on success the old
//!   child is unpiped, the new child piped, and one `Set` event fired.
//! - **Delete**: on success the old child is unpiped and one `Delete`
//!   event fired. Removing an absent field fires nothing.
//!
//! # Structural list mutations
//!
//! `push`, `pop`, `shift`, `unshift`, `splice`, `sort_by` and `reverse`
//! mutate the raw list directly and report only the aggregate length
//! change as a single `Set` event with path `[Key::Length]`. Per-index
//! changes made by these methods are not individually reported; that is a
//! documented baseline limitation. Pipes are maintained, though: removed
//! elements are unpiped (a structurally removed child never leaks events
//! into its former list) and surviving elements' pipes are re-installed
//! at their shifted index. `sort_by` and `reverse` permute in place and
//! do not re-key. Elements inserted structurally are wired for
//! propagation on first access.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use smallvec::smallvec;
use tracing::trace;

use crate::error::{Error, Result};
use crate::observe::bus::{ChangeEvent, EventFilter, EventKind, SubscriptionId};
use crate::observe::node::NodeState;
use crate::observe::pipe::{pipe, unpipe};
use crate::track::collector::{self, DepKey};
use crate::value::{Key, ListCell, Value};

/// The surrogate handle for an observed composite value.
///
/// Cheap to clone; clones share the same underlying value and bus. Two
/// handles are equal when they observe the same composite.
#[derive(Clone)]
pub struct Observable {
    raw: Value,
    node: Arc<NodeState>,
}

/// Wrap a composite value for observation.
///
/// Idempotent: wrapping the same composite again returns a handle to the
/// same observation state. Fails with [`Error::NotComposite`] for scalars.
pub fn wrap(value: &Value) -> Result<Observable> {
    let node = match value {
        Value::Map(cell) => cell.node.get_or_init(NodeState::new).clone(),
        Value::List(cell) => cell.node.get_or_init(NodeState::new).clone(),
        other => return Err(Error::NotComposite(other.kind_name())),
    };
    Ok(Observable {
        raw: value.clone(),
        node,
    })
}

/// Register a change listener on an observed value's bus.
///
/// Fails with [`Error::NotComposite`] for scalars and
/// [`Error::NotObservable`] if the value was never wrapped.
pub fn watch<F>(value: &Value, filter: EventFilter, callback: F) -> Result<SubscriptionId>
where
    F: Fn(&ChangeEvent) + Send + Sync + 'static,
{
    if !value.is_composite() {
        return Err(Error::NotComposite(value.kind_name()));
    }
    let node = value.node().ok_or(Error::NotObservable)?;
    Ok(node.bus.on(filter, Arc::new(callback)))
}

/// Deregister a change listener previously registered with [`watch`].
///
/// Returns whether the registration was found.
pub fn unwatch(value: &Value, id: SubscriptionId) -> Result<bool> {
    if !value.is_composite() {
        return Err(Error::NotComposite(value.kind_name()));
    }
    let node = value.node().ok_or(Error::NotObservable)?;
    Ok(node.bus.off(id))
}

impl Observable {
    /// The underlying raw value (the unwrap direction).
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn is_map(&self) -> bool {
        matches!(self.raw, Value::Map(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.raw, Value::List(_))
    }

    /// Register a change listener on this value's bus.
    pub fn watch<F>(&self, filter: EventFilter, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.node.bus.on(filter, Arc::new(callback))
    }

    /// Deregister a listener. Returns whether the registration was found.
    pub fn unwatch(&self, id: SubscriptionId) -> bool {
        self.node.bus.off(id)
    }

    fn read_raw(&self, key: &Key) -> Option<Value> {
        match (&self.raw, key) {
            (Value::Map(cell), Key::Field(field)) => cell
                .entries
                .read()
                .expect("map lock poisoned")
                .get(field)
                .cloned(),
            (Value::List(cell), Key::Index(index)) => cell
                .items
                .read()
                .expect("list lock poisoned")
                .get(*index)
                .cloned(),
            (Value::List(cell), Key::Length) => {
                let len = cell.items.read().expect("list lock poisoned").len();
                Some(Value::Int(len as i64))
            }
            _ => None,
        }
    }

    /// Read the value stored at `key`.
    ///
    /// Composite results are wired for observation on the way out (bus
    /// created, pipe from this value ensured). On a list, `Key::Length`
    /// reads the current length.
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        collector::report(&self.node, DepKey::Exact(key.clone()));

        let value = self.read_raw(&key)?;
        if value.is_composite() {
            if let Ok(child) = wrap(&value) {
                self.ensure_pipe(&key, &child);
            }
        }
        Some(value)
    }

    /// Read the composite stored at `key` as an [`Observable`].
    ///
    /// Fails with [`Error::Missing`] if nothing is stored there and
    /// [`Error::NotComposite`] if a scalar is.
    pub fn child(&self, key: impl Into<Key>) -> Result<Observable> {
        let key = key.into();
        let value = self
            .get(key.clone())
            .ok_or_else(|| Error::Missing(key))?;
        wrap(&value)
    }

    fn ensure_pipe(&self, key: &Key, child: &Observable) {
        // A value stored inside itself would forward its own events forever.
        if Arc::ptr_eq(&self.node, &child.node) {
            return;
        }
        let already = self
            .node
            .pipes
            .read()
            .expect("pipe table lock poisoned")
            .contains_key(key);
        if !already {
            pipe(&self.node, &child.node, key.clone());
        }
    }

    /// Write `value` at `key`, firing a `Set` event on success.
    ///
    /// Writing a value identical to the current one is a no-op: no event
    /// fires and no pipe is rebuilt. List index writes are bounds-checked;
    /// a failed store fires nothing.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();

        // Give composites their observation state before storing, so
        // future nested access is intercepted.
        if value.is_composite() {
            wrap(&value)?;
        }

        let old = match (&self.raw, &key) {
            (Value::Map(cell), Key::Field(field)) => {
                let mut entries = cell.entries.write().expect("map lock poisoned");
                let old = entries.get(field).cloned();
                if old.as_ref() == Some(&value) {
                    return Ok(());
                }
                entries.insert(field.clone(), value.clone());
                old
            }
            (Value::List(cell), Key::Index(index)) => {
                let mut items = cell.items.write().expect("list lock poisoned");
                let len = items.len();
                if *index >= len {
                    return Err(Error::IndexOutOfBounds { index: *index, len });
                }
                let old = items[*index].clone();
                if old == value {
                    return Ok(());
                }
                items[*index] = value.clone();
                Some(old)
            }
            // TODO: support assigning `length` to truncate or extend lists.
            _ => return Err(Error::InvalidKey(key)),
        };

        self.after_store(key, old, value)
    }

    /// Pipe maintenance plus the `Set` event, run after a successful store.
    fn after_store(&self, key: Key, old: Option<Value>, new: Value) -> Result<()> {
        if let Some(old) = &old {
            if old.is_composite() {
                unpipe(&self.node, old, &key)?;
            }
        }
        if new.is_composite() {
            let child = wrap(&new)?;
            self.ensure_pipe(&key, &child);
        }

        let path = smallvec![key];
        self.node.trigger(&ChangeEvent {
            kind: EventKind::Set,
            path,
            value: Some(new),
            old_value: old,
        });
        Ok(())
    }

    /// Remove the field `key` from a map, firing a `Delete` event.
    ///
    /// Removing an absent field succeeds, returns `None` and fires
    /// nothing. The order of the remaining entries is preserved.
    pub fn remove(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        let key = key.into();
        let old = match (&self.raw, &key) {
            (Value::Map(cell), Key::Field(field)) => cell
                .entries
                .write()
                .expect("map lock poisoned")
                .shift_remove(field),
            (Value::List(_), _) => {
                return Err(Error::KindMismatch {
                    expected: "a map",
                    actual: self.raw.kind_name(),
                })
            }
            _ => return Err(Error::InvalidKey(key)),
        };

        let Some(old) = old else {
            return Ok(None);
        };
        if old.is_composite() {
            unpipe(&self.node, &old, &key)?;
        }
        self.node.trigger(&ChangeEvent {
            kind: EventKind::Delete,
            path: smallvec![key],
            value: None,
            old_value: Some(old.clone()),
        });
        Ok(Some(old))
    }

    /// Number of entries (map) or elements (list).
    pub fn len(&self) -> usize {
        match &self.raw {
            Value::Map(cell) => {
                collector::report(&self.node, DepKey::Any);
                cell.entries.read().expect("map lock poisoned").len()
            }
            Value::List(cell) => {
                collector::report(&self.node, DepKey::Exact(Key::Length));
                cell.items.read().expect("list lock poisoned").len()
            }
            _ => unreachable!("observables are always composite"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The field names of a map, in insertion order.
    pub fn keys(&self) -> Result<Vec<String>> {
        match &self.raw {
            Value::Map(cell) => {
                collector::report(&self.node, DepKey::Any);
                Ok(cell
                    .entries
                    .read()
                    .expect("map lock poisoned")
                    .keys()
                    .cloned()
                    .collect())
            }
            other => Err(Error::KindMismatch {
                expected: "a map",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn contains_key(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        collector::report(&self.node, DepKey::Exact(key.clone()));
        self.read_raw(&key).is_some()
    }

    // ------------------------------------------------------------------
    // Structural list mutations
    // ------------------------------------------------------------------

    fn list_cell(&self) -> Result<&Arc<ListCell>> {
        match &self.raw {
            Value::List(cell) => Ok(cell),
            other => Err(Error::KindMismatch {
                expected: "a list",
                actual: other.kind_name(),
            }),
        }
    }

    fn emit_length(&self, old_len: usize, new_len: usize) {
        if old_len == new_len {
            return;
        }
        trace!(old_len, new_len, "length changed");
        self.node.trigger(&ChangeEvent {
            kind: EventKind::Set,
            path: smallvec![Key::Length],
            value: Some(Value::Int(new_len as i64)),
            old_value: Some(Value::Int(old_len as i64)),
        });
    }

    /// Pipe maintenance for a structural mutation that removed `removed`
    /// elements at `start` and inserted `inserted` there. Every index pipe
    /// at or past `start` is torn down; pipes of surviving elements are
    /// re-installed at their shifted index, so events keep carrying the
    /// index the element actually lives at. `old_items` is the list
    /// before the mutation.
    fn rekey_index_pipes(
        &self,
        old_items: &[Value],
        start: usize,
        removed: usize,
        inserted: usize,
    ) -> Result<()> {
        let mut affected: Vec<(usize, SubscriptionId)> = Vec::new();
        {
            let mut pipes = self.node.pipes.write().expect("pipe table lock poisoned");
            pipes.retain(|key, id| match key {
                Key::Index(index) if *index >= start => {
                    affected.push((*index, *id));
                    false
                }
                _ => true,
            });
        }

        for (index, id) in affected {
            let child = old_items
                .get(index)
                .and_then(|value| value.node())
                .ok_or(Error::StaleDependency(Key::Index(index)))?;
            child.bus.off(id);
            if index >= start + removed {
                pipe(&self.node, &child, Key::Index(index - removed + inserted));
            }
        }
        Ok(())
    }

    /// Append an element. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let cell = self.list_cell()?;
        let (old_len, new_len) = {
            let mut items = cell.items.write().expect("list lock poisoned");
            let old_len = items.len();
            items.push(value.into());
            (old_len, items.len())
        };
        self.emit_length(old_len, new_len);
        Ok(new_len)
    }

    /// Remove and return the last element. A removed composite is unpiped.
    pub fn pop(&self) -> Result<Option<Value>> {
        let cell = self.list_cell()?;
        let (old_items, new_len, popped) = {
            let mut items = cell.items.write().expect("list lock poisoned");
            let old_items = items.clone();
            let popped = items.pop();
            (old_items, items.len(), popped)
        };
        let old_len = old_items.len();
        if popped.is_some() {
            self.rekey_index_pipes(&old_items, old_len - 1, 1, 0)?;
        }
        self.emit_length(old_len, new_len);
        Ok(popped)
    }

    /// Remove and return the first element. A removed composite is
    /// unpiped; surviving pipes follow their elements down one index.
    pub fn shift(&self) -> Result<Option<Value>> {
        let cell = self.list_cell()?;
        let (old_items, new_len, shifted) = {
            let mut items = cell.items.write().expect("list lock poisoned");
            let old_items = items.clone();
            let shifted = if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            };
            (old_items, items.len(), shifted)
        };
        let old_len = old_items.len();
        if shifted.is_some() {
            self.rekey_index_pipes(&old_items, 0, 1, 0)?;
        }
        self.emit_length(old_len, new_len);
        Ok(shifted)
    }

    /// Prepend an element. Returns the new length. Existing pipes follow
    /// their elements up one index.
    pub fn unshift(&self, value: impl Into<Value>) -> Result<usize> {
        let cell = self.list_cell()?;
        let (old_items, new_len) = {
            let mut items = cell.items.write().expect("list lock poisoned");
            let old_items = items.clone();
            items.insert(0, value.into());
            (old_items, items.len())
        };
        let old_len = old_items.len();
        self.rekey_index_pipes(&old_items, 0, 0, 1)?;
        self.emit_length(old_len, new_len);
        Ok(new_len)
    }

    /// Remove `delete_count` elements starting at `start` and insert
    /// `insert` in their place. Returns the removed elements. Out-of-range
    /// arguments are clamped to the list. Removed composites are unpiped;
    /// surviving pipes follow their elements to the shifted index.
    pub fn splice<I>(&self, start: usize, delete_count: usize, insert: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = Value>,
    {
        let cell = self.list_cell()?;
        let (old_items, new_len, removed, start) = {
            let mut items = cell.items.write().expect("list lock poisoned");
            let old_items = items.clone();
            let old_len = old_items.len();
            let start = start.min(old_len);
            let end = (start + delete_count).min(old_len);
            let removed: Vec<Value> = items.splice(start..end, insert).collect();
            (old_items, items.len(), removed, start)
        };
        let old_len = old_items.len();
        let inserted = new_len + removed.len() - old_len;
        if !removed.is_empty() || inserted > 0 {
            self.rekey_index_pipes(&old_items, start, removed.len(), inserted)?;
        }
        self.emit_length(old_len, new_len);
        Ok(removed)
    }

    /// Sort the list in place. The length never changes, so no event fires.
    pub fn sort_by<F>(&self, compare: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        let cell = self.list_cell()?;
        cell.items
            .write()
            .expect("list lock poisoned")
            .sort_by(compare);
        Ok(())
    }

    /// Reverse the list in place. The length never changes, so no event
    /// fires.
    pub fn reverse(&self) -> Result<()> {
        let cell = self.list_cell()?;
        cell.items.write().expect("list lock poisoned").reverse();
        Ok(())
    }

    pub(crate) fn node(&self) -> &Arc<NodeState> {
        &self.node
    }
}

impl PartialEq for Observable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("kind", &self.raw.kind_name())
            .finish()
    }
}

impl From<&Observable> for Value {
    /// Resolves a surrogate back to its raw value, so assigning a
    /// surrogate stores the underlying value and never double-wraps.
    fn from(observable: &Observable) -> Value {
        observable.raw.clone()
    }
}
