//! Dependency-Tracking Memoization
//!
//! A [`Computed`] wraps a function and discovers, at run time, which
//! reactive fields the function reads. Each evaluation:
//!
//! 1. Detaches the subscriptions recorded by the previous evaluation
//!    (idempotent: the first evaluation has none).
//! 2. Opens a collection session on the thread-local side channel.
//! 3. Runs the function; every observable read — anywhere down the call
//!    stack, with no caller cooperation — reports its bus and field.
//! 4. Closes the session (RAII, panic-safe) and caches the result.
//! 5. Subscribes an invalidation callback to every recorded dependency.
//!
//! When a dependency fires a matching change, the callback touches a
//! debounce timer; one timer expiry per burst marks the cache dirty and
//! emits the paired [`InvalidationSignal`]. Subscriptions are
//! field-granular: an event invalidates only if its first path segment is
//! a field the function actually read, so mutating an unrelated sibling
//! field on a shared object wakes nothing.
//!
//! # Caching modes
//!
//! With caching enabled (the default), [`Computed::get`] returns the
//! cached value while clean. With caching disabled it recomputes on every
//! call, still re-deriving dependencies for the invalidation signal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tracing::trace;

use crate::observe::bus::SubscriptionId;
use crate::observe::node::NodeState;
use crate::observe::EventFilter;
use crate::track::collector::{CollectGuard, Dependency};
use crate::track::debounce::Debouncer;

/// Debounce window applied by [`Computed::new`].
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(5);

type InvalidateCallback = Arc<dyn Fn() + Send + Sync>;

struct SignalInner {
    subs: RwLock<Vec<(SubscriptionId, InvalidateCallback)>>,
}

/// Fires once per coalesced burst of dependency changes.
#[derive(Clone)]
pub struct InvalidationSignal {
    inner: Arc<SignalInner>,
}

impl InvalidationSignal {
    fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                subs: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a callback invoked when the paired computation's
    /// dependencies change.
    pub fn on_invalidate<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.inner
            .subs
            .write()
            .expect("signal lock poisoned")
            .push((id, Arc::new(callback)));
        id
    }

    /// Deregister a callback. Returns whether the registration was found.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.subs.write().expect("signal lock poisoned");
        if let Some(pos) = subs.iter().position(|(sub_id, _)| *sub_id == id) {
            subs.remove(pos);
            true
        } else {
            false
        }
    }

    fn emit(&self) {
        let subs: Vec<InvalidateCallback> = self
            .inner
            .subs
            .read()
            .expect("signal lock poisoned")
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in subs {
            callback();
        }
    }
}

impl fmt::Debug for InvalidationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.inner.subs.read().expect("signal lock poisoned").len();
        f.debug_struct("InvalidationSignal")
            .field("subscriber_count", &count)
            .finish()
    }
}

struct ComputedInner<T> {
    compute: Box<dyn Fn() -> T + Send + Sync>,
    cache: RwLock<Option<T>>,
    dirty: Arc<AtomicBool>,
    caching: AtomicBool,
    /// Buses subscribed during the most recent evaluation.
    deps: Mutex<Vec<(Arc<NodeState>, SubscriptionId)>>,
    signal: InvalidationSignal,
    debouncer: Debouncer,
}

/// A memoized computation with run-time dependency discovery.
///
/// Cheap to clone; clones share the cache, the dependency set, and the
/// invalidation signal.
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed value with the default debounce window.
    ///
    /// The computation does not run until the first [`Computed::get`].
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_debounce(compute, DEFAULT_DEBOUNCE)
    }

    /// Create a computed value with an explicit debounce window.
    pub fn with_debounce<F>(compute: F, window: Duration) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let dirty = Arc::new(AtomicBool::new(true));
        let signal = InvalidationSignal::new();

        let fire_dirty = Arc::clone(&dirty);
        let fire_signal = signal.clone();
        let debouncer = Debouncer::new(window, move || {
            fire_dirty.store(true, Ordering::SeqCst);
            fire_signal.emit();
        });

        Self {
            inner: Arc::new(ComputedInner {
                compute: Box::new(compute),
                cache: RwLock::new(None),
                dirty,
                caching: AtomicBool::new(true),
                deps: Mutex::new(Vec::new()),
                signal,
                debouncer,
            }),
        }
    }

    /// Get the value, recomputing when dirty (or always, with caching
    /// disabled).
    pub fn get(&self) -> T {
        if self.inner.caching.load(Ordering::SeqCst) && !self.is_dirty() {
            let cache = self.inner.cache.read().expect("cache lock poisoned");
            if let Some(value) = cache.as_ref() {
                return value.clone();
            }
        }
        self.recompute()
    }

    fn recompute(&self) -> T {
        trace!("recomputing");
        self.detach();

        // The guard closes the session on every exit path; a panic in the
        // computation must not leave the thread-wide channel collecting.
        let guard = CollectGuard::open();
        let value = (self.inner.compute)();
        let deps = guard.finish();

        *self.inner.cache.write().expect("cache lock poisoned") = Some(value.clone());
        self.inner.dirty.store(false, Ordering::SeqCst);
        self.attach(deps);
        value
    }

    /// Drop every subscription from the previous evaluation.
    fn detach(&self) {
        let mut held = self.inner.deps.lock().expect("deps lock poisoned");
        for (node, id) in held.drain(..) {
            node.bus.off(id);
        }
    }

    /// Subscribe a filtered invalidation callback to each dependency.
    fn attach(&self, deps: Vec<Dependency>) {
        let mut held = self.inner.deps.lock().expect("deps lock poisoned");
        for dep in deps {
            let weak = Arc::downgrade(&self.inner);
            let key = dep.key.clone();
            let id = dep.node.bus.on(
                EventFilter::Any,
                Arc::new(move |event| {
                    let Some(first) = event.path.first() else {
                        return;
                    };
                    if !key.matches(first) {
                        return;
                    }
                    if let Some(inner) = Weak::upgrade(&weak) {
                        inner.debouncer.touch();
                    }
                }),
            );
            held.push((dep.node, id));
        }
    }

    /// Whether a coalesced dependency change has landed since the last
    /// evaluation.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Enable or disable result caching. Dependency tracking and the
    /// invalidation signal work the same either way.
    pub fn set_caching(&self, enabled: bool) {
        self.inner.caching.store(enabled, Ordering::SeqCst);
    }

    /// The paired invalidation signal.
    pub fn signal(&self) -> InvalidationSignal {
        self.inner.signal.clone()
    }

    /// Number of buses subscribed by the most recent evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.lock().expect("deps lock poisoned").len()
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("dirty", &self.is_dirty())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        // Unsubscribe so dependency buses stop touching a dead debouncer.
        let mut held = self.deps.lock().expect("deps lock poisoned");
        for (node, id) in held.drain(..) {
            node.bus.off(id);
        }
    }
}

/// Wrap `compute` and return its invalidation signal alongside the
/// memoized value.
pub fn memoize<T, F>(compute: F) -> (InvalidationSignal, Computed<T>)
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    let computed = Computed::new(compute);
    (computed.signal(), computed)
}
