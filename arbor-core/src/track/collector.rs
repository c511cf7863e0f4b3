//! Dependency Collection Side Channel
//!
//! While a memoized computation runs, every reactive read (and every bus
//! trigger) must be recorded so the computation can subscribe to exactly
//! the fields it touched. The channel is a thread-local stack of sessions:
//! entering a session pushes, and an RAII guard pops on every exit path,
//! including panics — a leaked session would corrupt all subsequent
//! dependency tracking on the thread.
//!
//! Reports go to *every* active session, not just the innermost one, so a
//! memoized call nested inside another memoized call contributes its
//! dependencies to both (a stack discipline, not a single flag).

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::observe::node::NodeState;
use crate::value::Key;

/// Which events on a dependency's bus should invalidate the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DepKey {
    /// Only events whose first path segment is this key.
    Exact(Key),
    /// Any event on the bus (whole-collection reads).
    Any,
}

impl DepKey {
    pub(crate) fn matches(&self, first: &Key) -> bool {
        match self {
            DepKey::Exact(key) => key == first,
            DepKey::Any => true,
        }
    }
}

/// One recorded dependency: a bus and the field granularity read on it.
pub(crate) struct Dependency {
    pub(crate) node: Arc<NodeState>,
    pub(crate) key: DepKey,
}

struct Session {
    token: u64,
    deps: Vec<Dependency>,
}

thread_local! {
    static SESSIONS: RefCell<Vec<Session>> = const { RefCell::new(Vec::new()) };
}

fn next_token() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Record a dependency in every active session on this thread.
///
/// Deduplicates by bus identity and key; cheap no-op when no session is
/// active.
pub(crate) fn report(node: &Arc<NodeState>, key: DepKey) {
    SESSIONS.with(|sessions| {
        let mut sessions = sessions.borrow_mut();
        if sessions.is_empty() {
            return;
        }
        for session in sessions.iter_mut() {
            let seen = session
                .deps
                .iter()
                .any(|dep| Arc::ptr_eq(&dep.node, node) && dep.key == key);
            if !seen {
                session.deps.push(Dependency {
                    node: Arc::clone(node),
                    key: key.clone(),
                });
            }
        }
    });
}

/// Whether a collection session is active on this thread.
#[cfg(test)]
pub(crate) fn is_collecting() -> bool {
    SESSIONS.with(|sessions| !sessions.borrow().is_empty())
}

/// Guard for one collection session.
///
/// Dropping the guard closes the session; [`CollectGuard::finish`] closes
/// it and hands back the recorded dependencies.
pub(crate) struct CollectGuard {
    token: u64,
}

impl CollectGuard {
    /// Open a new session on top of the stack.
    pub(crate) fn open() -> Self {
        let token = next_token();
        SESSIONS.with(|sessions| {
            sessions.borrow_mut().push(Session {
                token,
                deps: Vec::new(),
            });
        });
        Self { token }
    }

    /// Close the session and return what it collected.
    pub(crate) fn finish(self) -> Vec<Dependency> {
        let deps = SESSIONS.with(|sessions| {
            let mut sessions = sessions.borrow_mut();
            let session = sessions.pop().expect("collection session stack empty");
            debug_assert_eq!(
                session.token, self.token,
                "collection sessions closed out of order"
            );
            session.deps
        });
        std::mem::forget(self);
        deps
    }
}

impl Drop for CollectGuard {
    /// Unwind path: discard the session but always close it.
    fn drop(&mut self) {
        SESSIONS.with(|sessions| {
            let mut sessions = sessions.borrow_mut();
            let popped = sessions.pop();
            if let Some(session) = popped {
                debug_assert_eq!(
                    session.token, self.token,
                    "collection sessions closed out of order"
                );
            }
        });
    }
}
