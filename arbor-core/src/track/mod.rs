//! Dependency Tracking
//!
//! This module builds the memoization layer on top of the observation
//! layer: a [`Computed`] evaluates a function inside a collection session,
//! subscribes to exactly the fields the function read, and exposes an
//! [`InvalidationSignal`] that fires once per debounced burst of
//! dependency changes.
//!
//! Dependency discovery is automatic. The side channel is a thread-local
//! stack of sessions fed by every observable read (and by bus triggers),
//! so functions need no knowledge of the tracking machinery — they just
//! read state through [`Observable`] handles.
//!
//! [`Observable`]: crate::observe::Observable

pub(crate) mod collector;
mod computed;
pub(crate) mod debounce;

pub use computed::{memoize, Computed, InvalidationSignal, DEFAULT_DEBOUNCE};
