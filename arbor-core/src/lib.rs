//! Arbor Core
//!
//! This crate provides the core runtime for the Arbor reactive state
//! engine. It implements:
//!
//! - A dynamic value model (maps, lists, scalars) with pointer identity
//! - Surrogate handles that intercept every read, write, and delete
//! - Per-value change buses with parent/child event propagation, so a
//!   watcher at the root sees every mutation in the subtree with the full
//!   path to the mutation site
//! - Aggregate length events for structural list mutations
//! - Dependency-tracking memoization with a debounced invalidation signal
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - `value`: the raw data model and JSON interop
//! - `observe`: surrogates, change buses, and event piping
//! - `track`: dependency collection and memoization
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor_core::{memoize, watch, wrap, EventFilter, Value};
//!
//! let state = Value::map();
//! let root = wrap(&state)?;
//!
//! // Watch every mutation under the root.
//! watch(&state, EventFilter::Any, |event| {
//!     println!("{:?} at {:?}", event.kind, event.path);
//! })?;
//!
//! root.set("user", Value::map())?;
//! root.child("user")?.set("name", "ada")?;
//! // -> Set at [user], Set at [user, name]
//!
//! // A computed value discovers its own dependencies.
//! let user = root.child("user")?;
//! let (signal, greeting) = memoize(move || {
//!     format!("hello, {}", user.get("name").unwrap().as_str().unwrap())
//! });
//! signal.on_invalidate(|| println!("greeting is stale"));
//! greeting.get();
//! ```
//!
//! # Execution model
//!
//! The engine is synchronous: interception, event dispatch, and dependency
//! collection all run to completion on the caller's stack. The one
//! exception is the debounce timer owned by each [`Computed`], which
//! coalesces bursts of dependency changes into a single invalidation on a
//! background thread.

pub mod error;
pub mod observe;
pub mod track;
pub mod value;

pub use error::{Error, Result};
pub use observe::{
    unwatch, watch, wrap, ChangeEvent, EventFilter, EventKind, Observable, SubscriptionId,
};
pub use track::{memoize, Computed, InvalidationSignal, DEFAULT_DEBOUNCE};
pub use value::{Key, Path, Value};
