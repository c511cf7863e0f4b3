//! Observation Layer
//!
//! This module implements the surrogate registry, the interception layer,
//! and the per-value change bus with parent/child event propagation.
//!
//! # Concepts
//!
//! ## Surrogates
//!
//! [`wrap`] returns an [`Observable`] handle for a composite [`Value`].
//! Exactly one set of observation state exists per composite for its
//! lifetime; wrapping again returns a handle to the same state.
//!
//! ## Change events
//!
//! Every successful write or delete fires one [`ChangeEvent`] on the
//! mutated value's own bus, carrying the single-segment path of the field.
//! A value's bus receives a direct event if and only if the mutation
//! happened on that value itself.
//!
//! ## Piping
//!
//! When a field holds another composite, a forwarding subscription on the
//! child's bus re-emits its events on the parent with the field name
//! prepended. A watcher registered at the root therefore sees every
//! mutation in the subtree with the full path from root to mutation site.
//! Pipes are torn down when the field is overwritten or deleted, so a
//! detached child never leaks events into its former parent.
//!
//! [`Value`]: crate::value::Value

pub(crate) mod bus;
pub(crate) mod node;
mod observable;
pub(crate) mod pipe;

pub use bus::{ChangeEvent, EventFilter, EventKind, SubscriptionId};
pub use observable::{unwatch, watch, wrap, Observable};
