//! Error types for the engine.
//!
//! All failures are reported synchronously to the calling operation and
//! nothing is retried internally. Failed underlying stores (out-of-bounds
//! index writes, removing an absent field, addressing a collection with the
//! wrong kind of key) surface here and never fire change events.

use thiserror::Error;

use crate::value::Key;

/// Errors produced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The argument to `wrap` (or a nested value that must be observed) is
    /// a scalar. Scalars are never wrapped and never carry an event bus.
    #[error("cannot observe non-composite value of kind `{0}`")]
    NotComposite(&'static str),

    /// The argument to `watch`/`unwatch` is composite but was never
    /// produced by `wrap`.
    #[error("value has never been wrapped for observation")]
    NotObservable,

    /// A pipe record exists for a field but its forwarding callback can no
    /// longer be resolved. This indicates an invariant violation inside the
    /// engine, not a recoverable condition.
    #[error("no forwarding pipe resolvable for key `{0}`")]
    StaleDependency(Key),

    /// A structural method was invoked on the wrong kind of collection,
    /// e.g. `push` on a map.
    #[error("operation expects {expected}, but the value is {actual}")]
    KindMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// The given key cannot address this collection, e.g. a field key on a
    /// list or an index key on a map.
    #[error("key `{0}` cannot address this collection")]
    InvalidKey(Key),

    /// There is no value stored at the given key.
    #[error("no value stored at key `{0}`")]
    Missing(Key),

    /// An index write past the end of a list.
    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
