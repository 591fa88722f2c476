//! Typed error taxonomy for the reactive graph.
//!
//! Kinds mirror the failure table in the runtime's error handling design:
//! write-time failures (`NullishValue`, `InvalidValue`, `DuplicateKey`, ...)
//! propagate synchronously to the caller, while compute-time failures
//! (errors raised inside a `Memo`/`Task` body) are captured into the node's
//! `error` slot and rethrown from [`crate::memo::Memo::try_get`] /
//! [`crate::task::Task::try_get`] on the next read.

use std::fmt;

/// An error raised by some operation on the reactive graph.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReactiveError {
    /// `create`/`set` was called with a null/undefined-equivalent value
    /// (`Option::None` where the signal disallows it).
    #[error("nullish value written to {node}")]
    NullishValue {
        /// Debug label of the offending node.
        node: NodeLabel,
    },

    /// A value failed a user-supplied guard, or a value of a forbidden
    /// shape was passed where one was not expected.
    #[error("invalid value written to {node}: {reason}")]
    InvalidValue {
        /// Debug label of the offending node.
        node: NodeLabel,
        /// Human-readable reason the guard rejected the value.
        reason: String,
    },

    /// A callback passed to a memo/task/update was not callable with the
    /// expected arity, or panicked during its own setup.
    #[error("invalid callback passed to {node}: {reason}")]
    InvalidCallback {
        /// Debug label of the offending node.
        node: NodeLabel,
        /// Human-readable reason.
        reason: String,
    },

    /// A `Sensor` was read before its `start` callback produced a value and
    /// no initial value was supplied.
    #[error("read of unset sensor value on {node}")]
    UnsetValue {
        /// Debug label of the offending node.
        node: NodeLabel,
    },

    /// `refresh` observed `RUNNING` on the node it was asked to refresh:
    /// the node's computation transitively reads itself.
    #[error("circular dependency detected while refreshing {node}")]
    CircularDependency {
        /// Debug label of the node whose refresh cycled back to itself.
        node: NodeLabel,
    },

    /// A write was attempted on a signal that is derived (read-only)
    /// through a composite's structural-access layer.
    #[error("attempted to write to read-only signal {node}")]
    ReadonlySignal {
        /// Debug label of the offending node.
        node: NodeLabel,
    },

    /// `add` was called with a key that already exists in a `Store`/`List`.
    #[error("duplicate key {key:?} in {node}")]
    DuplicateKey {
        /// Debug label of the composite.
        node: NodeLabel,
        /// The key that was already present.
        key: String,
    },

    /// An array-only method (e.g. `splice`, `derive_collection`) was
    /// called on a record-shaped `Store`.
    #[error("method {method} is not available on record-shaped {node}")]
    ForbiddenMethod {
        /// Debug label of the offending node.
        node: NodeLabel,
        /// Name of the method that was forbidden.
        method: &'static str,
    },

    /// Observed inside a `Task` body after its abort token has tripped.
    #[error("task {node} was aborted")]
    AbortError {
        /// Debug label of the aborted task.
        node: NodeLabel,
    },
}

/// A cheap, cloneable debug label for a node, used only in error messages.
///
/// Carries the node's kind and, in debug builds, the source location at
/// which it was created, following the teacher crate's
/// `#[cfg(debug_assertions)] created_at: Location` diagnostic pattern.
#[derive(Debug, Clone)]
pub struct NodeLabel {
    pub(crate) kind: &'static str,
    #[cfg(debug_assertions)]
    pub(crate) created_at: &'static std::panic::Location<'static>,
}

impl NodeLabel {
    #[track_caller]
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            #[cfg(debug_assertions)]
            created_at: std::panic::Location::caller(),
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(debug_assertions)]
        {
            write!(f, "{} (created at {})", self.kind, self.created_at)
        }
        #[cfg(not(debug_assertions))]
        {
            write!(f, "{}", self.kind)
        }
    }
}

/// Convenience alias for fallible public APIs.
pub type Result<T> = std::result::Result<T, ReactiveError>;
