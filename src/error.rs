//! Error taxonomy for the pulse core.
//!
//! | Error              | Raised by                      | Handling                                |
//! |--------------------|--------------------------------|-----------------------------------------|
//! | [`Overflow`]       | `Buffer::push` on a full buffer | early stop of the pushing module        |
//! | [`CapabilityError`] | injected producers/transforms  | item-local skip, or fatal per policy    |
//! | [`ModuleFatal`]    | `Module::pulse`                | module degraded until reset             |
//! | [`LinkageError`]   | `Sequence` build / edit        | construction aborted, never at runtime  |
//!
//! Only [`LinkageError`] ever leaves the core as a `Result::Err`. Everything
//! raised while pulsing is absorbed into the pulse report.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A bounded buffer refused an item. The item is handed back untouched.
#[derive(Error)]
#[error("buffer full (capacity {capacity})")]
pub struct Overflow<T> {
    pub item: T,
    pub capacity: usize,
}

impl<T> Overflow<T> {
    pub fn into_item(self) -> T {
        self.item
    }
}

impl<T> std::fmt::Debug for Overflow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overflow")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Failure reported by an injected capability (producer, transform, aggregate, consumer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// This one item could not be handled; the next one may well succeed.
    #[error("item rejected: {0}")]
    Item(String),

    /// The capability is gone for good (lost connection, model unloaded, ...).
    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    pub fn item(reason: impl Into<String>) -> Self {
        Self::Item(reason.into())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn is_item_local(&self) -> bool {
        matches!(self, Self::Item(_))
    }
}

/// Reason a module was marked degraded.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ModuleFatal {
    #[error("capability failed: {0}")]
    Capability(String),

    #[error("item error with abort policy: {0}")]
    ItemAborted(String),

    #[error("pulse exceeded its {budget:?} budget (took {elapsed:?})")]
    Timeout { budget: Duration, elapsed: Duration },

    #[error("capability panicked: {0}")]
    Panicked(String),
}

/// Malformed sequence. Raised at build, validate or reconfiguration time only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkageError {
    #[error("sequence has no modules")]
    Empty,

    #[error("duplicate module name '{0}'")]
    DuplicateName(String),

    #[error("unknown module '{0}'")]
    UnknownModule(String),

    #[error("sequence has no source module")]
    NoSource,

    #[error("sequence has no sink module")]
    NoSink,

    #[error("module '{module}' has no upstream to read from")]
    MissingInput { module: String },

    #[error("source module '{module}' cannot have an input")]
    SourceWithInput { module: String },

    #[error("module '{module}' takes one input but was given {count}")]
    TooManyInputs { module: String, count: usize },

    #[error("sink module '{module}' cannot feed '{downstream}'")]
    SinkWithOutput { module: String, downstream: String },

    #[error("output of '{module}' is not consumed by any module")]
    DanglingOutput { module: String },

    #[error("output of '{module}' is consumed by more than one module")]
    SharedOutput { module: String },

    #[error("module '{module}' reads from '{upstream}', which does not run before it")]
    Cycle { module: String, upstream: String },

    #[error("'{upstream}' emits '{emits}' but '{module}' accepts '{accepts}'")]
    KindMismatch {
        upstream: String,
        module: String,
        emits: String,
        accepts: String,
    },

    #[error("module '{module}' is misconfigured: {reason}")]
    InvalidConfig { module: String, reason: String },

    #[error("module '{module}' cannot be {action}: {reason}")]
    Unsupported {
        module: String,
        action: &'static str,
        reason: String,
    },
}
