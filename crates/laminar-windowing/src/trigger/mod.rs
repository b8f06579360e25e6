//! # Trigger Module
//!
//! Decides when a window emits a pane.
//!
//! A [`Trigger`] is a tree descriptor. [`ExecutableTrigger`] flattens it into
//! pre-order, giving every node a stable index into the per-window
//! [`FinishedBits`]. Nodes keep no state of their own: counts, deadlines and
//! timers live in the key's state and timer registry, reached through a
//! [`TriggerContext`].
//!
//! ## Results
//!
//! | Result           | Meaning                                          |
//! |------------------|--------------------------------------------------|
//! | `Continue`       | Nothing to emit yet                              |
//! | `Fire`           | Emit a pane, keep evaluating                     |
//! | `FireAndFinish`  | Emit a pane, the node never fires again          |
//! | `AlreadyFinished`| (merge only) finished in every merged window     |
//!
//! A node whose finished bit is set is never invoked again until its window
//! is cleared.
//!
//! ```rust
//! use laminar_windowing::trigger::{ExecutableTrigger, Trigger};
//!
//! // Fire every two elements until the end of the window
//! let trigger = Trigger::repeatedly(Trigger::AfterCount(2))
//!     .or_finally(Trigger::AfterEndOfWindow);
//! let executable = ExecutableTrigger::new(&trigger).unwrap();
//! assert_eq!(executable.node_count(), 4);
//! ```

mod composite;
mod context;
mod executable;
mod finished;
mod leaf;

pub use context::{MergeInfo, TriggerContext};
pub use executable::ExecutableTrigger;
pub use finished::FinishedBits;

use crate::state::StateError;

/// Trigger tree descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Fires once the input watermark passes the end of the window, then
    /// finishes.
    AfterEndOfWindow,
    /// Fires every time the end-of-window timer fires; never finishes.
    Default,
    /// Fires once at least this many elements arrived in the window, then
    /// finishes.
    AfterCount(u64),
    /// Fires once processing time passes the first element's arrival plus
    /// this delay (milliseconds), then finishes.
    AfterProcessingTime(i64),
    /// Fires once every child has finished.
    AfterAll(Vec<Trigger>),
    /// Fires and finishes as soon as any child fires.
    AfterFirst(Vec<Trigger>),
    /// Runs children in sequence; finishes with the last one.
    AfterEach(Vec<Trigger>),
    /// Re-arms its child every time it fires; never finishes.
    Repeatedly(Box<Trigger>),
    /// Behaves like `main` until `until` fires, then finishes.
    OrFinally {
        /// Trigger producing the panes
        main: Box<Trigger>,
        /// Trigger ending the window
        until: Box<Trigger>,
    },
}

impl Trigger {
    /// Wraps `trigger` in [`Trigger::Repeatedly`].
    #[must_use]
    pub fn repeatedly(trigger: Trigger) -> Self {
        Self::Repeatedly(Box::new(trigger))
    }

    /// Finishes this trigger as soon as `until` fires.
    #[must_use]
    pub fn or_finally(self, until: Trigger) -> Self {
        Self::OrFinally {
            main: Box::new(self),
            until: Box::new(until),
        }
    }

    /// Processing-time trigger from a duration.
    ///
    /// # Errors
    ///
    /// Returns `TriggerError::InvalidDelay` if the delay does not fit in
    /// `i64` milliseconds.
    pub fn after_processing_time(delay: std::time::Duration) -> Result<Self, TriggerError> {
        let delay_ms =
            i64::try_from(delay.as_millis()).map_err(|_| TriggerError::InvalidDelay(i64::MAX))?;
        Ok(Self::AfterProcessingTime(delay_ms))
    }
}

/// Outcome of an element or timer invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerResult {
    /// Nothing to emit
    Continue,
    /// Emit a pane
    Fire,
    /// Emit a pane and finish
    FireAndFinish,
}

impl TriggerResult {
    /// Returns true if a pane should be emitted.
    #[must_use]
    pub fn is_fire(self) -> bool {
        matches!(self, Self::Fire | Self::FireAndFinish)
    }

    /// Returns true if the node finished.
    #[must_use]
    pub fn is_finish(self) -> bool {
        matches!(self, Self::FireAndFinish)
    }
}

/// Outcome of a merge invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeResult {
    /// Nothing to emit
    Continue,
    /// Emit a pane for the merged window
    Fire,
    /// Emit a pane for the merged window and finish
    FireAndFinish,
    /// The node was finished in every merged window, so it stays finished
    AlreadyFinished,
}

impl MergeResult {
    /// Returns true if a pane should be emitted.
    #[must_use]
    pub fn is_fire(self) -> bool {
        matches!(self, Self::Fire | Self::FireAndFinish)
    }

    /// Returns true if the node is finished after the merge.
    #[must_use]
    pub fn is_finish(self) -> bool {
        matches!(self, Self::FireAndFinish | Self::AlreadyFinished)
    }
}

impl From<TriggerResult> for MergeResult {
    fn from(result: TriggerResult) -> Self {
        match result {
            TriggerResult::Continue => Self::Continue,
            TriggerResult::Fire => Self::Fire,
            TriggerResult::FireAndFinish => Self::FireAndFinish,
        }
    }
}

/// Errors that can occur in trigger construction and evaluation.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// A composite trigger without children
    #[error("{0} needs at least one child trigger")]
    EmptyComposite(&'static str),

    /// `AfterCount(0)`
    #[error("Element count must be positive")]
    InvalidCount,

    /// Negative processing-time delay
    #[error("Invalid processing-time delay: {0}ms")]
    InvalidDelay(i64),

    /// A finished node was invoked
    #[error("Trigger node {node} ({kind}) invoked after finishing in window {window}")]
    InvokedWhileFinished {
        /// Node index
        node: usize,
        /// Node kind
        kind: &'static str,
        /// Window the invocation was for
        window: String,
    },

    /// State access failed during evaluation
    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl TriggerError {
    /// Returns true if this error signals a broken internal invariant.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            Self::InvokedWhileFinished { .. } => true,
            Self::State(e) => e.is_invariant_violation(),
            _ => false,
        }
    }
}
