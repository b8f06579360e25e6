//! # `LaminarDB` Windowing
//!
//! Keyed window, trigger and watermark evaluation for `LaminarDB` streams.
//!
//! For every key and every window this crate decides *when* a pane is
//! emitted while elements arrive out of order and time moves forward:
//!
//! - **Time**: input and output watermarks, event-time and processing-time
//!   timers
//! - **Windows**: window functions (fixed, sliding, sessions, global) and the
//!   per-key set of live windows, merged for session-like functions
//! - **State**: namespaced trigger state cells and watermark holds over a
//!   byte-oriented state store
//! - **Triggers**: a tree of trigger nodes evaluated on elements, merges and
//!   timers
//! - **Runner**: the per-key engine tying the above together
//!
//! ## Design Principles
//!
//! 1. **One key, one runner** - no shared state between keys, no locks
//! 2. **Stateless triggers** - all trigger state lives in the key's state
//!    store, addressed by window and node index
//! 3. **Exactly once per timer** - a timer is removed before it fires
//! 4. **Fail closed** - a broken invariant aborts the key
//!
//! ## Example
//!
//! ```rust
//! use laminar_windowing::runner::{KeyedTriggerRunner, TimestampedValue, WindowingStrategy};
//! use laminar_windowing::trigger::Trigger;
//! use laminar_windowing::window::Sessions;
//!
//! let trigger = Trigger::repeatedly(Trigger::AfterCount(2)).or_finally(Trigger::AfterEndOfWindow);
//! let strategy = WindowingStrategy::new(Sessions::with_gap(5).unwrap(), &trigger)?;
//! let mut runner = KeyedTriggerRunner::new(strategy);
//!
//! // [0, 5) and [3, 8) merge into [0, 8); the second element fires it
//! let fired = runner.process_elements(&[
//!     TimestampedValue::new("a", 0),
//!     TimestampedValue::new("b", 3),
//! ])?;
//! assert_eq!(fired.len(), 1);
//!
//! // The end of the session finishes it
//! let fired = runner.advance_input_watermark(8)?;
//! assert!(fired[0].result.is_finish());
//! # Ok::<(), laminar_windowing::Error>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod runner;
pub mod state;
pub mod time;
pub mod trigger;
pub mod window;

// Re-export key types
pub use runner::{KeyedTriggerRunner, WindowingStrategy};
pub use trigger::Trigger;

/// Result type for laminar-windowing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for laminar-windowing
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Time-related errors
    #[error("Time error: {0}")]
    Time(#[from] time::TimeError),

    /// State store errors
    #[error("State error: {0}")]
    State(#[from] state::StateError),

    /// Window function errors
    #[error("Window error: {0}")]
    Window(#[from] window::WindowError),

    /// Trigger errors
    #[error("Trigger error: {0}")]
    Trigger(#[from] trigger::TriggerError),

    /// The key was aborted by an earlier invariant violation
    #[error("Key aborted after invariant violation: {0}")]
    Aborted(String),
}

impl Error {
    /// Returns true if this error signals a broken internal invariant.
    ///
    /// Such errors poison the key's runner. Caller mistakes and
    /// collaborator failures return false.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            Self::Time(e) => e.is_invariant_violation(),
            Self::State(e) => e.is_invariant_violation(),
            Self::Trigger(e) => e.is_invariant_violation(),
            Self::Window(_) | Self::Aborted(_) => false,
        }
    }
}
