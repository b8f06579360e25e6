//! # Time Module
//!
//! Watermarks, time domains, and the per-key timer registry.
//!
//! ## Concepts
//!
//! - **Event Time**: Timestamp when the element actually occurred
//! - **Processing Time**: Timestamp when the element is processed
//! - **Input Watermark**: Assertion that no elements with timestamp < watermark will arrive
//! - **Output Watermark**: The watermark communicated downstream, held back by
//!   outstanding watermark holds and never ahead of the input watermark
//! - **Timer**: Scheduled callback for a window, in one of the two time domains
//!
//! ## Timer Firing
//!
//! Timers fire once the clock of their domain moves *past* the timer timestamp.
//! Each due timer is removed from the registry before it is handed out, so a
//! trigger may re-register the same timer while it is being fired:
//!
//! ```rust
//! use laminar_windowing::time::{TimeDomain, TimerData, TimerRegistry};
//! use laminar_windowing::window::IntervalWindow;
//!
//! let window = IntervalWindow::new(0, 10);
//! let mut timers = TimerRegistry::new();
//! timers.set_timer(TimerData::new(window, 9, TimeDomain::EventTime));
//!
//! timers.advance_input_watermark(10).unwrap();
//! let mut pass = timers.begin_pass(TimeDomain::EventTime);
//! let fired = timers.pop_due(&mut pass).unwrap();
//! assert_eq!(fired.timestamp(), 9);
//! assert!(timers.pop_due(&mut pass).is_none());
//! timers.finish_pass(pass);
//! ```

mod timer;

pub use timer::{FiringPass, TimerData, TimerRegistry};

/// Smallest timestamp accepted by the windowing core (milliseconds).
///
/// Chosen well inside `i64` so window arithmetic (`start + size`, `ts + gap`)
/// cannot overflow.
pub const TIMESTAMP_MIN: i64 = i64::MIN / 1000;

/// Largest timestamp accepted by the windowing core (milliseconds).
pub const TIMESTAMP_MAX: i64 = i64::MAX / 1000;

/// A watermark indicating event time progress.
///
/// Watermarks are monotonically increasing assertions that no elements with
/// timestamps earlier than the watermark will arrive. They are used to:
///
/// - Fire event-time timers
/// - Bound the output watermark communicated downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(pub i64);

impl Watermark {
    /// Creates a new watermark with the given timestamp.
    #[inline]
    #[must_use]
    pub fn new(timestamp: i64) -> Self {
        Self(timestamp)
    }

    /// Returns the watermark timestamp in milliseconds.
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.0
    }
}

/// The clock a timer is scheduled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeDomain {
    /// Driven by the input watermark.
    EventTime,
    /// Driven by explicit processing-time advances.
    ProcessingTime,
}

impl std::fmt::Display for TimeDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventTime => f.write_str("event-time"),
            Self::ProcessingTime => f.write_str("processing-time"),
        }
    }
}

/// Errors that can occur in time operations.
#[derive(Debug, thiserror::Error)]
pub enum TimeError {
    /// Timestamp outside `[TIMESTAMP_MIN, TIMESTAMP_MAX]`
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// Input watermark regression (going backwards)
    #[error("Watermark regression: current={current}, new={new}")]
    WatermarkRegression {
        /// Current watermark value
        current: i64,
        /// Attempted new watermark value
        new: i64,
    },

    /// Processing time regression (going backwards)
    #[error("Processing time regression: current={current}, new={new}")]
    ProcessingTimeRegression {
        /// Current processing time
        current: i64,
        /// Attempted new processing time
        new: i64,
    },

    /// The derived output watermark would move backwards.
    ///
    /// This is an invariant violation, not caller misuse.
    #[error("Output watermark regression: current={current}, new={new}")]
    OutputWatermarkRegression {
        /// Current output watermark
        current: i64,
        /// Recomputed output watermark
        new: i64,
    },
}

impl TimeError {
    /// Returns true if this error signals a broken internal invariant.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::OutputWatermarkRegression { .. })
    }
}

/// Validates that a timestamp is inside the supported range.
///
/// # Errors
///
/// Returns `TimeError::InvalidTimestamp` if it is not.
#[inline]
pub fn check_timestamp(timestamp: i64) -> Result<i64, TimeError> {
    if (TIMESTAMP_MIN..=TIMESTAMP_MAX).contains(&timestamp) {
        Ok(timestamp)
    } else {
        Err(TimeError::InvalidTimestamp(timestamp))
    }
}
