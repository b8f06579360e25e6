//! # Window Module
//!
//! Window types, window functions, and the per-key active window set.
//!
//! A [`WindowFn`] assigns each element timestamp to one or more windows. For
//! merging functions such as [`Sessions`], the [`ActiveWindowSet`] keeps track
//! of which windows are live and which live window now represents a window
//! that has been merged away.
//!
//! ```rust
//! use laminar_windowing::window::{FixedWindows, IntervalWindow, WindowFn};
//!
//! let window_fn = FixedWindows::new(10).unwrap();
//! let assigned = window_fn.assign_windows(17).unwrap();
//! assert_eq!(assigned.as_slice(), &[IntervalWindow::new(10, 20)]);
//! ```

use std::fmt::Debug;
use std::hash::Hash;

use smallvec::SmallVec;

mod active;
mod assigners;

pub use active::ActiveWindowSet;
pub use assigners::{FixedWindows, GlobalWindows, Sessions, SlidingWindows};

use crate::time::TIMESTAMP_MAX;

/// Encoded window key. 16 bytes covers [`IntervalWindow`] without spilling.
pub type WindowKey = SmallVec<[u8; 16]>;

/// Collection type for window assignments.
///
/// Sliding windows with a small size/period ratio rarely assign more than
/// four windows per element.
pub type WindowVec<W> = SmallVec<[W; 4]>;

/// A window produced by a window function.
///
/// Windows are compared structurally, ordered (so the live set of a key
/// iterates deterministically), and encode to a stable byte key used to
/// namespace their state.
pub trait BoundedWindow: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static {
    /// Largest element timestamp that belongs to this window.
    fn max_timestamp(&self) -> i64;

    /// Stable byte encoding of the window.
    ///
    /// Two windows encode to the same key only if they are equal.
    fn encode_key(&self) -> WindowKey;
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalWindow {
    /// Window start timestamp (inclusive, in milliseconds)
    pub start: i64,
    /// Window end timestamp (exclusive, in milliseconds)
    pub end: i64,
}

impl IntervalWindow {
    /// Creates a new interval window.
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Returns the window duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Returns true if `timestamp` falls in the window.
    #[must_use]
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    /// Returns true if the two windows overlap.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns the smallest window covering both.
    #[must_use]
    pub fn span(&self, other: &Self) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Parses a window from a key produced by [`BoundedWindow::encode_key`].
    #[must_use]
    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != 16 {
            return None;
        }
        let start = i64::from_be_bytes(key[0..8].try_into().ok()?);
        let end = i64::from_be_bytes(key[8..16].try_into().ok()?);
        Some(Self { start, end })
    }
}

impl BoundedWindow for IntervalWindow {
    #[inline]
    fn max_timestamp(&self) -> i64 {
        self.end - 1
    }

    #[inline]
    fn encode_key(&self) -> WindowKey {
        let mut key = WindowKey::new();
        key.extend_from_slice(&self.start.to_be_bytes());
        key.extend_from_slice(&self.end.to_be_bytes());
        key
    }
}

/// The single window spanning all of time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalWindow;

impl BoundedWindow for GlobalWindow {
    fn max_timestamp(&self) -> i64 {
        TIMESTAMP_MAX
    }

    fn encode_key(&self) -> WindowKey {
        WindowKey::new()
    }
}

/// A set of live windows that a window function wants merged into `result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeGroup<W> {
    /// Live windows to merge, in ascending order
    pub to_merge: Vec<W>,
    /// The window they merge into
    pub result: W,
}

/// Assigns element timestamps to windows and, for merging functions, decides
/// which live windows merge.
pub trait WindowFn<W: BoundedWindow>: Send + Sync + Debug {
    /// Assigns an element timestamp to zero or more windows.
    ///
    /// # Errors
    ///
    /// Returns `WindowError` if the timestamp cannot be assigned.
    fn assign_windows(&self, timestamp: i64) -> Result<WindowVec<W>, WindowError>;

    /// Returns true if windows produced by this function never merge.
    fn is_non_merging(&self) -> bool {
        true
    }

    /// Computes the merge groups for the given live windows.
    ///
    /// `live` is sorted ascending. Every window appears in at most one group.
    ///
    /// # Errors
    ///
    /// Returns `WindowError` if the live set cannot be merged.
    fn merge_windows(&self, live: &[W]) -> Result<Vec<MergeGroup<W>>, WindowError> {
        let _ = live;
        Ok(Vec::new())
    }

    /// Returns true if `window` could have been produced by this function.
    fn is_compatible(&self, window: &W) -> bool {
        let _ = window;
        true
    }
}

/// Errors that can occur in window operations.
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    /// Size, period or gap is not positive
    #[error("Invalid window size: {0}")]
    InvalidSize(String),

    /// Timestamp out of the range the function can assign
    #[error("Cannot assign timestamp {0} to a window")]
    UnassignableTimestamp(i64),

    /// A window not produced by the configured window function
    #[error("Incompatible window: {0}")]
    IncompatibleWindow(String),

    /// A merge group referenced a window that is not live
    #[error("Merge references a window that is not active: {0}")]
    NotActive(String),
}
