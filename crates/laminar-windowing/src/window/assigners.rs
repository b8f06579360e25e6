//! Built-in window functions.

use std::time::Duration;

use super::{GlobalWindow, IntervalWindow, MergeGroup, WindowError, WindowFn, WindowVec};

fn millis(duration: Duration) -> Result<i64, WindowError> {
    i64::try_from(duration.as_millis())
        .map_err(|_| WindowError::InvalidSize(format!("{duration:?} does not fit in i64 millis")))
}

fn positive(name: &str, value_ms: i64) -> Result<i64, WindowError> {
    if value_ms > 0 {
        Ok(value_ms)
    } else {
        Err(WindowError::InvalidSize(format!(
            "{name} must be positive, got {value_ms}ms"
        )))
    }
}

/// Start of the period-aligned window containing `timestamp`.
///
/// Floors toward negative infinity so negative timestamps land in the right
/// window.
#[inline]
fn aligned_start(timestamp: i64, period_ms: i64, offset_ms: i64) -> i64 {
    timestamp - (timestamp - offset_ms).rem_euclid(period_ms)
}

fn window_at(start: i64, size_ms: i64, timestamp: i64) -> Result<IntervalWindow, WindowError> {
    let end = start
        .checked_add(size_ms)
        .ok_or(WindowError::UnassignableTimestamp(timestamp))?;
    Ok(IntervalWindow::new(start, end))
}

/// Tumbling windows of a fixed size.
///
/// Windows are aligned to epoch plus an optional offset and never overlap, so
/// each element lands in exactly one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindows {
    size_ms: i64,
    offset_ms: i64,
}

impl FixedWindows {
    /// Creates fixed windows of `size_ms` milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `WindowError::InvalidSize` if the size is not positive.
    pub fn new(size_ms: i64) -> Result<Self, WindowError> {
        Ok(Self {
            size_ms: positive("window size", size_ms)?,
            offset_ms: 0,
        })
    }

    /// Creates fixed windows from a duration.
    ///
    /// # Errors
    ///
    /// Returns `WindowError::InvalidSize` if the size is zero or too large.
    pub fn from_duration(size: Duration) -> Result<Self, WindowError> {
        Self::new(millis(size)?)
    }

    /// Shifts window boundaries by `offset_ms`.
    ///
    /// The offset is normalized into `[0, size)`.
    #[must_use]
    pub fn with_offset(mut self, offset_ms: i64) -> Self {
        self.offset_ms = offset_ms.rem_euclid(self.size_ms);
        self
    }

    /// Returns the window size in milliseconds.
    #[must_use]
    pub fn size_ms(&self) -> i64 {
        self.size_ms
    }

    /// Returns the normalized offset in milliseconds.
    #[must_use]
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Assigns a timestamp to its window.
    ///
    /// # Errors
    ///
    /// Returns `WindowError::UnassignableTimestamp` if the window end overflows.
    #[inline]
    pub fn assign(&self, timestamp: i64) -> Result<IntervalWindow, WindowError> {
        let start = aligned_start(timestamp, self.size_ms, self.offset_ms);
        window_at(start, self.size_ms, timestamp)
    }
}

impl WindowFn<IntervalWindow> for FixedWindows {
    fn assign_windows(&self, timestamp: i64) -> Result<WindowVec<IntervalWindow>, WindowError> {
        let mut windows = WindowVec::new();
        windows.push(self.assign(timestamp)?);
        Ok(windows)
    }

    fn is_compatible(&self, window: &IntervalWindow) -> bool {
        window.duration_ms() == self.size_ms
            && (window.start - self.offset_ms).rem_euclid(self.size_ms) == 0
    }
}

/// Overlapping windows of a fixed size, starting every `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindows {
    size_ms: i64,
    period_ms: i64,
    offset_ms: i64,
}

impl SlidingWindows {
    /// Creates sliding windows of `size_ms` that start every `period_ms`.
    ///
    /// # Errors
    ///
    /// Returns `WindowError::InvalidSize` if size or period is not positive,
    /// or if the period exceeds the size.
    pub fn new(size_ms: i64, period_ms: i64) -> Result<Self, WindowError> {
        let size_ms = positive("window size", size_ms)?;
        let period_ms = positive("window period", period_ms)?;
        if period_ms > size_ms {
            return Err(WindowError::InvalidSize(format!(
                "period {period_ms}ms exceeds window size {size_ms}ms"
            )));
        }
        Ok(Self {
            size_ms,
            period_ms,
            offset_ms: 0,
        })
    }

    /// Shifts window starts by `offset_ms`, normalized into `[0, period)`.
    #[must_use]
    pub fn with_offset(mut self, offset_ms: i64) -> Self {
        self.offset_ms = offset_ms.rem_euclid(self.period_ms);
        self
    }

    /// Returns the window size in milliseconds.
    #[must_use]
    pub fn size_ms(&self) -> i64 {
        self.size_ms
    }

    /// Returns the period in milliseconds.
    #[must_use]
    pub fn period_ms(&self) -> i64 {
        self.period_ms
    }
}

impl WindowFn<IntervalWindow> for SlidingWindows {
    fn assign_windows(&self, timestamp: i64) -> Result<WindowVec<IntervalWindow>, WindowError> {
        let mut windows = WindowVec::new();

        // Walk backwards from the last window containing the timestamp
        let mut start = aligned_start(timestamp, self.period_ms, self.offset_ms);
        loop {
            let window = window_at(start, self.size_ms, timestamp)?;
            if window.end <= timestamp {
                break;
            }
            windows.push(window);
            start = match start.checked_sub(self.period_ms) {
                Some(s) => s,
                None => break,
            };
        }

        // Earliest first
        windows.reverse();
        Ok(windows)
    }

    fn is_compatible(&self, window: &IntervalWindow) -> bool {
        window.duration_ms() == self.size_ms
            && (window.start - self.offset_ms).rem_euclid(self.period_ms) == 0
    }
}

/// Session windows: each element opens `[ts, ts + gap)` and overlapping
/// windows merge into their span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sessions {
    gap_ms: i64,
}

impl Sessions {
    /// Creates session windows with the given inactivity gap.
    ///
    /// # Errors
    ///
    /// Returns `WindowError::InvalidSize` if the gap is not positive.
    pub fn with_gap(gap_ms: i64) -> Result<Self, WindowError> {
        Ok(Self {
            gap_ms: positive("session gap", gap_ms)?,
        })
    }

    /// Creates session windows from a duration.
    ///
    /// # Errors
    ///
    /// Returns `WindowError::InvalidSize` if the gap is zero or too large.
    pub fn from_duration(gap: Duration) -> Result<Self, WindowError> {
        Self::with_gap(millis(gap)?)
    }

    /// Returns the gap in milliseconds.
    #[must_use]
    pub fn gap_ms(&self) -> i64 {
        self.gap_ms
    }
}

impl WindowFn<IntervalWindow> for Sessions {
    fn assign_windows(&self, timestamp: i64) -> Result<WindowVec<IntervalWindow>, WindowError> {
        let mut windows = WindowVec::new();
        windows.push(window_at(timestamp, self.gap_ms, timestamp)?);
        Ok(windows)
    }

    fn is_non_merging(&self) -> bool {
        false
    }

    fn merge_windows(
        &self,
        live: &[IntervalWindow],
    ) -> Result<Vec<MergeGroup<IntervalWindow>>, WindowError> {
        let mut sorted = live.to_vec();
        sorted.sort_unstable();

        let mut groups = Vec::new();
        let mut current: Vec<IntervalWindow> = Vec::new();
        let mut span: Option<IntervalWindow> = None;

        for window in sorted {
            match span {
                Some(s) if s.intersects(&window) => {
                    span = Some(s.span(&window));
                    current.push(window);
                }
                _ => {
                    if let Some(s) = span {
                        flush_group(&mut groups, std::mem::take(&mut current), s);
                    }
                    span = Some(window);
                    current.push(window);
                }
            }
        }
        if let Some(s) = span {
            flush_group(&mut groups, current, s);
        }

        Ok(groups)
    }

    fn is_compatible(&self, window: &IntervalWindow) -> bool {
        window.duration_ms() >= self.gap_ms
    }
}

fn flush_group(
    groups: &mut Vec<MergeGroup<IntervalWindow>>,
    to_merge: Vec<IntervalWindow>,
    result: IntervalWindow,
) {
    if to_merge.len() > 1 {
        groups.push(MergeGroup { to_merge, result });
    }
}

/// Assigns every element to the single [`GlobalWindow`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalWindows;

impl WindowFn<GlobalWindow> for GlobalWindows {
    fn assign_windows(&self, _timestamp: i64) -> Result<WindowVec<GlobalWindow>, WindowError> {
        let mut windows = WindowVec::new();
        windows.push(GlobalWindow);
        Ok(windows)
    }
}
