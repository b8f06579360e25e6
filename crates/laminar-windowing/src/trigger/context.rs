//! Evaluation context handed to trigger nodes.

use std::ops::Range;

use super::FinishedBits;
use crate::state::{StateInternals, StateNamespace};
use crate::time::{TimeDomain, TimerData, TimerRegistry, Watermark};
use crate::window::BoundedWindow;

/// Everything a trigger node may touch while evaluating one window of a key.
///
/// Borrowed from the key's runner for the duration of a single invocation.
#[derive(Debug)]
pub struct TriggerContext<'a, W: BoundedWindow> {
    window: W,
    finished: &'a mut FinishedBits,
    timers: &'a mut TimerRegistry<W>,
    state: &'a mut StateInternals<W>,
    fired_timer: Option<(i64, TimeDomain)>,
}

impl<'a, W: BoundedWindow> TriggerContext<'a, W> {
    /// Creates a context for `window`.
    pub fn new(
        window: W,
        finished: &'a mut FinishedBits,
        timers: &'a mut TimerRegistry<W>,
        state: &'a mut StateInternals<W>,
    ) -> Self {
        Self {
            window,
            finished,
            timers,
            state,
            fired_timer: None,
        }
    }

    /// Marks the context as handling a fired timer.
    #[must_use]
    pub fn with_fired_timer(mut self, timestamp: i64, domain: TimeDomain) -> Self {
        self.fired_timer = Some((timestamp, domain));
        self
    }

    /// The window being evaluated.
    #[must_use]
    pub fn window(&self) -> &W {
        &self.window
    }

    /// The timer being fired, if this is a timer invocation.
    #[must_use]
    pub fn fired_timer(&self) -> Option<(i64, TimeDomain)> {
        self.fired_timer
    }

    /// Returns the finished bit of `node`.
    #[must_use]
    pub fn is_finished(&self, node: usize) -> bool {
        self.finished.get(node)
    }

    pub(crate) fn set_finished(&mut self, node: usize) {
        self.finished.set(node);
    }

    pub(crate) fn clear_finished(&mut self, node: usize) {
        self.finished.clear(node);
    }

    pub(crate) fn clear_finished_range(&mut self, nodes: Range<usize>) {
        self.finished.clear_range(nodes);
    }

    /// State namespace owned by `node` in this window.
    #[must_use]
    pub fn node_namespace(&self, node: usize) -> StateNamespace<W> {
        StateNamespace::WindowAndTrigger(self.window.clone(), node)
    }

    /// Registers a timer for this window.
    pub fn set_timer(&mut self, timestamp: i64, domain: TimeDomain) {
        self.timers
            .set_timer(TimerData::new(self.window.clone(), timestamp, domain));
    }

    /// Deletes a timer of this window.
    pub fn delete_timer(&mut self, timestamp: i64, domain: TimeDomain) {
        self.timers
            .delete_timer(&TimerData::new(self.window.clone(), timestamp, domain));
    }

    /// Deletes a timer of another window (used when merging).
    pub fn delete_timer_for(&mut self, window: &W, timestamp: i64, domain: TimeDomain) {
        self.timers
            .delete_timer(&TimerData::new(window.clone(), timestamp, domain));
    }

    /// Current input watermark of the key.
    #[must_use]
    pub fn input_watermark(&self) -> Option<Watermark> {
        self.timers.current_input_watermark()
    }

    /// Current processing time of the key.
    #[must_use]
    pub fn processing_time(&self) -> i64 {
        self.timers.current_processing_time()
    }

    /// Read access to the key's state.
    #[must_use]
    pub fn state(&self) -> &StateInternals<W> {
        &*self.state
    }

    /// Write access to the key's state.
    pub fn state_mut(&mut self) -> &mut StateInternals<W> {
        &mut *self.state
    }
}

/// The windows being merged into the context window, with the finished bits
/// each of them had before the merge.
#[derive(Debug, Clone)]
pub struct MergeInfo<W> {
    old_windows: Vec<W>,
    prior_finished: Vec<FinishedBits>,
}

impl<W: BoundedWindow> MergeInfo<W> {
    /// Pairs each merged window with its finished bits.
    ///
    /// `prior_finished` must have one entry per window.
    #[must_use]
    pub fn new(old_windows: Vec<W>, prior_finished: Vec<FinishedBits>) -> Self {
        debug_assert_eq!(old_windows.len(), prior_finished.len());
        Self {
            old_windows,
            prior_finished,
        }
    }

    /// The windows being merged.
    #[must_use]
    pub fn old_windows(&self) -> &[W] {
        &self.old_windows
    }

    /// Namespaces of `node` in every merged window.
    #[must_use]
    pub fn node_namespaces(&self, node: usize) -> Vec<StateNamespace<W>> {
        self.old_windows
            .iter()
            .map(|w| StateNamespace::WindowAndTrigger(w.clone(), node))
            .collect()
    }

    /// Returns true if `node` was finished in every merged window.
    #[must_use]
    pub fn finished_in_all(&self, node: usize) -> bool {
        !self.prior_finished.is_empty() && self.prior_finished.iter().all(|bits| bits.get(node))
    }
}
