//! # Keyed Trigger Runner
//!
//! Drives the windowing strategy of a single key: assigns elements to
//! windows, merges windows, evaluates the trigger tree on elements, merges
//! and timers, and maintains the output watermark from per-window holds.
//!
//! ## Lifecycle of a window
//!
//! 1. An element is assigned to a window, which becomes active and gets an
//!    end-of-window timer.
//! 2. For merging window functions, live windows are merged and the trigger
//!    state of the merged windows is folded into the result.
//! 3. The trigger is evaluated for the element. Until the window fires, the
//!    element's timestamp holds back the output watermark.
//! 4. Watermark and processing-time advances fire due timers, which evaluate
//!    the trigger again.
//! 5. When the root of the trigger finishes, the window's trigger state and
//!    timers are released. Only the finished bits remain, so late elements
//!    for the window are ignored until [`clear_state`](KeyedTriggerRunner::clear_state).
//!
//! ## Failure model
//!
//! Caller mistakes (time moving backwards, foreign windows) fail the call
//! and leave the runner usable. A broken internal invariant poisons the
//! runner: the error is returned once, then every mutating call fails with
//! [`Error::Aborted`].
//!
//! ```rust
//! use laminar_windowing::runner::{KeyedTriggerRunner, TimestampedValue, WindowingStrategy};
//! use laminar_windowing::trigger::{Trigger, TriggerResult};
//! use laminar_windowing::window::{FixedWindows, IntervalWindow};
//!
//! let strategy =
//!     WindowingStrategy::new(FixedWindows::new(10).unwrap(), &Trigger::AfterEndOfWindow).unwrap();
//! let mut runner = KeyedTriggerRunner::new(strategy);
//!
//! runner
//!     .process_elements(&[TimestampedValue::new("a", 1), TimestampedValue::new("b", 2)])
//!     .unwrap();
//! let fired = runner.advance_input_watermark(10).unwrap();
//! assert_eq!(fired.len(), 1);
//! assert_eq!(fired[0].window, IntervalWindow::new(0, 10));
//! assert_eq!(fired[0].result, TriggerResult::FireAndFinish);
//! ```

mod config;

pub use config::{AccumulationMode, RunnerConfig, WatermarkHoldPolicy, WindowingStrategy};

use fxhash::FxHashMap;

use crate::state::{StateInternals, StateNamespace, StateStore, StateTag};
use crate::time::{check_timestamp, TimeDomain, TimerData, TimerRegistry, Watermark, TIMESTAMP_MIN};
use crate::trigger::{
    ExecutableTrigger, FinishedBits, MergeInfo, MergeResult, TriggerContext, TriggerResult,
};
use crate::window::{ActiveWindowSet, BoundedWindow, WindowError};
use crate::{Error, Result};

/// Watermark hold of the earliest unfired element of a window.
const ELEMENT_HOLD: StateTag = StateTag::hold("element_hold");

const ROOT: usize = ExecutableTrigger::ROOT;

/// An element value with its event timestamp.
///
/// The runner never looks at the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedValue<T> {
    /// The element
    pub value: T,
    /// Event timestamp in milliseconds
    pub timestamp: i64,
}

impl<T> TimestampedValue<T> {
    /// Pairs a value with its timestamp.
    pub fn new(value: T, timestamp: i64) -> Self {
        Self { value, timestamp }
    }
}

/// What caused a trigger evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationCause<W> {
    /// An element with this timestamp arrived in the window
    Element {
        /// Element timestamp
        timestamp: i64,
    },
    /// A timer of the window fired
    Timer {
        /// Timer timestamp
        timestamp: i64,
        /// Timer domain
        domain: TimeDomain,
    },
    /// Windows were merged into the window
    Merge {
        /// The windows merged into this one
        merged: Vec<W>,
    },
}

/// One trigger evaluation of a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation<W> {
    /// The evaluated window
    pub window: W,
    /// The root trigger result
    pub result: TriggerResult,
    /// What caused the evaluation
    pub cause: EvaluationCause<W>,
}

/// One merge of windows, with the root merge result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEvaluation<W> {
    /// The merge result window
    pub window: W,
    /// The windows merged into it
    pub merged: Vec<W>,
    /// The root merge result
    pub result: MergeResult,
}

/// Per-key evaluation engine.
///
/// Owns the key's timers, active windows, trigger state and finished bits.
/// All operations are synchronous; different keys are independent and a
/// runner can be moved across threads.
#[derive(Debug)]
pub struct KeyedTriggerRunner<W: BoundedWindow> {
    strategy: WindowingStrategy<W>,
    timers: TimerRegistry<W>,
    active: ActiveWindowSet<W>,
    state: StateInternals<W>,
    finished: FxHashMap<W, FinishedBits>,
    results: Vec<Evaluation<W>>,
    merge_results: Vec<MergeEvaluation<W>>,
    latest_result: Option<TriggerResult>,
    latest_merge_result: Option<MergeResult>,
    poisoned: Option<String>,
}

impl<W: BoundedWindow> KeyedTriggerRunner<W> {
    /// Creates a runner with in-memory state.
    #[must_use]
    pub fn new(strategy: WindowingStrategy<W>) -> Self {
        Self::with_state(strategy, StateInternals::new())
    }

    /// Creates a runner over a caller-provided state store.
    #[must_use]
    pub fn with_state_store(strategy: WindowingStrategy<W>, store: Box<dyn StateStore>) -> Self {
        Self::with_state(strategy, StateInternals::with_store(store))
    }

    fn with_state(strategy: WindowingStrategy<W>, state: StateInternals<W>) -> Self {
        let active = ActiveWindowSet::for_window_fn(strategy.window_fn());
        Self {
            strategy,
            timers: TimerRegistry::new(),
            active,
            state,
            finished: FxHashMap::default(),
            results: Vec::new(),
            merge_results: Vec::new(),
            latest_result: None,
            latest_merge_result: None,
            poisoned: None,
        }
    }

    /// Runs `op` unless the runner is poisoned, poisoning it if `op` breaks
    /// an invariant.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if let Some(reason) = &self.poisoned {
            return Err(Error::Aborted(reason.clone()));
        }
        let outcome = op(self);
        if let Err(e) = &outcome {
            if e.is_invariant_violation() {
                tracing::error!(error = %e, "invariant violated, aborting key");
                self.poisoned = Some(e.to_string());
            }
        }
        outcome
    }

    /// Assigns a batch of elements to windows and evaluates the trigger for
    /// each of them, in batch order.
    ///
    /// Windows are merged once, after all elements of the batch are
    /// assigned. Elements of windows whose trigger already finished are
    /// dropped. Returns the evaluations that fired, merges included.
    ///
    /// # Errors
    ///
    /// Returns an error for an out-of-range timestamp, a window function
    /// failure, or a trigger failure.
    pub fn process_elements<T>(
        &mut self,
        elements: &[TimestampedValue<T>],
    ) -> Result<Vec<Evaluation<W>>> {
        self.guarded(|runner| runner.process_elements_inner(elements))
    }

    fn process_elements_inner<T>(
        &mut self,
        elements: &[TimestampedValue<T>],
    ) -> Result<Vec<Evaluation<W>>> {
        let mut assigned = Vec::with_capacity(elements.len());
        for element in elements {
            let timestamp = check_timestamp(element.timestamp)?;
            let windows = self.strategy.window_fn().assign_windows(timestamp)?;
            for window in &windows {
                self.active.add_active(window.clone());
            }
            assigned.push((timestamp, windows));
        }

        let mut fired = self.merge_inner()?;

        for (timestamp, windows) in assigned {
            for window in windows {
                let Some(window) = self.active.representative(&window) else {
                    // Cleared earlier in this batch
                    continue;
                };
                if self.is_root_finished(&window) {
                    tracing::trace!(?window, timestamp, "dropping element for finished window");
                    continue;
                }
                if self.strategy.config().end_of_window_timers {
                    self.set_end_of_window_timer(&window);
                }
                self.hold_element(&window, timestamp)?;
                let result = self.evaluate(&window, None)?;
                let evaluation =
                    self.conclude(window, result, EvaluationCause::Element { timestamp })?;
                if evaluation.result.is_fire() {
                    fired.push(evaluation);
                }
            }
        }
        Ok(fired)
    }

    /// Merges live windows now.
    ///
    /// A no-op for non-merging window functions. Returns the merges that
    /// fired.
    ///
    /// # Errors
    ///
    /// Returns an error if the window function or a trigger fails.
    pub fn merge_now(&mut self) -> Result<Vec<Evaluation<W>>> {
        self.guarded(Self::merge_inner)
    }

    fn merge_inner(&mut self) -> Result<Vec<Evaluation<W>>> {
        let mut groups: Vec<(Vec<W>, W)> = Vec::new();
        self.active
            .merge(self.strategy.window_fn(), |merged, _, result| {
                groups.push((merged.to_vec(), result.clone()));
                Ok::<_, Error>(())
            })?;

        let mut fired = Vec::new();
        for (merged, result) in groups {
            self.apply_merge(merged, result, &mut fired)?;
        }
        Ok(fired)
    }

    fn apply_merge(
        &mut self,
        merged: Vec<W>,
        window: W,
        fired: &mut Vec<Evaluation<W>>,
    ) -> Result<()> {
        for old in merged.iter().filter(|w| **w != window) {
            self.delete_end_of_window_timer(old);
        }

        let tree = self.strategy.trigger();
        let prior = merged
            .iter()
            .map(|w| {
                self.finished
                    .get(w)
                    .cloned()
                    .unwrap_or_else(|| tree.new_finished_bits())
            })
            .collect();
        let info = MergeInfo::new(merged.clone(), prior);
        let mut bits = tree.new_finished_bits();
        let result = {
            let mut ctx =
                TriggerContext::new(window.clone(), &mut bits, &mut self.timers, &mut self.state);
            tree.invoke_merge(ROOT, &mut ctx, &info)?
        };

        let sources: Vec<StateNamespace<W>> =
            merged.iter().cloned().map(StateNamespace::Window).collect();
        self.state
            .merge_into(&ELEMENT_HOLD, &sources, &StateNamespace::Window(window.clone()))?;
        for old in merged.iter().filter(|w| **w != window) {
            self.state.clear_window(old)?;
            self.finished.remove(old);
        }
        self.finished.insert(window.clone(), bits);

        if self.strategy.config().end_of_window_timers && !result.is_finish() {
            self.set_end_of_window_timer(&window);
        }

        self.latest_merge_result = Some(result);
        if self.strategy.config().record_results {
            self.merge_results.push(MergeEvaluation {
                window: window.clone(),
                merged: merged.clone(),
                result,
            });
        }

        let as_trigger = match result {
            MergeResult::Fire => Some(TriggerResult::Fire),
            MergeResult::FireAndFinish => Some(TriggerResult::FireAndFinish),
            MergeResult::Continue | MergeResult::AlreadyFinished => None,
        };
        match as_trigger {
            Some(trigger_result) => {
                fired.push(self.conclude(
                    window,
                    trigger_result,
                    EvaluationCause::Merge { merged },
                )?);
                Ok(())
            }
            None if result.is_finish() => self.release_finished(&window),
            None => Ok(()),
        }
    }

    /// Advances the input watermark to `timestamp`, fires every event-time
    /// timer before it, then recomputes the output watermark.
    ///
    /// # Errors
    ///
    /// Returns `TimeError::WatermarkRegression` if the watermark would move
    /// backwards, or an error from a fired trigger. An output watermark
    /// regression poisons the runner.
    pub fn advance_input_watermark(&mut self, timestamp: i64) -> Result<Vec<Evaluation<W>>> {
        self.guarded(|runner| {
            runner.timers.advance_input_watermark(timestamp)?;
            let fired = runner.fire_pass(TimeDomain::EventTime)?;
            runner.update_output_watermark()?;
            Ok(fired)
        })
    }

    /// Advances processing time to `timestamp` and fires every
    /// processing-time timer before it.
    ///
    /// # Errors
    ///
    /// Returns `TimeError::ProcessingTimeRegression` if processing time
    /// would move backwards, or an error from a fired trigger.
    pub fn advance_processing_time(&mut self, timestamp: i64) -> Result<Vec<Evaluation<W>>> {
        self.guarded(|runner| {
            runner.timers.advance_processing_time(timestamp)?;
            runner.fire_pass(TimeDomain::ProcessingTime)
        })
    }

    /// Fires a timer of `window` directly, outside of a clock advance.
    ///
    /// A pending identical timer is removed first. Returns the evaluation,
    /// fired or not, or `None` if the window is no longer active or its
    /// trigger already finished.
    ///
    /// # Errors
    ///
    /// Returns `WindowError::IncompatibleWindow` if the window function
    /// cannot have produced `window`, or an error from the trigger.
    pub fn fire_timer(
        &mut self,
        window: W,
        timestamp: i64,
        domain: TimeDomain,
    ) -> Result<Option<Evaluation<W>>> {
        self.guarded(|runner| {
            runner.check_compatible(&window)?;
            runner
                .timers
                .delete_timer(&TimerData::new(window.clone(), timestamp, domain));
            runner.on_timer(window, timestamp, domain)
        })
    }

    fn fire_pass(&mut self, domain: TimeDomain) -> Result<Vec<Evaluation<W>>> {
        let mut pass = self.timers.begin_pass(domain);
        let mut fired = Vec::new();
        let outcome = loop {
            let Some(timer) = self.timers.pop_due(&mut pass) else {
                break Ok(());
            };
            let (timestamp, domain) = (timer.timestamp(), timer.domain());
            match self.on_timer(timer.into_window(), timestamp, domain) {
                Ok(Some(evaluation)) if evaluation.result.is_fire() => fired.push(evaluation),
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };
        tracing::trace!(?domain, now = pass.now(), timers = pass.fired_count(), "fire pass done");
        self.timers.finish_pass(pass);
        outcome.map(|()| fired)
    }

    /// Evaluates a fired timer. Returns `None` if the window was skipped.
    fn on_timer(
        &mut self,
        window: W,
        timestamp: i64,
        domain: TimeDomain,
    ) -> Result<Option<Evaluation<W>>> {
        if !self.active.is_active(&window) {
            tracing::trace!(?window, timestamp, "dropping timer of inactive window");
            return Ok(None);
        }
        if self.is_root_finished(&window) {
            tracing::trace!(?window, timestamp, "dropping timer of finished window");
            return Ok(None);
        }
        let result = self.evaluate(&window, Some((timestamp, domain)))?;
        self.conclude(window, result, EvaluationCause::Timer { timestamp, domain })
            .map(Some)
    }

    fn evaluate(
        &mut self,
        window: &W,
        fired_timer: Option<(i64, TimeDomain)>,
    ) -> Result<TriggerResult> {
        let tree = self.strategy.trigger();
        let bits = self
            .finished
            .entry(window.clone())
            .or_insert_with(|| tree.new_finished_bits());
        let mut ctx = TriggerContext::new(window.clone(), bits, &mut self.timers, &mut self.state);
        let result = match fired_timer {
            Some((timestamp, domain)) => {
                let mut ctx = ctx.with_fired_timer(timestamp, domain);
                tree.invoke_timer(ROOT, &mut ctx)?
            }
            None => tree.invoke_element(ROOT, &mut ctx)?,
        };
        Ok(result)
    }

    /// Records an evaluation and applies its consequences to the window.
    fn conclude(
        &mut self,
        window: W,
        result: TriggerResult,
        cause: EvaluationCause<W>,
    ) -> Result<Evaluation<W>> {
        if !matches!(cause, EvaluationCause::Merge { .. }) {
            self.latest_result = Some(result);
        }
        if result.is_fire() {
            tracing::debug!(?window, ?result, ?cause, "trigger fired");
            self.state
                .clear_cell(&StateNamespace::Window(window.clone()), &ELEMENT_HOLD)?;
        }
        if result.is_finish() {
            self.release_finished(&window)?;
        }

        let evaluation = Evaluation {
            window,
            result,
            cause,
        };
        if self.strategy.config().record_results {
            self.results.push(evaluation.clone());
        }
        Ok(evaluation)
    }

    /// Drops the trigger state, holds and timers of a window whose trigger
    /// finished, keeping its finished bits.
    fn release_finished(&mut self, window: &W) -> Result<()> {
        let tree = self.strategy.trigger();
        let bits = self
            .finished
            .entry(window.clone())
            .or_insert_with(|| tree.new_finished_bits());
        let mut ctx = TriggerContext::new(window.clone(), bits, &mut self.timers, &mut self.state);
        tree.invoke_clear(ROOT, &mut ctx)?;
        self.state.clear_window(window)?;
        self.delete_end_of_window_timer(window);
        Ok(())
    }

    fn hold_element(&mut self, window: &W, timestamp: i64) -> Result<()> {
        if self.strategy.config().watermark_holds == WatermarkHoldPolicy::Disabled {
            return Ok(());
        }
        let floor = self
            .timers
            .current_output_watermark()
            .map_or(TIMESTAMP_MIN, |w| w.timestamp());
        self.state.add_hold(
            &StateNamespace::Window(window.clone()),
            &ELEMENT_HOLD,
            timestamp.max(floor),
        )?;
        Ok(())
    }

    fn update_output_watermark(&mut self) -> Result<()> {
        let hold = match self.strategy.config().watermark_holds {
            WatermarkHoldPolicy::ElementTimestamp => self.state.earliest_hold()?,
            WatermarkHoldPolicy::Disabled => None,
        };
        self.timers.advance_output_watermark(hold)?;
        Ok(())
    }

    fn end_of_window_timer(window: &W) -> TimerData<W> {
        TimerData::new(
            window.clone(),
            window.max_timestamp(),
            TimeDomain::EventTime,
        )
    }

    fn set_end_of_window_timer(&mut self, window: &W) {
        self.timers.set_timer(Self::end_of_window_timer(window));
    }

    fn delete_end_of_window_timer(&mut self, window: &W) {
        self.timers.delete_timer(&Self::end_of_window_timer(window));
    }

    fn check_compatible(&self, window: &W) -> Result<()> {
        if self.strategy.window_fn().is_compatible(window) {
            Ok(())
        } else {
            Err(WindowError::IncompatibleWindow(format!("{window:?}")).into())
        }
    }

    fn is_root_finished(&self, window: &W) -> bool {
        self.finished.get(window).is_some_and(|bits| bits.get(ROOT))
    }

    /// Returns true if the trigger of `window` (or of the window it was
    /// merged into) has finished.
    #[must_use]
    pub fn is_finished(&self, window: &W) -> bool {
        let window = self
            .active
            .representative(window)
            .unwrap_or_else(|| window.clone());
        self.is_root_finished(&window)
    }

    /// Releases everything the key holds for `window`: trigger state, holds,
    /// timers, finished bits and its active-set entry.
    ///
    /// # Errors
    ///
    /// Returns `WindowError::IncompatibleWindow` for a foreign window, or a
    /// state error.
    pub fn clear_state(&mut self, window: &W) -> Result<()> {
        self.guarded(|runner| {
            runner.check_compatible(window)?;
            let tree = runner.strategy.trigger();
            let mut bits = runner
                .finished
                .remove(window)
                .unwrap_or_else(|| tree.new_finished_bits());
            {
                let mut ctx = TriggerContext::new(
                    window.clone(),
                    &mut bits,
                    &mut runner.timers,
                    &mut runner.state,
                );
                tree.invoke_clear(ROOT, &mut ctx)?;
            }
            runner.state.clear_window(window)?;
            runner.delete_end_of_window_timer(window);
            runner.active.remove(window);
            tracing::debug!(?window, "cleared window");
            Ok(())
        })
    }

    /// Verifies that nothing is left of `window` after
    /// [`clear_state`](Self::clear_state).
    ///
    /// # Errors
    ///
    /// Returns `StateError::ResidualState` naming what is left. This
    /// poisons the runner.
    pub fn assert_fully_cleared(&mut self, window: &W) -> Result<()> {
        self.guarded(|runner| {
            let mut residual: Vec<String> = runner
                .state
                .tags_in_use_for_window(window)?
                .iter()
                .map(ToString::to_string)
                .collect();
            if runner.finished.contains_key(window) {
                residual.push("finished bits".to_string());
            }
            let end_of_window = Self::end_of_window_timer(window);
            for timer in runner.timers.pending_for_window(window) {
                if timer == end_of_window {
                    residual.push("end-of-window timer".to_string());
                } else {
                    residual.push(format!("{} timer at {}", timer.domain(), timer.timestamp()));
                }
            }
            if residual.is_empty() {
                Ok(())
            } else {
                Err(crate::state::StateError::ResidualState {
                    window: format!("{window:?}"),
                    tags: residual,
                }
                .into())
            }
        })
    }

    /// The strategy this runner evaluates.
    #[must_use]
    pub fn strategy(&self) -> &WindowingStrategy<W> {
        &self.strategy
    }

    /// Current input watermark, `None` until first advanced.
    #[must_use]
    pub fn current_input_watermark(&self) -> Option<Watermark> {
        self.timers.current_input_watermark()
    }

    /// Current output watermark, `None` until the input watermark is set.
    #[must_use]
    pub fn current_output_watermark(&self) -> Option<Watermark> {
        self.timers.current_output_watermark()
    }

    /// Current processing time.
    #[must_use]
    pub fn current_processing_time(&self) -> i64 {
        self.timers.current_processing_time()
    }

    /// Number of pending timers in `domain`.
    #[must_use]
    pub fn pending_timers(&self, domain: TimeDomain) -> usize {
        self.timers.pending_count(domain)
    }

    /// Timestamp of the earliest pending timer in `domain`.
    #[must_use]
    pub fn next_timer_timestamp(&self, domain: TimeDomain) -> Option<i64> {
        self.timers.next_timer_timestamp(domain)
    }

    /// Windows the key currently tracks, ascending.
    ///
    /// For merging window functions these are the live windows. Otherwise
    /// they are the windows with trigger bookkeeping.
    #[must_use]
    pub fn active_windows(&self) -> Vec<W> {
        if self.active.is_merging() {
            self.active.active_windows()
        } else {
            let mut windows: Vec<W> = self.finished.keys().cloned().collect();
            windows.sort();
            windows
        }
    }

    /// The key's trigger state, for inspection.
    #[must_use]
    pub fn state(&self) -> &StateInternals<W> {
        &self.state
    }

    /// Result of the latest element or timer evaluation.
    #[must_use]
    pub fn latest_result(&self) -> Option<TriggerResult> {
        self.latest_result
    }

    /// Result of the latest merge.
    #[must_use]
    pub fn latest_merge_result(&self) -> Option<MergeResult> {
        self.latest_merge_result
    }

    /// Every evaluation since the last
    /// [`clear_result_sequence`](Self::clear_result_sequence), fired or not.
    ///
    /// Empty unless `RunnerConfig::record_results` is set.
    #[must_use]
    pub fn result_sequence(&self) -> &[Evaluation<W>] {
        &self.results
    }

    /// Every merge since the last
    /// [`clear_result_sequence`](Self::clear_result_sequence).
    #[must_use]
    pub fn merge_sequence(&self) -> &[MergeEvaluation<W>] {
        &self.merge_results
    }

    /// Forgets the recorded evaluations.
    pub fn clear_result_sequence(&mut self) {
        self.results.clear();
        self.merge_results.clear();
    }

    /// Returns the reason the runner was poisoned, if it was.
    #[must_use]
    pub fn poisoned(&self) -> Option<&str> {
        self.poisoned.as_deref()
    }
}

#[cfg(test)]
mod tests;
