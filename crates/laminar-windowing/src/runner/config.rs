//! Runner configuration and the windowing strategy a key runs under.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::trigger::{ExecutableTrigger, Trigger, TriggerError};
use crate::window::{BoundedWindow, WindowFn};

/// How panes of the same window relate to each other.
///
/// The runner only records the mode; the caller applies it when building
/// pane contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationMode {
    /// Each pane carries only the data since the previous pane
    Discarding,
    /// Each pane carries all data of the window so far
    Accumulating,
}

/// Whether unfired elements hold back the output watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkHoldPolicy {
    /// Hold the output watermark at the timestamp of the earliest unfired
    /// element of each window (default)
    #[default]
    ElementTimestamp,
    /// Output watermark follows the input watermark
    Disabled,
}

/// Configuration for a [`KeyedTriggerRunner`](super::KeyedTriggerRunner).
///
/// # Example
///
/// ```rust
/// use laminar_windowing::runner::{RunnerConfig, WatermarkHoldPolicy};
///
/// let config = RunnerConfig::default()
///     .with_watermark_holds(WatermarkHoldPolicy::Disabled)
///     .with_record_results(false);
/// assert!(config.end_of_window_timers);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Register an event-time timer at the max timestamp of every assigned
    /// and every merged window
    pub end_of_window_timers: bool,
    /// Watermark hold behavior
    pub watermark_holds: WatermarkHoldPolicy,
    /// Keep every trigger result in the result sequence
    pub record_results: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            end_of_window_timers: true,
            watermark_holds: WatermarkHoldPolicy::default(),
            record_results: true,
        }
    }
}

impl RunnerConfig {
    /// Enables or disables end-of-window timers.
    #[must_use]
    pub fn with_end_of_window_timers(mut self, enabled: bool) -> Self {
        self.end_of_window_timers = enabled;
        self
    }

    /// Sets the watermark hold policy.
    #[must_use]
    pub fn with_watermark_holds(mut self, policy: WatermarkHoldPolicy) -> Self {
        self.watermark_holds = policy;
        self
    }

    /// Enables or disables the result sequence.
    #[must_use]
    pub fn with_record_results(mut self, enabled: bool) -> Self {
        self.record_results = enabled;
        self
    }
}

/// Window function, trigger and pane mode for a keyed computation.
#[derive(Debug, Clone)]
pub struct WindowingStrategy<W: BoundedWindow> {
    window_fn: Arc<dyn WindowFn<W>>,
    trigger: ExecutableTrigger,
    accumulation_mode: AccumulationMode,
    config: RunnerConfig,
}

impl<W: BoundedWindow> WindowingStrategy<W> {
    /// Creates a strategy with the default config.
    ///
    /// The accumulation mode defaults to discarding for non-merging window
    /// functions and accumulating for merging ones.
    ///
    /// # Errors
    ///
    /// Returns `TriggerError` if the trigger descriptor is invalid.
    pub fn new<F>(window_fn: F, trigger: &Trigger) -> Result<Self, TriggerError>
    where
        F: WindowFn<W> + 'static,
    {
        let accumulation_mode = if window_fn.is_non_merging() {
            AccumulationMode::Discarding
        } else {
            AccumulationMode::Accumulating
        };
        Ok(Self {
            window_fn: Arc::new(window_fn),
            trigger: ExecutableTrigger::new(trigger)?,
            accumulation_mode,
            config: RunnerConfig::default(),
        })
    }

    /// Overrides the accumulation mode.
    #[must_use]
    pub fn with_accumulation_mode(mut self, mode: AccumulationMode) -> Self {
        self.accumulation_mode = mode;
        self
    }

    /// Replaces the runner config.
    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// The window function.
    #[must_use]
    pub fn window_fn(&self) -> &dyn WindowFn<W> {
        self.window_fn.as_ref()
    }

    /// The flattened trigger tree.
    #[must_use]
    pub fn trigger(&self) -> &ExecutableTrigger {
        &self.trigger
    }

    /// The accumulation mode.
    #[must_use]
    pub fn accumulation_mode(&self) -> AccumulationMode {
        self.accumulation_mode
    }

    /// The runner config.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}
