//! End-to-end trigger evaluation scenarios for a single key.
//!
//! Drives `KeyedTriggerRunner` through element batches, watermark and
//! processing-time advances, merges and clears, checking firings and the
//! watermark/state invariants along the way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use laminar_windowing::runner::{
    EvaluationCause, KeyedTriggerRunner, RunnerConfig, TimestampedValue, WatermarkHoldPolicy,
    WindowingStrategy,
};
use laminar_windowing::time::TimeDomain;
use laminar_windowing::trigger::{MergeResult, Trigger, TriggerResult};
use laminar_windowing::window::{
    FixedWindows, GlobalWindow, GlobalWindows, IntervalWindow, MergeGroup, Sessions,
    SlidingWindows, WindowError, WindowFn, WindowVec,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn batch(timestamps: &[i64]) -> Vec<TimestampedValue<u64>> {
    timestamps
        .iter()
        .zip(0u64..)
        .map(|(&ts, i)| TimestampedValue::new(i, ts))
        .collect()
}

fn runner<F>(window_fn: F, trigger: &Trigger) -> KeyedTriggerRunner<IntervalWindow>
where
    F: WindowFn<IntervalWindow> + 'static,
{
    KeyedTriggerRunner::new(WindowingStrategy::new(window_fn, trigger).unwrap())
}

fn w(start: i64, end: i64) -> IntervalWindow {
    IntervalWindow::new(start, end)
}

/// Sessions whose merging can be switched off, to let windows that would
/// merge finish independently first.
#[derive(Debug)]
struct GatedSessions {
    inner: Sessions,
    merging: Arc<AtomicBool>,
}

impl WindowFn<IntervalWindow> for GatedSessions {
    fn assign_windows(&self, timestamp: i64) -> Result<WindowVec<IntervalWindow>, WindowError> {
        self.inner.assign_windows(timestamp)
    }

    fn is_non_merging(&self) -> bool {
        false
    }

    fn merge_windows(
        &self,
        live: &[IntervalWindow],
    ) -> Result<Vec<MergeGroup<IntervalWindow>>, WindowError> {
        if self.merging.load(Ordering::SeqCst) {
            self.inner.merge_windows(live)
        } else {
            Ok(Vec::new())
        }
    }
}

fn gated_sessions(gap_ms: i64) -> (GatedSessions, Arc<AtomicBool>) {
    let merging = Arc::new(AtomicBool::new(false));
    let window_fn = GatedSessions {
        inner: Sessions::with_gap(gap_ms).unwrap(),
        merging: Arc::clone(&merging),
    };
    (window_fn, merging)
}

// ── Scenario A: fixed window, end-of-window trigger ──

#[test]
fn test_scenario_fixed_window_fires_exactly_once() {
    init_tracing();
    let mut runner = runner(FixedWindows::new(10).unwrap(), &Trigger::AfterEndOfWindow);

    assert!(runner.process_elements(&batch(&[1, 2, 3])).unwrap().is_empty());

    let fired = runner.advance_input_watermark(10).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(0, 10));
    assert_eq!(fired[0].result, TriggerResult::FireAndFinish);

    assert!(runner.advance_input_watermark(20).unwrap().is_empty());
    assert!(runner.is_finished(&w(0, 10)));
}

// ── Scenario B: session merge ──

#[test]
fn test_scenario_sessions_merge_open_and_finished() {
    init_tracing();
    let (window_fn, merging) = gated_sessions(5);
    let mut runner = runner(window_fn, &Trigger::AfterEndOfWindow);

    runner.process_elements(&batch(&[0, 3])).unwrap();
    assert_eq!(runner.active_windows(), vec![w(0, 5), w(3, 8)]);

    let fired = runner.advance_input_watermark(5).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(0, 5));

    merging.store(true, Ordering::SeqCst);
    assert!(runner.merge_now().unwrap().is_empty());
    assert_eq!(runner.active_windows(), vec![w(0, 8)]);
    assert_eq!(runner.latest_merge_result(), Some(MergeResult::Continue));
    assert!(!runner.is_finished(&w(0, 8)));

    let fired = runner.advance_input_watermark(8).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(0, 8));
    assert!(runner.is_finished(&w(0, 8)));
}

#[test]
fn test_scenario_sessions_merge_both_finished() {
    init_tracing();
    let (window_fn, merging) = gated_sessions(5);
    let mut runner = runner(window_fn, &Trigger::AfterEndOfWindow);

    runner.process_elements(&batch(&[0, 3])).unwrap();
    assert_eq!(runner.advance_input_watermark(8).unwrap().len(), 2);

    merging.store(true, Ordering::SeqCst);
    assert!(runner.merge_now().unwrap().is_empty());
    assert_eq!(
        runner.latest_merge_result(),
        Some(MergeResult::AlreadyFinished)
    );
    assert!(runner.is_finished(&w(0, 8)));
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 0);
}

// ── Scenario C: processing-time delay ──

#[test]
fn test_scenario_processing_time_delay() {
    init_tracing();
    let mut runner = runner(
        FixedWindows::new(1_000).unwrap(),
        &Trigger::AfterProcessingTime(100),
    );
    runner.advance_processing_time(5_000).unwrap();
    runner.process_elements(&batch(&[10])).unwrap();

    // Event time alone never fires it
    assert!(runner.advance_input_watermark(500).unwrap().is_empty());
    assert!(runner.advance_processing_time(5_050).unwrap().is_empty());
    assert!(runner.advance_processing_time(5_100).unwrap().is_empty());

    let fired = runner.advance_processing_time(5_101).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(
        fired[0].cause,
        EvaluationCause::Timer {
            timestamp: 5_100,
            domain: TimeDomain::ProcessingTime
        }
    );
}

// ── Properties ──

#[test]
fn test_watermarks_monotonic_and_bounded() {
    init_tracing();
    let mut runner = runner(FixedWindows::new(7).unwrap(), &Trigger::AfterCount(3));

    // Deterministic pseudo-random walk
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move |bound: i64| {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        i64::try_from(seed % u64::try_from(bound).unwrap()).unwrap()
    };

    let mut input = 0;
    let mut last_output = i64::MIN;
    for _ in 0..200 {
        let timestamps: Vec<i64> = (0..3).map(|_| input - 10 + next(30)).collect();
        runner.process_elements(&batch(&timestamps)).unwrap();

        input += next(5);
        runner.advance_input_watermark(input).unwrap();

        let output = runner.current_output_watermark().unwrap().timestamp();
        assert!(output <= input);
        assert!(output >= last_output);
        if let Some(hold) = runner.state().earliest_hold().unwrap() {
            assert!(output <= hold);
        }
        last_output = output;
    }
    assert!(runner.poisoned().is_none());
}

#[test]
fn test_clear_leaves_nothing_behind() {
    init_tracing();
    let triggers = [
        Trigger::AfterEndOfWindow,
        Trigger::Default,
        Trigger::AfterCount(10),
        Trigger::AfterProcessingTime(50),
        Trigger::repeatedly(Trigger::AfterCount(2)).or_finally(Trigger::AfterEndOfWindow),
        Trigger::AfterEach(vec![Trigger::AfterCount(1), Trigger::AfterProcessingTime(5)]),
        Trigger::AfterFirst(vec![Trigger::AfterCount(9), Trigger::AfterEndOfWindow]),
    ];
    for trigger in &triggers {
        let mut runner = runner(FixedWindows::new(10).unwrap(), trigger);
        runner.process_elements(&batch(&[1, 2, 3])).unwrap();

        runner.clear_state(&w(0, 10)).unwrap();
        runner.assert_fully_cleared(&w(0, 10)).unwrap();
        assert!(runner.state().is_empty(), "{trigger:?}");
        assert_eq!(runner.pending_timers(TimeDomain::EventTime), 0, "{trigger:?}");
        assert_eq!(
            runner.pending_timers(TimeDomain::ProcessingTime),
            0,
            "{trigger:?}"
        );
    }
}

#[test]
fn test_merged_session_clear_leaves_nothing_behind() {
    let mut runner = runner(
        Sessions::with_gap(5).unwrap(),
        &Trigger::AfterAll(vec![Trigger::AfterCount(10), Trigger::AfterProcessingTime(50)]),
    );
    runner.process_elements(&batch(&[0])).unwrap();
    runner.process_elements(&batch(&[3])).unwrap();
    runner.process_elements(&batch(&[6])).unwrap();
    assert_eq!(runner.active_windows(), vec![w(0, 11)]);

    runner.clear_state(&w(0, 11)).unwrap();
    runner.assert_fully_cleared(&w(0, 11)).unwrap();
    for old in [w(0, 5), w(3, 8), w(0, 8), w(6, 11)] {
        runner.assert_fully_cleared(&old).unwrap();
    }
    assert!(runner.state().is_empty());
    assert!(runner.active_windows().is_empty());
    assert_eq!(runner.pending_timers(TimeDomain::ProcessingTime), 0);
}

#[test]
fn test_merge_is_idempotent() {
    let mut runner = runner(Sessions::with_gap(5).unwrap(), &Trigger::AfterEndOfWindow);
    runner.process_elements(&batch(&[0, 3, 20])).unwrap();
    let windows = runner.active_windows();
    let merges = runner.merge_sequence().len();
    assert_eq!(windows, vec![w(0, 8), w(20, 25)]);

    runner.merge_now().unwrap();
    runner.merge_now().unwrap();
    assert_eq!(runner.active_windows(), windows);
    assert_eq!(runner.merge_sequence().len(), merges);
}

#[test]
fn test_identical_timers_are_single_instance() {
    let mut runner = runner(FixedWindows::new(10).unwrap(), &Trigger::Default);
    runner.process_elements(&batch(&[1, 2, 3, 4, 5])).unwrap();
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 1);

    let fired = runner.advance_input_watermark(10).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].result, TriggerResult::Fire);
}

#[test]
fn test_finished_is_permanent() {
    let mut runner = runner(FixedWindows::new(10).unwrap(), &Trigger::AfterCount(2));
    assert_eq!(runner.process_elements(&batch(&[1, 2])).unwrap().len(), 1);
    assert!(runner.is_finished(&w(0, 10)));

    assert!(runner.process_elements(&batch(&[3, 4, 5])).unwrap().is_empty());
    assert!(runner.advance_input_watermark(100).unwrap().is_empty());
    assert!(runner.advance_processing_time(100).unwrap().is_empty());
    assert!(runner
        .fire_timer(w(0, 10), 9, TimeDomain::EventTime)
        .unwrap()
        .is_none());
    assert!(runner.is_finished(&w(0, 10)));
}

// ── Other window functions ──

#[test]
fn test_sliding_windows_fire_per_window() {
    let mut runner = runner(
        SlidingWindows::new(10, 5).unwrap(),
        &Trigger::AfterEndOfWindow,
    );
    runner.process_elements(&batch(&[7])).unwrap();
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 2);

    let fired = runner.advance_input_watermark(10).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(0, 10));

    let fired = runner.advance_input_watermark(15).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(5, 15));
}

#[test]
fn test_global_window_counts() {
    let strategy =
        WindowingStrategy::new(GlobalWindows, &Trigger::repeatedly(Trigger::AfterCount(3)))
            .unwrap();
    let mut runner: KeyedTriggerRunner<GlobalWindow> = KeyedTriggerRunner::new(strategy);

    let fired = runner
        .process_elements(&batch(&[1, 2, 3, 4, 5, 6, 7]))
        .unwrap();
    assert_eq!(fired.len(), 2);
    assert!(fired.iter().all(|f| f.window == GlobalWindow));
    assert!(!runner.is_finished(&GlobalWindow));
}

// ── Configuration ──

#[test]
fn test_runner_config_from_json() {
    let config: RunnerConfig = serde_json::from_str(r#"{"record_results": false}"#).unwrap();
    assert!(!config.record_results);
    assert!(config.end_of_window_timers);
    assert_eq!(config.watermark_holds, WatermarkHoldPolicy::ElementTimestamp);

    let config: RunnerConfig =
        serde_json::from_str(r#"{"watermark_holds": "disabled"}"#).unwrap();
    assert_eq!(config.watermark_holds, WatermarkHoldPolicy::Disabled);

    let json = serde_json::to_string(&RunnerConfig::default()).unwrap();
    let parsed: RunnerConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, RunnerConfig::default());
}
