use super::*;
use crate::state::StateError;
use crate::time::TimeError;
use crate::trigger::Trigger;
use crate::window::{FixedWindows, IntervalWindow, Sessions};

fn fixed(size_ms: i64, trigger: &Trigger) -> KeyedTriggerRunner<IntervalWindow> {
    let strategy = WindowingStrategy::new(FixedWindows::new(size_ms).unwrap(), trigger).unwrap();
    KeyedTriggerRunner::new(strategy)
}

fn sessions(gap_ms: i64, trigger: &Trigger) -> KeyedTriggerRunner<IntervalWindow> {
    let strategy = WindowingStrategy::new(Sessions::with_gap(gap_ms).unwrap(), trigger).unwrap();
    KeyedTriggerRunner::new(strategy)
}

fn elements(timestamps: &[i64]) -> Vec<TimestampedValue<()>> {
    timestamps
        .iter()
        .map(|&ts| TimestampedValue::new((), ts))
        .collect()
}

fn w(start: i64, end: i64) -> IntervalWindow {
    IntervalWindow::new(start, end)
}

fn output_ts(runner: &KeyedTriggerRunner<IntervalWindow>) -> Option<i64> {
    runner.current_output_watermark().map(|wm| wm.timestamp())
}

#[test]
fn test_runner_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<KeyedTriggerRunner<IntervalWindow>>();
}

#[test]
fn test_accumulation_mode_defaults() {
    let runner = fixed(10, &Trigger::AfterEndOfWindow);
    assert_eq!(
        runner.strategy().accumulation_mode(),
        AccumulationMode::Discarding
    );

    let runner = sessions(5, &Trigger::AfterEndOfWindow);
    assert_eq!(
        runner.strategy().accumulation_mode(),
        AccumulationMode::Accumulating
    );
}

#[test]
fn test_end_of_window_fires_once() {
    let mut runner = fixed(10, &Trigger::AfterEndOfWindow);

    let fired = runner.process_elements(&elements(&[1, 2, 3])).unwrap();
    assert!(fired.is_empty());
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 1);
    assert_eq!(runner.next_timer_timestamp(TimeDomain::EventTime), Some(9));

    let fired = runner.advance_input_watermark(10).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(0, 10));
    assert_eq!(fired[0].result, TriggerResult::FireAndFinish);
    assert_eq!(
        fired[0].cause,
        EvaluationCause::Timer {
            timestamp: 9,
            domain: TimeDomain::EventTime
        }
    );
    assert!(runner.is_finished(&w(0, 10)));
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 0);

    assert!(runner.advance_input_watermark(20).unwrap().is_empty());
}

#[test]
fn test_timer_not_due_at_its_own_timestamp() {
    let mut runner = fixed(10, &Trigger::AfterEndOfWindow);
    runner.process_elements(&elements(&[1])).unwrap();

    assert!(runner.advance_input_watermark(9).unwrap().is_empty());
    assert_eq!(runner.advance_input_watermark(10).unwrap().len(), 1);
}

#[test]
fn test_late_element_for_finished_window_is_dropped() {
    let mut runner = fixed(10, &Trigger::AfterEndOfWindow);
    runner.process_elements(&elements(&[1])).unwrap();
    runner.advance_input_watermark(10).unwrap();
    runner.clear_result_sequence();

    let fired = runner.process_elements(&elements(&[4])).unwrap();
    assert!(fired.is_empty());
    assert!(runner.result_sequence().is_empty());
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 0);
    assert!(runner.is_finished(&w(0, 10)));
}

#[test]
fn test_repeatedly_count_fires_in_batch() {
    let mut runner = fixed(10, &Trigger::repeatedly(Trigger::AfterCount(2)));
    let fired = runner.process_elements(&elements(&[1, 2, 3, 4, 5])).unwrap();

    assert_eq!(fired.len(), 2);
    assert_eq!(
        fired[0].cause,
        EvaluationCause::Element { timestamp: 2 }
    );
    assert_eq!(
        fired[1].cause,
        EvaluationCause::Element { timestamp: 4 }
    );
    assert_eq!(runner.result_sequence().len(), 5);
    assert_eq!(runner.latest_result(), Some(TriggerResult::Continue));
}

#[test]
fn test_elements_in_several_windows() {
    let mut runner = fixed(10, &Trigger::AfterEndOfWindow);
    runner.process_elements(&elements(&[1, 12, 25])).unwrap();
    assert_eq!(
        runner.active_windows(),
        vec![w(0, 10), w(10, 20), w(20, 30)]
    );

    let fired = runner.advance_input_watermark(25).unwrap();
    let windows: Vec<_> = fired.iter().map(|f| f.window).collect();
    assert_eq!(windows, vec![w(0, 10), w(10, 20)]);
}

#[test]
fn test_hold_keeps_output_watermark_back() {
    let mut runner = fixed(10, &Trigger::AfterCount(5));
    runner.process_elements(&elements(&[3, 15])).unwrap();
    assert_eq!(output_ts(&runner), None);

    runner.advance_input_watermark(12).unwrap();
    assert_eq!(output_ts(&runner), Some(3));

    runner.clear_state(&w(0, 10)).unwrap();
    runner.advance_input_watermark(13).unwrap();
    assert_eq!(output_ts(&runner), Some(13));

    runner.advance_input_watermark(16).unwrap();
    assert_eq!(output_ts(&runner), Some(15));
}

#[test]
fn test_hold_released_when_window_fires() {
    let mut runner = fixed(10, &Trigger::AfterCount(2));
    runner.process_elements(&elements(&[3])).unwrap();
    runner.advance_input_watermark(5).unwrap();
    assert_eq!(output_ts(&runner), Some(3));

    assert_eq!(runner.process_elements(&elements(&[4])).unwrap().len(), 1);
    runner.advance_input_watermark(6).unwrap();
    assert_eq!(output_ts(&runner), Some(6));
}

#[test]
fn test_late_element_hold_clipped_to_output_watermark() {
    let mut runner = fixed(10, &Trigger::AfterCount(5));
    runner.advance_input_watermark(30).unwrap();
    assert_eq!(output_ts(&runner), Some(30));

    runner.process_elements(&elements(&[25])).unwrap();
    runner.advance_input_watermark(40).unwrap();
    assert_eq!(output_ts(&runner), Some(30));
}

#[test]
fn test_disabled_holds_follow_input() {
    let strategy = WindowingStrategy::new(FixedWindows::new(10).unwrap(), &Trigger::AfterCount(5))
        .unwrap()
        .with_config(RunnerConfig::default().with_watermark_holds(WatermarkHoldPolicy::Disabled));
    let mut runner = KeyedTriggerRunner::new(strategy);

    runner.process_elements(&elements(&[3])).unwrap();
    runner.advance_input_watermark(12).unwrap();
    assert_eq!(output_ts(&runner), Some(12));
    assert!(runner.state().earliest_hold().unwrap().is_none());
}

#[test]
fn test_without_end_of_window_timers() {
    let strategy = WindowingStrategy::new(FixedWindows::new(10).unwrap(), &Trigger::AfterCount(5))
        .unwrap()
        .with_config(RunnerConfig::default().with_end_of_window_timers(false));
    let mut runner = KeyedTriggerRunner::new(strategy);

    runner.process_elements(&elements(&[3])).unwrap();
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 0);
}

#[test]
fn test_result_recording_can_be_disabled() {
    let strategy = WindowingStrategy::new(FixedWindows::new(10).unwrap(), &Trigger::AfterCount(1))
        .unwrap()
        .with_config(RunnerConfig::default().with_record_results(false));
    let mut runner = KeyedTriggerRunner::new(strategy);

    let fired = runner.process_elements(&elements(&[3])).unwrap();
    assert_eq!(fired.len(), 1);
    assert!(runner.result_sequence().is_empty());
    assert_eq!(runner.latest_result(), Some(TriggerResult::FireAndFinish));
}

#[test]
fn test_watermark_regression_keeps_runner_usable() {
    let mut runner = fixed(10, &Trigger::AfterEndOfWindow);
    runner.advance_input_watermark(20).unwrap();

    let err = runner.advance_input_watermark(10).unwrap_err();
    assert!(matches!(
        err,
        Error::Time(TimeError::WatermarkRegression {
            current: 20,
            new: 10
        })
    ));
    assert!(!err.is_invariant_violation());
    assert!(runner.poisoned().is_none());
    assert_eq!(runner.current_input_watermark(), Some(Watermark::new(20)));
    assert!(runner.advance_input_watermark(25).is_ok());
}

#[test]
fn test_processing_time_regression() {
    let mut runner = fixed(10, &Trigger::AfterEndOfWindow);
    runner.advance_processing_time(100).unwrap();
    assert!(matches!(
        runner.advance_processing_time(50),
        Err(Error::Time(TimeError::ProcessingTimeRegression { .. }))
    ));
    assert_eq!(runner.current_processing_time(), 100);
}

#[test]
fn test_invalid_timestamp_rejected() {
    let mut runner = fixed(10, &Trigger::AfterEndOfWindow);
    let err = runner.process_elements(&elements(&[i64::MAX])).unwrap_err();
    assert!(matches!(err, Error::Time(TimeError::InvalidTimestamp(_))));
    assert!(runner.poisoned().is_none());
}

#[test]
fn test_processing_time_trigger() {
    let mut runner = fixed(10, &Trigger::AfterProcessingTime(100));
    runner.advance_processing_time(1_000).unwrap();
    runner.process_elements(&elements(&[1])).unwrap();
    assert_eq!(
        runner.next_timer_timestamp(TimeDomain::ProcessingTime),
        Some(1_100)
    );

    assert!(runner.advance_processing_time(1_100).unwrap().is_empty());
    let fired = runner.advance_processing_time(1_101).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].result, TriggerResult::FireAndFinish);
    // Processing time does not move the output watermark
    assert_eq!(runner.current_output_watermark(), None);
}

#[test]
fn test_fire_timer_directly() {
    let mut runner = fixed(10, &Trigger::Default);
    runner.process_elements(&elements(&[1])).unwrap();

    let evaluation = runner
        .fire_timer(w(0, 10), 9, TimeDomain::EventTime)
        .unwrap()
        .unwrap();
    assert_eq!(evaluation.result, TriggerResult::Fire);
    // Removed before firing
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 0);

    let evaluation = runner
        .fire_timer(w(0, 10), 3, TimeDomain::EventTime)
        .unwrap()
        .unwrap();
    assert_eq!(evaluation.result, TriggerResult::Continue);
}

#[test]
fn test_fire_timer_rejects_foreign_window() {
    let mut runner = fixed(10, &Trigger::Default);
    let err = runner
        .fire_timer(w(0, 7), 6, TimeDomain::EventTime)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Window(WindowError::IncompatibleWindow(_))
    ));
    assert!(runner.poisoned().is_none());

    assert!(matches!(
        runner.clear_state(&w(3, 13)),
        Err(Error::Window(WindowError::IncompatibleWindow(_)))
    ));
}

#[test]
fn test_clear_state_is_complete() {
    let mut runner = fixed(
        10,
        &Trigger::AfterAll(vec![
            Trigger::AfterCount(5),
            Trigger::AfterProcessingTime(10),
        ]),
    );
    runner.process_elements(&elements(&[1, 2])).unwrap();
    assert!(!runner.state().is_empty());

    runner.clear_state(&w(0, 10)).unwrap();
    runner.assert_fully_cleared(&w(0, 10)).unwrap();
    assert!(runner.state().is_empty());
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 0);
    assert_eq!(runner.pending_timers(TimeDomain::ProcessingTime), 0);
    assert!(runner.active_windows().is_empty());
}

#[test]
fn test_cleared_window_starts_over() {
    let mut runner = fixed(10, &Trigger::AfterCount(1));
    assert_eq!(runner.process_elements(&elements(&[1])).unwrap().len(), 1);
    assert!(runner.is_finished(&w(0, 10)));

    runner.clear_state(&w(0, 10)).unwrap();
    assert!(!runner.is_finished(&w(0, 10)));
    assert_eq!(runner.process_elements(&elements(&[2])).unwrap().len(), 1);
}

#[test]
fn test_residual_check_reports_any_window_timer() {
    let mut runner = fixed(10, &Trigger::AfterEndOfWindow);
    runner.process_elements(&elements(&[1])).unwrap();
    runner.clear_state(&w(0, 10)).unwrap();

    // A timer of the window that no trigger owns anymore
    runner.timers.set_timer(TimerData::new(
        w(0, 10),
        500,
        TimeDomain::ProcessingTime,
    ));

    match runner.assert_fully_cleared(&w(0, 10)).unwrap_err() {
        Error::State(StateError::ResidualState { tags, .. }) => {
            assert_eq!(tags, vec!["processing-time timer at 500".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(runner.poisoned().is_some());
}

#[test]
fn test_residual_state_poisons_runner() {
    let mut runner = fixed(10, &Trigger::AfterCount(5));
    runner.process_elements(&elements(&[1])).unwrap();

    let err = runner.assert_fully_cleared(&w(0, 10)).unwrap_err();
    match &err {
        Error::State(StateError::ResidualState { tags, .. }) => {
            assert!(tags.contains(&"node[0]/count".to_string()));
            assert!(tags.contains(&"finished bits".to_string()));
            assert!(tags.contains(&"end-of-window timer".to_string()));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.is_invariant_violation());
    assert!(runner.poisoned().is_some());

    assert!(matches!(
        runner.process_elements(&elements(&[2])),
        Err(Error::Aborted(_))
    ));
    assert!(matches!(
        runner.advance_input_watermark(5),
        Err(Error::Aborted(_))
    ));
}

#[test]
fn test_sessions_merge_in_batch() {
    let mut runner = sessions(5, &Trigger::AfterCount(2));
    let fired = runner.process_elements(&elements(&[0, 3])).unwrap();

    assert_eq!(runner.active_windows(), vec![w(0, 8)]);
    assert_eq!(runner.merge_sequence().len(), 1);
    assert_eq!(runner.merge_sequence()[0].merged, vec![w(0, 5), w(3, 8)]);
    assert_eq!(runner.latest_merge_result(), Some(MergeResult::Continue));

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(0, 8));
    assert_eq!(fired[0].cause, EvaluationCause::Element { timestamp: 3 });
}

#[test]
fn test_sessions_merge_carries_counts() {
    let mut runner = sessions(5, &Trigger::AfterCount(3));
    runner.process_elements(&elements(&[0])).unwrap();
    runner.process_elements(&elements(&[3])).unwrap();
    assert_eq!(runner.active_windows(), vec![w(0, 8)]);

    let fired = runner.process_elements(&elements(&[6])).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(0, 11));
}

#[test]
fn test_merged_window_replaces_timers_and_holds() {
    let mut runner = sessions(5, &Trigger::Default);
    runner.process_elements(&elements(&[10])).unwrap();
    assert_eq!(runner.next_timer_timestamp(TimeDomain::EventTime), Some(14));

    runner.process_elements(&elements(&[12])).unwrap();
    assert_eq!(runner.active_windows(), vec![w(10, 17)]);
    assert_eq!(runner.pending_timers(TimeDomain::EventTime), 1);
    assert_eq!(runner.next_timer_timestamp(TimeDomain::EventTime), Some(16));
    assert!(runner.state().tags_in_use_for_window(&w(10, 15)).unwrap().is_empty());

    runner.advance_input_watermark(11).unwrap();
    assert_eq!(output_ts(&runner), Some(10));

    let fired = runner.advance_input_watermark(17).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(10, 17));
    assert_eq!(fired[0].result, TriggerResult::Fire);
    assert_eq!(output_ts(&runner), Some(17));
}

#[test]
fn test_merge_of_finished_and_open_window() {
    let mut runner = sessions(5, &Trigger::AfterEndOfWindow);
    runner.process_elements(&elements(&[0])).unwrap();
    assert_eq!(runner.advance_input_watermark(5).unwrap().len(), 1);
    assert!(runner.is_finished(&w(0, 5)));

    runner.process_elements(&elements(&[3])).unwrap();
    assert_eq!(runner.active_windows(), vec![w(0, 8)]);
    assert!(!runner.is_finished(&w(0, 8)));
    // The merged-away window resolves to the merge result
    assert!(!runner.is_finished(&w(0, 5)));

    let fired = runner.advance_input_watermark(8).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, w(0, 8));
}

#[test]
fn test_merge_now_without_merging_function() {
    let mut runner = fixed(10, &Trigger::AfterEndOfWindow);
    runner.process_elements(&elements(&[1])).unwrap();
    assert!(runner.merge_now().unwrap().is_empty());
    assert!(runner.merge_sequence().is_empty());
}
