//! Per-key timer registry and watermark clocks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use fxhash::FxHashSet;

use super::{TimeDomain, TimeError, Watermark, TIMESTAMP_MIN};
use crate::window::BoundedWindow;

/// A timer: the window namespace it belongs to, its timestamp, and its domain.
///
/// Two timers with the same triple are the same timer; the registry keeps at
/// most one of them pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerData<W> {
    window: W,
    timestamp: i64,
    domain: TimeDomain,
}

impl<W> TimerData<W> {
    /// Creates a timer for `window` at `timestamp` in `domain`.
    #[must_use]
    pub fn new(window: W, timestamp: i64, domain: TimeDomain) -> Self {
        Self {
            window,
            timestamp,
            domain,
        }
    }

    /// Returns the window namespace of the timer.
    #[must_use]
    pub fn window(&self) -> &W {
        &self.window
    }

    /// Returns the timer timestamp in milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the time domain of the timer.
    #[must_use]
    pub fn domain(&self) -> TimeDomain {
        self.domain
    }

    /// Consumes the timer, returning its window.
    #[must_use]
    pub fn into_window(self) -> W {
        self.window
    }
}

/// Heap entry. `seq` is the registration order and breaks timestamp ties.
#[derive(Debug)]
struct QueuedTimer<W> {
    timer: TimerData<W>,
    seq: u64,
}

impl<W> Ord for QueuedTimer<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior (earliest first)
        other
            .timer
            .timestamp
            .cmp(&self.timer.timestamp)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<W> PartialOrd for QueuedTimer<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W> PartialEq for QueuedTimer<W> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<W> Eq for QueuedTimer<W> {}

/// State of one fire pass over a single time domain.
///
/// Created by [`TimerRegistry::begin_pass`] and consumed by
/// [`TimerRegistry::finish_pass`]. Timers registered while the pass is running
/// for a timestamp at or before the latest fired timestamp are held back and
/// only become due in the next pass.
#[derive(Debug)]
pub struct FiringPass<W> {
    domain: TimeDomain,
    now: i64,
    start_seq: u64,
    last_fired: Option<i64>,
    deferred: Vec<QueuedTimer<W>>,
    fired: usize,
}

impl<W> FiringPass<W> {
    /// Returns the domain this pass fires.
    #[must_use]
    pub fn domain(&self) -> TimeDomain {
        self.domain
    }

    /// Returns the clock value the pass fires against.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.now
    }

    /// Returns the number of timers handed out so far.
    #[must_use]
    pub fn fired_count(&self) -> usize {
        self.fired
    }
}

/// Timer registry for a single key.
///
/// Holds the pending event-time and processing-time timers in two priority
/// queues ordered by timestamp, plus the three clocks of the key: input
/// watermark, output watermark, and processing time.
///
/// Timers with equal timestamps are handed out in registration order.
#[derive(Debug)]
pub struct TimerRegistry<W: BoundedWindow> {
    /// Every pending timer, for idempotent set and O(1) membership checks
    pending: FxHashSet<TimerData<W>>,
    /// Pending event-time timers, earliest first
    event_timers: BinaryHeap<QueuedTimer<W>>,
    /// Pending processing-time timers, earliest first
    processing_timers: BinaryHeap<QueuedTimer<W>>,
    next_seq: u64,
    input_watermark: Option<Watermark>,
    output_watermark: Option<Watermark>,
    processing_time: i64,
}

impl<W: BoundedWindow> TimerRegistry<W> {
    /// Creates an empty registry with unset watermarks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: FxHashSet::default(),
            event_timers: BinaryHeap::new(),
            processing_timers: BinaryHeap::new(),
            next_seq: 0,
            input_watermark: None,
            output_watermark: None,
            processing_time: TIMESTAMP_MIN,
        }
    }

    fn queue_mut(&mut self, domain: TimeDomain) -> &mut BinaryHeap<QueuedTimer<W>> {
        match domain {
            TimeDomain::EventTime => &mut self.event_timers,
            TimeDomain::ProcessingTime => &mut self.processing_timers,
        }
    }

    fn queue(&self, domain: TimeDomain) -> &BinaryHeap<QueuedTimer<W>> {
        match domain {
            TimeDomain::EventTime => &self.event_timers,
            TimeDomain::ProcessingTime => &self.processing_timers,
        }
    }

    /// Registers a timer unless an identical one is already pending.
    ///
    /// Returns `true` if the timer was newly registered.
    pub fn set_timer(&mut self, timer: TimerData<W>) -> bool {
        if self.pending.contains(&timer) {
            tracing::trace!(?timer, "timer already pending");
            return false;
        }
        tracing::trace!(?timer, "set timer");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(timer.clone());
        self.queue_mut(timer.domain).push(QueuedTimer { timer, seq });
        true
    }

    /// Removes a pending timer.
    ///
    /// Returns `true` if the timer was pending. Deleting an unknown timer is a
    /// no-op.
    pub fn delete_timer(&mut self, timer: &TimerData<W>) -> bool {
        if !self.pending.remove(timer) {
            return false;
        }
        tracing::trace!(?timer, "delete timer");
        self.queue_mut(timer.domain).retain(|q| q.timer != *timer);
        true
    }

    /// Returns true if the timer is pending.
    #[must_use]
    pub fn is_pending(&self, timer: &TimerData<W>) -> bool {
        self.pending.contains(timer)
    }

    /// Returns every pending timer of `window`, in either domain, ordered by
    /// domain then timestamp.
    #[must_use]
    pub fn pending_for_window(&self, window: &W) -> Vec<TimerData<W>> {
        let mut timers: Vec<_> = self
            .pending
            .iter()
            .filter(|t| t.window == *window)
            .cloned()
            .collect();
        timers.sort_by_key(|t| (t.domain, t.timestamp));
        timers
    }

    /// Returns the number of pending timers in a domain.
    #[must_use]
    pub fn pending_count(&self, domain: TimeDomain) -> usize {
        self.queue(domain).len()
    }

    /// Returns the timestamp of the next timer to fire in a domain, if any.
    #[must_use]
    pub fn next_timer_timestamp(&self, domain: TimeDomain) -> Option<i64> {
        self.queue(domain).peek().map(|q| q.timer.timestamp)
    }

    /// Returns the current input watermark, or `None` before the first advance.
    #[must_use]
    pub fn current_input_watermark(&self) -> Option<Watermark> {
        self.input_watermark
    }

    /// Returns the current output watermark, or `None` before the first advance.
    #[must_use]
    pub fn current_output_watermark(&self) -> Option<Watermark> {
        self.output_watermark
    }

    /// Returns the current processing time.
    #[must_use]
    pub fn current_processing_time(&self) -> i64 {
        self.processing_time
    }

    /// Moves the input watermark forward.
    ///
    /// # Errors
    ///
    /// Returns `TimeError::WatermarkRegression` if `timestamp` is before the
    /// current input watermark. The watermark is left unchanged.
    pub fn advance_input_watermark(&mut self, timestamp: i64) -> Result<(), TimeError> {
        if let Some(current) = self.input_watermark {
            if timestamp < current.timestamp() {
                return Err(TimeError::WatermarkRegression {
                    current: current.timestamp(),
                    new: timestamp,
                });
            }
        }
        tracing::trace!(
            from = ?self.input_watermark,
            to = timestamp,
            "advance input watermark"
        );
        self.input_watermark = Some(Watermark::new(timestamp));
        Ok(())
    }

    /// Moves processing time forward.
    ///
    /// # Errors
    ///
    /// Returns `TimeError::ProcessingTimeRegression` if `timestamp` is before
    /// the current processing time.
    pub fn advance_processing_time(&mut self, timestamp: i64) -> Result<(), TimeError> {
        if timestamp < self.processing_time {
            return Err(TimeError::ProcessingTimeRegression {
                current: self.processing_time,
                new: timestamp,
            });
        }
        tracing::trace!(
            from = self.processing_time,
            to = timestamp,
            "advance processing time"
        );
        self.processing_time = timestamp;
        Ok(())
    }

    /// Recomputes the output watermark from the earliest outstanding hold.
    ///
    /// With no hold the output watermark follows the input watermark. The
    /// result is clipped to the input watermark. Returns `None` while the
    /// input watermark has never been set.
    ///
    /// # Errors
    ///
    /// Returns `TimeError::OutputWatermarkRegression` if the recomputed value
    /// is behind the current output watermark. The output watermark is left
    /// unchanged in that case.
    pub fn advance_output_watermark(
        &mut self,
        earliest_hold: Option<i64>,
    ) -> Result<Option<Watermark>, TimeError> {
        let Some(input) = self.input_watermark else {
            return Ok(None);
        };
        let mut candidate = earliest_hold.map_or(input, Watermark::new);
        if candidate > input {
            tracing::trace!(
                hold = candidate.timestamp(),
                input = input.timestamp(),
                "clipping output watermark to input watermark"
            );
            candidate = input;
        }
        if let Some(current) = self.output_watermark {
            if candidate < current {
                return Err(TimeError::OutputWatermarkRegression {
                    current: current.timestamp(),
                    new: candidate.timestamp(),
                });
            }
        }
        tracing::trace!(
            from = ?self.output_watermark,
            to = candidate.timestamp(),
            "advance output watermark"
        );
        self.output_watermark = Some(candidate);
        Ok(self.output_watermark)
    }

    /// Starts a fire pass over `domain` against the domain's current clock.
    #[must_use]
    pub fn begin_pass(&self, domain: TimeDomain) -> FiringPass<W> {
        let now = match domain {
            TimeDomain::EventTime => self
                .input_watermark
                .map_or(TIMESTAMP_MIN, |w| w.timestamp()),
            TimeDomain::ProcessingTime => self.processing_time,
        };
        FiringPass {
            domain,
            now,
            start_seq: self.next_seq,
            last_fired: None,
            deferred: Vec::new(),
            fired: 0,
        }
    }

    /// Removes and returns the next due timer of the pass.
    ///
    /// A timer is due when the pass clock is strictly after its timestamp.
    /// The timer is no longer pending when it is returned, so the caller may
    /// register an identical timer while handling it.
    pub fn pop_due(&mut self, pass: &mut FiringPass<W>) -> Option<TimerData<W>> {
        loop {
            let head = self.queue(pass.domain).peek()?;
            if pass.now <= head.timer.timestamp {
                return None;
            }
            let queued = self.queue_mut(pass.domain).pop()?;
            let registered_during_pass = queued.seq >= pass.start_seq;
            if registered_during_pass
                && pass
                    .last_fired
                    .is_some_and(|fired| queued.timer.timestamp <= fired)
            {
                tracing::trace!(timer = ?queued.timer, "deferring timer reset during fire pass");
                pass.deferred.push(queued);
                continue;
            }
            self.pending.remove(&queued.timer);
            pass.last_fired = Some(queued.timer.timestamp);
            pass.fired += 1;
            tracing::trace!(timer = ?queued.timer, now = pass.now, "firing timer");
            return Some(queued.timer);
        }
    }

    /// Ends a pass, returning deferred timers to the queue.
    ///
    /// A timer deleted while deferred is dropped. A timer deferred more than
    /// once (set, deleted and set again during the pass) is queued once.
    pub fn finish_pass(&mut self, pass: FiringPass<W>) {
        let domain = pass.domain;
        let mut requeued = FxHashSet::default();
        for queued in pass.deferred {
            if self.pending.contains(&queued.timer) && requeued.insert(queued.timer.clone()) {
                self.queue_mut(domain).push(queued);
            }
        }
    }
}

impl<W: BoundedWindow> Default for TimerRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}
