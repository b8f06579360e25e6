//! Leaf triggers.

use super::{MergeInfo, TriggerContext, TriggerError, TriggerResult};
use crate::state::{Combiner, StateNamespace, StateTag};
use crate::time::TimeDomain;
use crate::window::BoundedWindow;

const ELEMENT_COUNT: StateTag = StateTag::combining("count", Combiner::Sum);
const DELAYED_UNTIL: StateTag = StateTag::value("delayed_until");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Leaf {
    EndOfWindow,
    Default,
    AfterCount(u64),
    AfterProcessingTime(i64),
}

/// True once event time is past the end of the context window, either
/// because the input watermark moved past it or because the end-of-window
/// timer itself is firing.
fn past_end_of_window<W: BoundedWindow>(ctx: &TriggerContext<'_, W>) -> bool {
    let max = ctx.window().max_timestamp();
    let timer_at_end = matches!(
        ctx.fired_timer(),
        Some((ts, TimeDomain::EventTime)) if ts >= max
    );
    timer_at_end || ctx.input_watermark().is_some_and(|wm| wm.timestamp() > max)
}

fn count_reached(count: i64, target: u64) -> bool {
    u64::try_from(count).is_ok_and(|c| c >= target)
}

impl Leaf {
    pub(super) fn name(self) -> &'static str {
        match self {
            Self::EndOfWindow => "AfterEndOfWindow",
            Self::Default => "Default",
            Self::AfterCount(_) => "AfterCount",
            Self::AfterProcessingTime(_) => "AfterProcessingTime",
        }
    }

    pub(super) fn on_element<W: BoundedWindow>(
        self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
    ) -> Result<TriggerResult, TriggerError> {
        match self {
            Self::EndOfWindow | Self::Default => {
                let max = ctx.window().max_timestamp();
                ctx.set_timer(max, TimeDomain::EventTime);
                Ok(TriggerResult::Continue)
            }
            Self::AfterCount(target) => {
                let namespace = ctx.node_namespace(index);
                let count = ctx
                    .state_mut()
                    .add_combining(&namespace, &ELEMENT_COUNT, 1)?;
                if count_reached(count, target) {
                    Ok(TriggerResult::FireAndFinish)
                } else {
                    Ok(TriggerResult::Continue)
                }
            }
            Self::AfterProcessingTime(delay_ms) => {
                let namespace = ctx.node_namespace(index);
                if ctx
                    .state()
                    .read_value::<i64>(&namespace, &DELAYED_UNTIL)?
                    .is_none()
                {
                    let target = ctx.processing_time().saturating_add(delay_ms);
                    ctx.state_mut()
                        .write_value(&namespace, &DELAYED_UNTIL, &target)?;
                    ctx.set_timer(target, TimeDomain::ProcessingTime);
                }
                Ok(TriggerResult::Continue)
            }
        }
    }

    pub(super) fn on_timer<W: BoundedWindow>(
        self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
    ) -> Result<TriggerResult, TriggerError> {
        match self {
            Self::EndOfWindow if past_end_of_window(ctx) => Ok(TriggerResult::FireAndFinish),
            Self::Default if past_end_of_window(ctx) => Ok(TriggerResult::Fire),
            Self::AfterProcessingTime(_) => {
                let namespace = ctx.node_namespace(index);
                match ctx
                    .state()
                    .read_value::<i64>(&namespace, &DELAYED_UNTIL)?
                {
                    Some(target) if ctx.processing_time() >= target => {
                        Ok(TriggerResult::FireAndFinish)
                    }
                    _ => Ok(TriggerResult::Continue),
                }
            }
            _ => Ok(TriggerResult::Continue),
        }
    }

    pub(super) fn on_merge<W: BoundedWindow>(
        self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
        merge: &MergeInfo<W>,
    ) -> Result<TriggerResult, TriggerError> {
        match self {
            Self::EndOfWindow | Self::Default => {
                for old in merge.old_windows() {
                    if old != ctx.window() {
                        ctx.delete_timer_for(old, old.max_timestamp(), TimeDomain::EventTime);
                    }
                }
                let max = ctx.window().max_timestamp();
                ctx.set_timer(max, TimeDomain::EventTime);
                Ok(TriggerResult::Continue)
            }
            Self::AfterCount(target) => {
                let namespace = ctx.node_namespace(index);
                let merged = ctx.state_mut().merge_into(
                    &ELEMENT_COUNT,
                    &merge.node_namespaces(index),
                    &namespace,
                )?;
                if merged.is_some_and(|count| count_reached(count, target)) {
                    Ok(TriggerResult::FireAndFinish)
                } else {
                    Ok(TriggerResult::Continue)
                }
            }
            Self::AfterProcessingTime(_) => {
                // Keep the earliest deadline of all merged windows
                let namespace = ctx.node_namespace(index);
                let current = ctx
                    .state()
                    .read_value::<i64>(&namespace, &DELAYED_UNTIL)?;
                let mut earliest = current;
                for old in merge.old_windows() {
                    if old == ctx.window() {
                        continue;
                    }
                    let old_namespace = StateNamespace::WindowAndTrigger(old.clone(), index);
                    if let Some(deadline) = ctx
                        .state()
                        .read_value::<i64>(&old_namespace, &DELAYED_UNTIL)?
                    {
                        earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
                        ctx.delete_timer_for(old, deadline, TimeDomain::ProcessingTime);
                        ctx.state_mut().clear_cell(&old_namespace, &DELAYED_UNTIL)?;
                    }
                }
                if let Some(deadline) = earliest {
                    if let Some(previous) = current.filter(|p| *p != deadline) {
                        ctx.delete_timer(previous, TimeDomain::ProcessingTime);
                    }
                    ctx.state_mut()
                        .write_value(&namespace, &DELAYED_UNTIL, &deadline)?;
                    ctx.set_timer(deadline, TimeDomain::ProcessingTime);
                }
                Ok(TriggerResult::Continue)
            }
        }
    }

    pub(super) fn clear<W: BoundedWindow>(
        self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
    ) -> Result<(), TriggerError> {
        let namespace = ctx.node_namespace(index);
        match self {
            Self::EndOfWindow | Self::Default => {
                let max = ctx.window().max_timestamp();
                ctx.delete_timer(max, TimeDomain::EventTime);
            }
            Self::AfterCount(_) => {
                ctx.state_mut().clear_cell(&namespace, &ELEMENT_COUNT)?;
            }
            Self::AfterProcessingTime(_) => {
                if let Some(deadline) = ctx
                    .state()
                    .read_value::<i64>(&namespace, &DELAYED_UNTIL)?
                {
                    ctx.delete_timer(deadline, TimeDomain::ProcessingTime);
                }
                ctx.state_mut().clear_cell(&namespace, &DELAYED_UNTIL)?;
            }
        }
        Ok(())
    }
}
