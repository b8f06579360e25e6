//! Composite triggers: how child results combine.

use smallvec::SmallVec;

use super::executable::{Event, ExecutableTrigger};
use super::{MergeInfo, MergeResult, TriggerContext, TriggerError, TriggerResult};
use crate::window::BoundedWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Composite {
    AfterAll,
    AfterFirst,
    AfterEach,
    Repeatedly,
    OrFinally,
}

impl Composite {
    pub(super) fn name(self) -> &'static str {
        match self {
            Self::AfterAll => "AfterAll",
            Self::AfterFirst => "AfterFirst",
            Self::AfterEach => "AfterEach",
            Self::Repeatedly => "Repeatedly",
            Self::OrFinally => "OrFinally",
        }
    }

    pub(super) fn on_event<W: BoundedWindow>(
        self,
        tree: &ExecutableTrigger,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
        event: Event,
    ) -> Result<TriggerResult, TriggerError> {
        let children = tree.children(index);
        match self {
            Self::AfterAll => {
                for &child in children {
                    if !ctx.is_finished(child) {
                        tree.invoke(child, ctx, event)?;
                    }
                }
                if children.iter().all(|&child| ctx.is_finished(child)) {
                    Ok(TriggerResult::FireAndFinish)
                } else {
                    Ok(TriggerResult::Continue)
                }
            }
            Self::AfterFirst => {
                let mut fired = false;
                for &child in children {
                    if !ctx.is_finished(child) {
                        fired |= tree.invoke(child, ctx, event)?.is_fire();
                    }
                }
                if fired {
                    Ok(TriggerResult::FireAndFinish)
                } else {
                    Ok(TriggerResult::Continue)
                }
            }
            Self::AfterEach => {
                let Some(position) = children.iter().position(|&child| !ctx.is_finished(child))
                else {
                    return Ok(TriggerResult::FireAndFinish);
                };
                let is_last = position + 1 == children.len();
                match tree.invoke(children[position], ctx, event)? {
                    TriggerResult::FireAndFinish if is_last => Ok(TriggerResult::FireAndFinish),
                    TriggerResult::FireAndFinish | TriggerResult::Fire => Ok(TriggerResult::Fire),
                    TriggerResult::Continue => Ok(TriggerResult::Continue),
                }
            }
            Self::Repeatedly => {
                let child = children[0];
                if tree.invoke(child, ctx, event)?.is_fire() {
                    tree.reset_subtree(child, ctx)?;
                    Ok(TriggerResult::Fire)
                } else {
                    Ok(TriggerResult::Continue)
                }
            }
            Self::OrFinally => {
                let (main, until) = (children[0], children[1]);
                let main_result = if ctx.is_finished(main) {
                    TriggerResult::Continue
                } else {
                    tree.invoke(main, ctx, event)?
                };
                let until_fired = !ctx.is_finished(until) && tree.invoke(until, ctx, event)?.is_fire();
                if until_fired || main_result.is_finish() {
                    Ok(TriggerResult::FireAndFinish)
                } else {
                    Ok(main_result)
                }
            }
        }
    }

    pub(super) fn on_merge<W: BoundedWindow>(
        self,
        tree: &ExecutableTrigger,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
        merge: &MergeInfo<W>,
    ) -> Result<MergeResult, TriggerError> {
        let children = tree.children(index);
        match self {
            Self::AfterAll => {
                let mut all_finished = true;
                for &child in children {
                    all_finished &= tree.invoke_merge(child, ctx, merge)?.is_finish();
                }
                if all_finished {
                    Ok(MergeResult::FireAndFinish)
                } else {
                    Ok(MergeResult::Continue)
                }
            }
            Self::AfterFirst => {
                let mut any_done = false;
                for &child in children {
                    let result = tree.invoke_merge(child, ctx, merge)?;
                    any_done |= result.is_fire() || result.is_finish();
                }
                if any_done {
                    Ok(MergeResult::FireAndFinish)
                } else {
                    Ok(MergeResult::Continue)
                }
            }
            Self::AfterEach => {
                let mut results: SmallVec<[MergeResult; 4]> = SmallVec::new();
                for &child in children {
                    results.push(tree.invoke_merge(child, ctx, merge)?);
                }
                match children.iter().position(|&child| !ctx.is_finished(child)) {
                    None => Ok(MergeResult::FireAndFinish),
                    // A step completing during the merge, or the current step
                    // firing, both emit a pane
                    Some(current) if results[..=current].iter().any(|r| r.is_fire()) => {
                        Ok(MergeResult::Fire)
                    }
                    Some(_) => Ok(MergeResult::Continue),
                }
            }
            Self::Repeatedly => {
                let child = children[0];
                match tree.invoke_merge(child, ctx, merge)? {
                    result if result.is_fire() => {
                        tree.reset_subtree(child, ctx)?;
                        Ok(MergeResult::Fire)
                    }
                    MergeResult::AlreadyFinished => {
                        tree.reset_subtree(child, ctx)?;
                        Ok(MergeResult::Continue)
                    }
                    _ => Ok(MergeResult::Continue),
                }
            }
            Self::OrFinally => {
                let main = tree.invoke_merge(children[0], ctx, merge)?;
                let until = tree.invoke_merge(children[1], ctx, merge)?;
                if until.is_fire() || until.is_finish() || main.is_finish() {
                    Ok(MergeResult::FireAndFinish)
                } else if main.is_fire() {
                    Ok(MergeResult::Fire)
                } else {
                    Ok(MergeResult::Continue)
                }
            }
        }
    }
}
