//! Flattened trigger tree and node-level dispatch.

use std::ops::Range;

use smallvec::SmallVec;

use super::composite::Composite;
use super::leaf::Leaf;
use super::{
    FinishedBits, MergeInfo, MergeResult, Trigger, TriggerContext, TriggerError, TriggerResult,
};
use crate::window::BoundedWindow;

#[derive(Debug, Clone, Copy)]
pub(super) enum Event {
    Element,
    Timer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Leaf(Leaf),
    Composite(Composite),
}

#[derive(Debug, Clone)]
struct TriggerNode {
    kind: NodeKind,
    children: SmallVec<[usize; 4]>,
    /// One past the last index of this node's subtree
    subtree_end: usize,
}

/// A validated trigger tree in pre-order.
///
/// Node `i`'s subtree occupies the index range
/// [`subtree(i)`](Self::subtree), so resetting a subtree's finished bits is a
/// range clear.
#[derive(Debug, Clone)]
pub struct ExecutableTrigger {
    nodes: Vec<TriggerNode>,
}

impl ExecutableTrigger {
    /// Index of the root node.
    pub const ROOT: usize = 0;

    /// Validates and flattens a trigger descriptor.
    ///
    /// # Errors
    ///
    /// Returns `TriggerError` for composites without children, a zero
    /// element count, or a negative delay.
    pub fn new(trigger: &Trigger) -> Result<Self, TriggerError> {
        let mut nodes = Vec::new();
        Self::flatten(trigger, &mut nodes)?;
        Ok(Self { nodes })
    }

    fn flatten(trigger: &Trigger, nodes: &mut Vec<TriggerNode>) -> Result<usize, TriggerError> {
        let index = nodes.len();
        let mut children: SmallVec<[&Trigger; 4]> = SmallVec::new();
        let kind = match trigger {
            Trigger::AfterEndOfWindow => NodeKind::Leaf(Leaf::EndOfWindow),
            Trigger::Default => NodeKind::Leaf(Leaf::Default),
            Trigger::AfterCount(0) => return Err(TriggerError::InvalidCount),
            Trigger::AfterCount(n) => NodeKind::Leaf(Leaf::AfterCount(*n)),
            Trigger::AfterProcessingTime(delay) if *delay < 0 => {
                return Err(TriggerError::InvalidDelay(*delay))
            }
            Trigger::AfterProcessingTime(delay) => {
                NodeKind::Leaf(Leaf::AfterProcessingTime(*delay))
            }
            Trigger::AfterAll(subs) | Trigger::AfterFirst(subs) | Trigger::AfterEach(subs) => {
                let composite = match trigger {
                    Trigger::AfterAll(_) => Composite::AfterAll,
                    Trigger::AfterFirst(_) => Composite::AfterFirst,
                    _ => Composite::AfterEach,
                };
                if subs.is_empty() {
                    return Err(TriggerError::EmptyComposite(composite.name()));
                }
                children.extend(subs.iter());
                NodeKind::Composite(composite)
            }
            Trigger::Repeatedly(sub) => {
                children.push(sub.as_ref());
                NodeKind::Composite(Composite::Repeatedly)
            }
            Trigger::OrFinally { main, until } => {
                children.push(main.as_ref());
                children.push(until.as_ref());
                NodeKind::Composite(Composite::OrFinally)
            }
        };

        nodes.push(TriggerNode {
            kind,
            children: SmallVec::new(),
            subtree_end: index + 1,
        });
        let mut child_indices = SmallVec::new();
        for child in children {
            child_indices.push(Self::flatten(child, nodes)?);
        }
        nodes[index].children = child_indices;
        nodes[index].subtree_end = nodes.len();
        Ok(index)
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Indices of the children of `index`.
    #[must_use]
    pub fn children(&self, index: usize) -> &[usize] {
        &self.nodes[index].children
    }

    /// Index range covered by the subtree rooted at `index`.
    #[must_use]
    pub fn subtree(&self, index: usize) -> Range<usize> {
        index..self.nodes[index].subtree_end
    }

    /// Short name of the node kind, for diagnostics.
    #[must_use]
    pub fn kind_name(&self, index: usize) -> &'static str {
        match self.nodes[index].kind {
            NodeKind::Leaf(leaf) => leaf.name(),
            NodeKind::Composite(composite) => composite.name(),
        }
    }

    /// Fresh finished bits sized for this tree.
    #[must_use]
    pub fn new_finished_bits(&self) -> FinishedBits {
        FinishedBits::new(self.nodes.len())
    }

    /// Evaluates an element arriving in the context window.
    ///
    /// # Errors
    ///
    /// Returns `TriggerError::InvokedWhileFinished` if the node already
    /// finished, or a state error from a node.
    pub fn invoke_element<W: BoundedWindow>(
        &self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
    ) -> Result<TriggerResult, TriggerError> {
        self.invoke(index, ctx, Event::Element)
    }

    /// Evaluates a timer that fired for the context window.
    ///
    /// # Errors
    ///
    /// Same as [`invoke_element`](Self::invoke_element).
    pub fn invoke_timer<W: BoundedWindow>(
        &self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
    ) -> Result<TriggerResult, TriggerError> {
        self.invoke(index, ctx, Event::Timer)
    }

    pub(super) fn invoke<W: BoundedWindow>(
        &self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
        event: Event,
    ) -> Result<TriggerResult, TriggerError> {
        if ctx.is_finished(index) {
            return Err(TriggerError::InvokedWhileFinished {
                node: index,
                kind: self.kind_name(index),
                window: format!("{:?}", ctx.window()),
            });
        }
        let result = match self.nodes[index].kind {
            NodeKind::Leaf(leaf) => match event {
                Event::Element => leaf.on_element(index, ctx)?,
                Event::Timer => leaf.on_timer(index, ctx)?,
            },
            NodeKind::Composite(composite) => composite.on_event(self, index, ctx, event)?,
        };
        if result.is_finish() {
            ctx.set_finished(index);
        }
        Ok(result)
    }

    /// Evaluates the merge of `merge.old_windows()` into the context window.
    ///
    /// The node is finished in the merged window only if it was finished in
    /// every merged window; in that case it is not evaluated and
    /// [`MergeResult::AlreadyFinished`] is returned.
    ///
    /// # Errors
    ///
    /// Returns a state error from a node.
    pub fn invoke_merge<W: BoundedWindow>(
        &self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
        merge: &MergeInfo<W>,
    ) -> Result<MergeResult, TriggerError> {
        if merge.finished_in_all(index) {
            ctx.set_finished(index);
            return Ok(MergeResult::AlreadyFinished);
        }
        ctx.clear_finished(index);
        let result = match self.nodes[index].kind {
            NodeKind::Leaf(leaf) => MergeResult::from(leaf.on_merge(index, ctx, merge)?),
            NodeKind::Composite(composite) => composite.on_merge(self, index, ctx, merge)?,
        };
        if result.is_finish() {
            ctx.set_finished(index);
        }
        Ok(result)
    }

    /// Releases every timer and state cell the subtree at `index` owns in the
    /// context window, children first. Finished bits are left alone.
    ///
    /// # Errors
    ///
    /// Returns a state error if a cell cannot be deleted.
    pub fn invoke_clear<W: BoundedWindow>(
        &self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
    ) -> Result<(), TriggerError> {
        for &child in &self.nodes[index].children {
            self.invoke_clear(child, ctx)?;
        }
        if let NodeKind::Leaf(leaf) = self.nodes[index].kind {
            leaf.clear(index, ctx)?;
        }
        let namespace = ctx.node_namespace(index);
        ctx.state_mut().clear_namespace(&namespace)?;
        Ok(())
    }

    /// Clears the subtree at `index` and its finished bits so it runs again
    /// from scratch.
    pub(super) fn reset_subtree<W: BoundedWindow>(
        &self,
        index: usize,
        ctx: &mut TriggerContext<'_, W>,
    ) -> Result<(), TriggerError> {
        self.invoke_clear(index, ctx)?;
        ctx.clear_finished_range(self.subtree(index));
        Ok(())
    }
}
