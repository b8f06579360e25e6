//! Per-key set of live windows.

use std::collections::BTreeSet;

use fxhash::{FxHashMap, FxHashSet};

use super::{BoundedWindow, MergeGroup, WindowError, WindowFn};

/// Tracks the live windows of one key and maps every window ever assigned to
/// the live window that currently represents it.
///
/// For non-merging window functions every window is its own representative
/// and nothing is tracked. For merging functions, [`merge`](Self::merge)
/// replaces groups of live windows by their merge result and re-points every
/// window that resolved to a merged-away window, so a lookup is always one
/// map access.
#[derive(Debug)]
pub struct ActiveWindowSet<W: BoundedWindow> {
    inner: Inner<W>,
}

#[derive(Debug)]
enum Inner<W: BoundedWindow> {
    NonMerging,
    Merging {
        /// Live windows, ordered for deterministic merging
        live: BTreeSet<W>,
        /// Live windows added since the last merge
        pending_new: FxHashSet<W>,
        /// Merged-away window -> live representative
        merged_into: FxHashMap<W, W>,
    },
}

impl<W: BoundedWindow> ActiveWindowSet<W> {
    /// Creates the identity set used by non-merging window functions.
    #[must_use]
    pub fn non_merging() -> Self {
        Self {
            inner: Inner::NonMerging,
        }
    }

    /// Creates a set that tracks live windows and merges.
    #[must_use]
    pub fn merging() -> Self {
        Self {
            inner: Inner::Merging {
                live: BTreeSet::new(),
                pending_new: FxHashSet::default(),
                merged_into: FxHashMap::default(),
            },
        }
    }

    /// Creates the set appropriate for `window_fn`.
    #[must_use]
    pub fn for_window_fn<F>(window_fn: &F) -> Self
    where
        F: WindowFn<W> + ?Sized,
    {
        if window_fn.is_non_merging() {
            Self::non_merging()
        } else {
            Self::merging()
        }
    }

    /// Returns true if this set tracks merges.
    #[must_use]
    pub fn is_merging(&self) -> bool {
        matches!(self.inner, Inner::Merging { .. })
    }

    /// Marks `window` as live.
    ///
    /// A window already represented by a live window (itself or a merge
    /// result) is left alone. Returns `true` if the window became live.
    pub fn add_active(&mut self, window: W) -> bool {
        match &mut self.inner {
            Inner::NonMerging => false,
            Inner::Merging {
                live,
                pending_new,
                merged_into,
            } => {
                if live.contains(&window) || merged_into.contains_key(&window) {
                    return false;
                }
                pending_new.insert(window.clone());
                live.insert(window);
                true
            }
        }
    }

    /// Returns true if `window` is live.
    ///
    /// Always true for non-merging sets.
    #[must_use]
    pub fn is_active(&self, window: &W) -> bool {
        match &self.inner {
            Inner::NonMerging => true,
            Inner::Merging { live, .. } => live.contains(window),
        }
    }

    /// Returns the live window that represents `window`.
    ///
    /// Returns `None` for a window of a merging set that was never added or
    /// has been removed.
    #[must_use]
    pub fn representative(&self, window: &W) -> Option<W> {
        match &self.inner {
            Inner::NonMerging => Some(window.clone()),
            Inner::Merging {
                live, merged_into, ..
            } => {
                if live.contains(window) {
                    Some(window.clone())
                } else {
                    merged_into.get(window).cloned()
                }
            }
        }
    }

    /// Returns the live windows in ascending order.
    ///
    /// Empty for non-merging sets, which do not track windows.
    #[must_use]
    pub fn active_windows(&self) -> Vec<W> {
        match &self.inner {
            Inner::NonMerging => Vec::new(),
            Inner::Merging { live, .. } => live.iter().cloned().collect(),
        }
    }

    /// Returns the number of live windows.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.inner {
            Inner::NonMerging => 0,
            Inner::Merging { live, .. } => live.len(),
        }
    }

    /// Returns true if no window is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets `window` and every mapping that resolves to it.
    pub fn remove(&mut self, window: &W) {
        if let Inner::Merging {
            live,
            pending_new,
            merged_into,
        } = &mut self.inner
        {
            live.remove(window);
            pending_new.remove(window);
            merged_into.remove(window);
            merged_into.retain(|_, rep| rep != window);
        }
    }

    /// Merges live windows as decided by `window_fn`.
    ///
    /// For each non-trivial merge group, `on_merge` receives the windows being
    /// merged, the subset of them that was live before the windows added since
    /// the previous merge, and the merge result. The set is updated before the
    /// callback runs. Returns the number of groups merged.
    ///
    /// # Errors
    ///
    /// Returns `WindowError::NotActive` if the window function names a window
    /// that is not live, in which case nothing is changed. Errors from the
    /// window function or the callback are propagated.
    pub fn merge<F, C, E>(&mut self, window_fn: &F, mut on_merge: C) -> Result<usize, E>
    where
        F: WindowFn<W> + ?Sized,
        C: FnMut(&[W], &[W], &W) -> Result<(), E>,
        E: From<WindowError>,
    {
        let Inner::Merging {
            live,
            pending_new,
            merged_into,
        } = &mut self.inner
        else {
            return Ok(0);
        };

        let snapshot: Vec<W> = live.iter().cloned().collect();
        let groups: Vec<MergeGroup<W>> = window_fn
            .merge_windows(&snapshot)?
            .into_iter()
            .filter(|g| !is_trivial(g))
            .collect();

        // Validate everything before touching the set
        for group in &groups {
            if let Some(missing) = group.to_merge.iter().find(|w| !live.contains(*w)) {
                return Err(WindowError::NotActive(format!("{missing:?}")).into());
            }
        }

        let mut merged = 0;
        for group in groups {
            let previously_active: Vec<W> = group
                .to_merge
                .iter()
                .filter(|w| !pending_new.contains(*w))
                .cloned()
                .collect();

            for window in &group.to_merge {
                live.remove(window);
                pending_new.remove(window);
            }
            live.insert(group.result.clone());

            // Flatten: anything that pointed at a merged-away window now
            // points straight at the result
            for rep in merged_into.values_mut() {
                if group.to_merge.contains(rep) {
                    *rep = group.result.clone();
                }
            }
            for window in &group.to_merge {
                if *window != group.result {
                    merged_into.insert(window.clone(), group.result.clone());
                }
            }
            merged_into.remove(&group.result);

            tracing::debug!(
                merged = ?group.to_merge,
                result = ?group.result,
                "merged windows"
            );
            on_merge(&group.to_merge, &previously_active, &group.result)?;
            merged += 1;
        }

        pending_new.clear();
        Ok(merged)
    }
}

fn is_trivial<W: BoundedWindow>(group: &MergeGroup<W>) -> bool {
    match group.to_merge.as_slice() {
        [] => true,
        [only] => *only == group.result,
        _ => false,
    }
}
