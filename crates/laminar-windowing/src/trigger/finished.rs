//! Per-window finished bits.

use std::ops::Range;

use smallvec::{smallvec, SmallVec};

/// One bit per trigger node, addressed by pre-order index.
///
/// Sized once from the trigger tree. Trees with up to 128 nodes stay inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedBits {
    words: SmallVec<[u64; 2]>,
    len: usize,
}

impl FinishedBits {
    /// Creates `len` cleared bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: smallvec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Number of bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if there are no bits at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns bit `index`. Out-of-range bits read as unset.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Sets bit `index`. Out-of-range indices are ignored.
    #[inline]
    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.words[index / 64] |= 1 << (index % 64);
        }
    }

    /// Clears bit `index`.
    #[inline]
    pub fn clear(&mut self, index: usize) {
        if index < self.len {
            self.words[index / 64] &= !(1 << (index % 64));
        }
    }

    /// Clears every bit in `range`.
    pub fn clear_range(&mut self, range: Range<usize>) {
        for index in range.start..range.end.min(self.len) {
            self.clear(index);
        }
    }

    /// Returns true if any bit is set.
    #[must_use]
    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
