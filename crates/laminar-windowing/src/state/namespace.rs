//! State namespaces, tags, and their byte encoding.
//!
//! Every cell lives at `[space][namespace][tag id]`:
//!
//! ```text
//! space      'c' (cells) | 'h' (watermark holds)
//! namespace  0x00                                      global
//!            0x01 [len: u16 BE][window key] 0x00       window
//!            0x01 [len: u16 BE][window key] 0x01 [u32] window + trigger node
//! tag id     utf-8 bytes
//! ```
//!
//! The window part is length-prefixed, so all namespaces of one window share
//! the prefix `[space] 0x01 [len][window key]` and can be cleared with a
//! single prefix scan.

use std::fmt;

use super::StateError;
use crate::window::BoundedWindow;

pub(crate) const SPACE_CELLS: u8 = b'c';
pub(crate) const SPACE_HOLDS: u8 = b'h';

const NS_GLOBAL: u8 = 0x00;
const NS_WINDOW: u8 = 0x01;
const SCOPE_WINDOW: u8 = 0x00;
const SCOPE_TRIGGER: u8 = 0x01;

/// Where a state cell lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateNamespace<W> {
    /// Key-wide state.
    Global,
    /// State owned by a window.
    Window(W),
    /// State owned by one trigger node in a window.
    WindowAndTrigger(W, usize),
}

impl<W: BoundedWindow> StateNamespace<W> {
    /// Returns the window this namespace belongs to, if any.
    #[must_use]
    pub fn window(&self) -> Option<&W> {
        match self {
            Self::Global => None,
            Self::Window(w) | Self::WindowAndTrigger(w, _) => Some(w),
        }
    }

    /// Returns the trigger node index, if any.
    #[must_use]
    pub fn trigger_index(&self) -> Option<usize> {
        match self {
            Self::WindowAndTrigger(_, index) => Some(*index),
            _ => None,
        }
    }

    /// Key prefix shared by every cell of this namespace in `space`.
    pub(crate) fn prefix(&self, space: u8) -> Result<Vec<u8>, StateError> {
        match self {
            Self::Global => Ok(vec![space, NS_GLOBAL]),
            Self::Window(window) => {
                let mut prefix = window_prefix(space, window)?;
                prefix.push(SCOPE_WINDOW);
                Ok(prefix)
            }
            Self::WindowAndTrigger(window, index) => {
                let index = u32::try_from(*index).map_err(|_| {
                    StateError::Corruption(format!("trigger index {index} exceeds u32"))
                })?;
                let mut prefix = window_prefix(space, window)?;
                prefix.push(SCOPE_TRIGGER);
                prefix.extend_from_slice(&index.to_be_bytes());
                Ok(prefix)
            }
        }
    }
}

/// Prefix covering every namespace of `window` in `space`.
pub(crate) fn window_prefix<W: BoundedWindow>(space: u8, window: &W) -> Result<Vec<u8>, StateError> {
    let key = window.encode_key();
    let len = u16::try_from(key.len()).map_err(|_| StateError::KeyTooLong(key.len()))?;
    let mut prefix = Vec::with_capacity(4 + key.len() + 5 + 16);
    prefix.push(space);
    prefix.push(NS_WINDOW);
    prefix.extend_from_slice(&len.to_be_bytes());
    prefix.extend_from_slice(&key);
    Ok(prefix)
}

/// Splits what follows a window prefix into the trigger index and tag id.
pub(crate) fn decode_scope(rest: &[u8]) -> Option<(Option<usize>, &[u8])> {
    match rest.split_first()? {
        (&SCOPE_WINDOW, tag) => Some((None, tag)),
        (&SCOPE_TRIGGER, tail) if tail.len() >= 4 => {
            let (index, tag) = tail.split_at(4);
            let index = u32::from_be_bytes(index.try_into().ok()?);
            Some((usize::try_from(index).ok(), tag))
        }
        _ => None,
    }
}

/// How a combining cell folds new input into its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combiner {
    /// Saturating sum
    Sum,
    /// Minimum
    Min,
    /// Maximum
    Max,
}

impl Combiner {
    /// Folds `input` into `accumulated`.
    #[must_use]
    pub fn combine(self, accumulated: i64, input: i64) -> i64 {
        match self {
            Self::Sum => accumulated.saturating_add(input),
            Self::Min => accumulated.min(input),
            Self::Max => accumulated.max(input),
        }
    }
}

/// The shape of a state cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Single overwritable value
    Value,
    /// Append-only list
    Bag,
    /// `i64` folded with a [`Combiner`]
    Combining(Combiner),
    /// Watermark hold; min-combining
    Hold,
}

impl StateKind {
    pub(crate) fn space(self) -> u8 {
        match self {
            Self::Hold => SPACE_HOLDS,
            _ => SPACE_CELLS,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => f.write_str("value"),
            Self::Bag => f.write_str("bag"),
            Self::Combining(c) => write!(f, "combining({c:?})"),
            Self::Hold => f.write_str("hold"),
        }
    }
}

/// Names a cell inside a namespace and fixes its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateTag {
    id: &'static str,
    kind: StateKind,
}

impl StateTag {
    /// A value cell.
    #[must_use]
    pub const fn value(id: &'static str) -> Self {
        Self {
            id,
            kind: StateKind::Value,
        }
    }

    /// A bag cell.
    #[must_use]
    pub const fn bag(id: &'static str) -> Self {
        Self {
            id,
            kind: StateKind::Bag,
        }
    }

    /// A combining cell.
    #[must_use]
    pub const fn combining(id: &'static str, combiner: Combiner) -> Self {
        Self {
            id,
            kind: StateKind::Combining(combiner),
        }
    }

    /// A watermark hold cell.
    #[must_use]
    pub const fn hold(id: &'static str) -> Self {
        Self {
            id,
            kind: StateKind::Hold,
        }
    }

    /// Returns the tag identifier.
    #[must_use]
    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Returns the cell kind.
    #[must_use]
    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub(crate) fn expect_kind(&self, expected: StateKind) -> Result<(), StateError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(StateError::WrongKind {
                tag: self.id,
                expected,
                actual: self.kind,
            })
        }
    }

    /// Combiner used when folding values into this cell.
    pub(crate) fn combiner(&self) -> Result<Combiner, StateError> {
        match self.kind {
            StateKind::Combining(c) => Ok(c),
            StateKind::Hold => Ok(Combiner::Min),
            actual => Err(StateError::WrongKind {
                tag: self.id,
                expected: StateKind::Combining(Combiner::Sum),
                actual,
            }),
        }
    }
}
