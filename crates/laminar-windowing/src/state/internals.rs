//! Typed, namespaced state cells on top of a [`StateStore`].

use std::fmt;
use std::marker::PhantomData;

use rkyv::{
    api::high::{HighDeserializer, HighSerializer, HighValidator},
    bytecheck::CheckBytes,
    rancor::Error as RkyvError,
    ser::allocator::ArenaHandle,
    util::AlignedVec,
    Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize,
};

use super::namespace::{decode_scope, window_prefix, SPACE_CELLS, SPACE_HOLDS};
use super::{InMemoryStore, StateError, StateKind, StateNamespace, StateStore, StateStoreExt, StateTag};
use crate::window::BoundedWindow;

/// A cell that is in use for a window, as reported by
/// [`StateInternals::tags_in_use_for_window`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateAddress {
    /// Trigger node owning the cell, or `None` for window-level state
    pub trigger_index: Option<usize>,
    /// Tag id of the cell
    pub tag: String,
}

impl fmt::Display for StateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.trigger_index {
            Some(index) => write!(f, "node[{index}]/{}", self.tag),
            None => write!(f, "window/{}", self.tag),
        }
    }
}

/// Namespaced state of one key.
///
/// All cells of a window, including the cells of every trigger node in that
/// window and its watermark holds, can be dropped with
/// [`clear_window`](Self::clear_window).
pub struct StateInternals<W> {
    store: Box<dyn StateStore>,
    _window: PhantomData<fn() -> W>,
}

impl<W> fmt::Debug for StateInternals<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateInternals")
            .field("entries", &self.store.len())
            .field("size_bytes", &self.store.size_bytes())
            .finish()
    }
}

impl<W: BoundedWindow> Default for StateInternals<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: BoundedWindow> StateInternals<W> {
    /// Creates state backed by an [`InMemoryStore`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(Box::new(InMemoryStore::new()))
    }

    /// Creates state backed by `store`.
    #[must_use]
    pub fn with_store(store: Box<dyn StateStore>) -> Self {
        Self {
            store,
            _window: PhantomData,
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    fn key(namespace: &StateNamespace<W>, tag: &StateTag) -> Result<Vec<u8>, StateError> {
        let mut key = namespace.prefix(tag.kind().space())?;
        key.extend_from_slice(tag.id().as_bytes());
        Ok(key)
    }

    /// Reads a value cell.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the tag is not a value tag or the stored bytes
    /// do not decode.
    pub fn read_value<T>(
        &self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
    ) -> Result<Option<T>, StateError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, RkyvError>>
            + RkyvDeserialize<T, HighDeserializer<RkyvError>>,
    {
        tag.expect_kind(StateKind::Value)?;
        self.store.get_typed(&Self::key(namespace, tag)?)
    }

    /// Overwrites a value cell.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the tag is not a value tag or the write fails.
    pub fn write_value<T>(
        &mut self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
        value: &T,
    ) -> Result<(), StateError>
    where
        T: for<'a> RkyvSerialize<HighSerializer<AlignedVec, ArenaHandle<'a>, RkyvError>>,
    {
        tag.expect_kind(StateKind::Value)?;
        self.store.put_typed(&Self::key(namespace, tag)?, value)
    }

    /// Reads a bag cell. A missing bag reads as empty.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the tag is not a bag tag or the stored bytes
    /// do not decode.
    pub fn read_bag<T>(
        &self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
    ) -> Result<Vec<T>, StateError>
    where
        Vec<T>: Archive,
        <Vec<T> as Archive>::Archived: for<'a> CheckBytes<HighValidator<'a, RkyvError>>
            + RkyvDeserialize<Vec<T>, HighDeserializer<RkyvError>>,
    {
        tag.expect_kind(StateKind::Bag)?;
        Ok(self
            .store
            .get_typed::<Vec<T>>(&Self::key(namespace, tag)?)?
            .unwrap_or_default())
    }

    /// Appends to a bag cell.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the tag is not a bag tag or the bag cannot be
    /// read back or written.
    pub fn add_to_bag<T>(
        &mut self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
        item: T,
    ) -> Result<(), StateError>
    where
        Vec<T>: Archive
            + for<'a> RkyvSerialize<HighSerializer<AlignedVec, ArenaHandle<'a>, RkyvError>>,
        <Vec<T> as Archive>::Archived: for<'a> CheckBytes<HighValidator<'a, RkyvError>>
            + RkyvDeserialize<Vec<T>, HighDeserializer<RkyvError>>,
    {
        let mut bag = self.read_bag::<T>(namespace, tag)?;
        bag.push(item);
        self.store.put_typed(&Self::key(namespace, tag)?, &bag)
    }

    /// Reads a combining cell.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the tag is not a combining tag or the stored
    /// bytes do not decode.
    pub fn read_combining(
        &self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
    ) -> Result<Option<i64>, StateError> {
        tag.combiner()?;
        self.read_i64(namespace, tag)
    }

    /// Folds `input` into a combining cell and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the tag is not a combining tag or the cell
    /// cannot be read or written.
    pub fn add_combining(
        &mut self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
        input: i64,
    ) -> Result<i64, StateError> {
        let combiner = tag.combiner()?;
        let value = match self.read_i64(namespace, tag)? {
            Some(current) => combiner.combine(current, input),
            None => input,
        };
        self.store.put_typed(&Self::key(namespace, tag)?, &value)?;
        Ok(value)
    }

    /// Adds a watermark hold at `timestamp`; the cell keeps the earliest.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the tag is not a hold tag or the write fails.
    pub fn add_hold(
        &mut self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
        timestamp: i64,
    ) -> Result<i64, StateError> {
        tag.expect_kind(StateKind::Hold)?;
        self.add_combining(namespace, tag, timestamp)
    }

    /// Reads a watermark hold.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the tag is not a hold tag or the stored bytes
    /// do not decode.
    pub fn read_hold(
        &self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
    ) -> Result<Option<i64>, StateError> {
        tag.expect_kind(StateKind::Hold)?;
        self.read_i64(namespace, tag)
    }

    /// Returns the earliest watermark hold across the whole key.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Serialization` if a hold does not decode.
    pub fn earliest_hold(&self) -> Result<Option<i64>, StateError> {
        let mut earliest: Option<i64> = None;
        for (_, value) in self.store.prefix_scan(&[SPACE_HOLDS]) {
            let hold = decode_i64(&value)?;
            earliest = Some(earliest.map_or(hold, |e| e.min(hold)));
        }
        Ok(earliest)
    }

    /// Folds the cells of `sources` into `target` with the tag's combiner and
    /// clears the sources. Returns the merged value, if any source or the
    /// target had one.
    ///
    /// Works for combining and hold tags.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the tag has no combiner or a cell cannot be
    /// read, written, or deleted.
    pub fn merge_into(
        &mut self,
        tag: &StateTag,
        sources: &[StateNamespace<W>],
        target: &StateNamespace<W>,
    ) -> Result<Option<i64>, StateError> {
        let combiner = tag.combiner()?;
        let mut merged = self.read_i64(target, tag)?;
        for source in sources.iter().filter(|ns| *ns != target) {
            if let Some(value) = self.read_i64(source, tag)? {
                merged = Some(merged.map_or(value, |m| combiner.combine(m, value)));
                self.store.delete(&Self::key(source, tag)?)?;
            }
        }
        if let Some(value) = merged {
            self.store.put_typed(&Self::key(target, tag)?, &value)?;
        }
        Ok(merged)
    }

    /// Deletes a single cell.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the delete fails.
    pub fn clear_cell(
        &mut self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
    ) -> Result<(), StateError> {
        self.store.delete(&Self::key(namespace, tag)?)
    }

    /// Deletes every cell and hold in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if a delete fails.
    pub fn clear_namespace(&mut self, namespace: &StateNamespace<W>) -> Result<usize, StateError> {
        let mut cleared = 0;
        for space in [SPACE_CELLS, SPACE_HOLDS] {
            cleared += self.delete_prefix(&namespace.prefix(space)?)?;
        }
        Ok(cleared)
    }

    /// Deletes every cell and hold of `window`, across all its namespaces.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if a delete fails.
    pub fn clear_window(&mut self, window: &W) -> Result<usize, StateError> {
        let mut cleared = 0;
        for space in [SPACE_CELLS, SPACE_HOLDS] {
            cleared += self.delete_prefix(&window_prefix(space, window)?)?;
        }
        if cleared > 0 {
            tracing::trace!(?window, cleared, "cleared window state");
        }
        Ok(cleared)
    }

    /// Returns the tag ids in use in exactly `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the namespace cannot be encoded.
    pub fn tags_in_use(&self, namespace: &StateNamespace<W>) -> Result<Vec<String>, StateError> {
        let mut tags = Vec::new();
        for space in [SPACE_CELLS, SPACE_HOLDS] {
            let prefix = namespace.prefix(space)?;
            for (key, _) in self.store.prefix_scan(&prefix) {
                tags.push(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
            }
        }
        Ok(tags)
    }

    /// Returns every cell in use for `window`, in any of its namespaces.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Corruption` if a key under the window prefix is
    /// malformed.
    pub fn tags_in_use_for_window(&self, window: &W) -> Result<Vec<StateAddress>, StateError> {
        let mut in_use = Vec::new();
        for space in [SPACE_CELLS, SPACE_HOLDS] {
            let prefix = window_prefix(space, window)?;
            for (key, _) in self.store.prefix_scan(&prefix) {
                let (trigger_index, tag) = decode_scope(&key[prefix.len()..]).ok_or_else(|| {
                    StateError::Corruption(format!("malformed state key {key:?}"))
                })?;
                in_use.push(StateAddress {
                    trigger_index,
                    tag: String::from_utf8_lossy(tag).into_owned(),
                });
            }
        }
        Ok(in_use)
    }

    /// Total number of cells and holds of the key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if the key holds no state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn read_i64(
        &self,
        namespace: &StateNamespace<W>,
        tag: &StateTag,
    ) -> Result<Option<i64>, StateError> {
        match self.store.get(&Self::key(namespace, tag)?) {
            Some(bytes) => decode_i64(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn delete_prefix(&mut self, prefix: &[u8]) -> Result<usize, StateError> {
        let keys: Vec<_> = self.store.prefix_scan(prefix).map(|(k, _)| k).collect();
        for key in &keys {
            self.store.delete(key)?;
        }
        Ok(keys.len())
    }
}

fn decode_i64(bytes: &[u8]) -> Result<i64, StateError> {
    let archived = rkyv::access::<<i64 as Archive>::Archived, RkyvError>(bytes)
        .map_err(|e| StateError::Serialization(e.to_string()))?;
    rkyv::deserialize::<i64, RkyvError>(archived)
        .map_err(|e| StateError::Serialization(e.to_string()))
}
