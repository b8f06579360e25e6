//! # State Module
//!
//! Key-value storage for per-key trigger state and watermark holds.
//!
//! ## Layers
//!
//! - **[`StateStore`]**: byte-oriented, ordered key-value store. Any backend
//!   that supports point access and ordered prefix scans can back a key.
//! - **[`InMemoryStore`]**: `BTreeMap`-based default backend.
//! - **[`StateInternals`]**: typed cells addressed by a [`StateNamespace`]
//!   (global, window, or window plus trigger node) and a [`StateTag`].
//!
//! ## Example
//!
//! ```rust
//! use laminar_windowing::state::{InMemoryStore, StateStore, StateStoreExt};
//!
//! let mut store = InMemoryStore::new();
//!
//! store.put(b"pane:1", b"early").unwrap();
//! assert_eq!(store.get(b"pane:1").unwrap().as_ref(), b"early");
//!
//! // Typed state access (requires StateStoreExt)
//! store.put_typed(b"count", &42i64).unwrap();
//! let count: i64 = store.get_typed(b"count").unwrap().unwrap();
//! assert_eq!(count, 42);
//! ```

use bytes::Bytes;
use rkyv::{
    api::high::{HighDeserializer, HighSerializer, HighValidator},
    bytecheck::CheckBytes,
    rancor::Error as RkyvError,
    ser::allocator::ArenaHandle,
    util::AlignedVec,
    Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize,
};
use std::collections::BTreeMap;
use std::ops::Bound;

mod internals;
mod namespace;

pub use internals::{StateAddress, StateInternals};
pub use namespace::{Combiner, StateKind, StateNamespace, StateTag};

/// Lexicographic successor of a byte prefix, used as the exclusive upper
/// bound of a prefix scan.
///
/// Returns `None` if no successor exists (empty prefix or all bytes 0xFF).
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    if prefix.is_empty() {
        return None;
    }
    let mut successor = prefix.to_vec();
    while let Some(last) = successor.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(successor);
        }
        successor.pop();
    }
    None
}

/// Ordered byte key-value store backing the state of one key.
///
/// Stores are `Send` but not `Sync`: a key is evaluated by one thread at a
/// time and never shares its store.
///
/// The trait is dyn-compatible so a runner can hold a `Box<dyn StateStore>`.
/// Generic typed access lives in [`StateStoreExt`].
pub trait StateStore: Send {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Option<Bytes>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the backend rejects the write.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError>;

    /// Delete a key. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the backend rejects the delete.
    fn delete(&mut self, key: &[u8]) -> Result<(), StateError>;

    /// Scan all keys with a given prefix, in lexicographic order.
    fn prefix_scan<'a>(&'a self, prefix: &'a [u8])
        -> Box<dyn Iterator<Item = (Bytes, Bytes)> + 'a>;

    /// Approximate size of keys and values in bytes.
    fn size_bytes(&self) -> usize;

    /// Number of entries in the store.
    fn len(&self) -> usize;

    /// Check if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Typed access on top of [`StateStore`], serialized with rkyv.
pub trait StateStoreExt: StateStore {
    /// Get a value and deserialize it.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Serialization` if the stored bytes do not
    /// validate as a `T`.
    fn get_typed<T>(&self, key: &[u8]) -> Result<Option<T>, StateError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, RkyvError>>
            + RkyvDeserialize<T, HighDeserializer<RkyvError>>,
    {
        match self.get(key) {
            Some(bytes) => {
                let archived = rkyv::access::<T::Archived, RkyvError>(&bytes)
                    .map_err(|e| StateError::Serialization(e.to_string()))?;
                let value = rkyv::deserialize::<T, RkyvError>(archived)
                    .map_err(|e| StateError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serialize and store a value.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Serialization` if serialization fails.
    fn put_typed<T>(&mut self, key: &[u8], value: &T) -> Result<(), StateError>
    where
        T: for<'a> RkyvSerialize<HighSerializer<AlignedVec, ArenaHandle<'a>, RkyvError>>,
    {
        let bytes = rkyv::to_bytes::<RkyvError>(value)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        self.put(key, &bytes)
    }

}

impl<T: StateStore + ?Sized> StateStoreExt for T {}

/// In-memory state store using `BTreeMap` for sorted key access.
///
/// Prefix scans are `O(log n + k)`, which keeps clearing a window namespace
/// proportional to the state the window owns.
#[derive(Debug)]
pub struct InMemoryStore {
    data: BTreeMap<Vec<u8>, Bytes>,
    /// Running total of key and value bytes
    size_bytes: usize,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            size_bytes: 0,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for InMemoryStore {
    #[inline]
    fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.data.get(key).cloned()
    }

    #[inline]
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        let value_bytes = Bytes::copy_from_slice(value);

        match self.data.entry(key.to_vec()) {
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                self.size_bytes -= entry.get().len();
                self.size_bytes += value.len();
                *entry.get_mut() = value_bytes;
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                self.size_bytes += key.len() + value.len();
                entry.insert(value_bytes);
            }
        }
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StateError> {
        if let Some(old_value) = self.data.remove(key) {
            self.size_bytes -= key.len() + old_value.len();
        }
        Ok(())
    }

    fn prefix_scan<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> Box<dyn Iterator<Item = (Bytes, Bytes)> + 'a> {
        let upper = match prefix_successor(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        Box::new(
            self.data
                .range::<[u8], _>((Bound::Included(prefix), upper.as_ref().map(Vec::as_slice)))
                .map(|(k, v)| (Bytes::copy_from_slice(k), v.clone())),
        )
    }

    fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    fn len(&self) -> usize {
        self.data.len()
    }

}

/// Errors that can occur in state operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes do not have the layout a cell expects
    #[error("Corruption error: {0}")]
    Corruption(String),

    /// A window key longer than the namespace encoding allows
    #[error("Window key too long: {0} bytes")]
    KeyTooLong(usize),

    /// A cell was accessed through a tag of a different kind
    #[error("Tag {tag} is a {actual} cell, not a {expected} cell")]
    WrongKind {
        /// Tag identifier
        tag: &'static str,
        /// Kind the operation needs
        expected: StateKind,
        /// Kind the tag declares
        actual: StateKind,
    },

    /// State left behind after a window was cleared
    #[error("Residual state for window {window}: {tags:?}")]
    ResidualState {
        /// Window that was cleared
        window: String,
        /// Tags still in use
        tags: Vec<String>,
    },
}

impl StateError {
    /// Returns true if this error signals a broken internal invariant.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::ResidualState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store_basic() {
        let mut store = InMemoryStore::new();

        store.put(b"pane", b"early").unwrap();
        assert_eq!(store.get(b"pane").unwrap(), Bytes::from("early"));
        assert_eq!(store.len(), 1);

        store.put(b"pane", b"on_time").unwrap();
        assert_eq!(store.get(b"pane").unwrap(), Bytes::from("on_time"));
        assert_eq!(store.len(), 1);

        store.delete(b"pane").unwrap();
        assert!(store.get(b"pane").is_none());
        assert!(store.is_empty());

        // Deleting a missing key is fine
        store.delete(b"missing").unwrap();
    }

    #[test]
    fn test_prefix_scan_is_bounded_and_sorted() {
        let mut store = InMemoryStore::new();
        store.put(&[0x01, 0x02, 0xBB], b"b").unwrap();
        store.put(&[0x01, 0x02, 0xAA], b"a").unwrap();
        store.put(&[0x01, 0x03, 0xCC], b"c").unwrap();
        store.put(&[0x02, 0x02, 0xDD], b"d").unwrap();

        let keys: Vec<_> = store
            .prefix_scan(&[0x01, 0x02])
            .map(|(k, _)| k.to_vec())
            .collect();
        assert_eq!(keys, vec![vec![0x01, 0x02, 0xAA], vec![0x01, 0x02, 0xBB]]);

        assert_eq!(store.prefix_scan(&[]).count(), 4);
        assert_eq!(store.prefix_scan(&[0xFF, 0xFF]).count(), 0);
    }

    #[test]
    fn test_typed_access() {
        let mut store = InMemoryStore::new();

        store.put_typed(b"count", &7i64).unwrap();
        let count: i64 = store.get_typed(b"count").unwrap().unwrap();
        assert_eq!(count, 7);

        let bag = vec![1i64, 2, 3];
        store.put_typed(b"bag", &bag).unwrap();
        let restored: Vec<i64> = store.get_typed(b"bag").unwrap().unwrap();
        assert_eq!(restored, bag);

        let missing: Option<i64> = store.get_typed(b"missing").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_size_tracking() {
        let mut store = InMemoryStore::new();
        store.put(b"key1", b"value1").unwrap();
        assert_eq!(store.size_bytes(), 10);
        store.put(b"key1", b"v1").unwrap();
        assert_eq!(store.size_bytes(), 6);
        store.delete(b"key1").unwrap();
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_successor(b""), None);
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_successor(&[0x01, 0xFF]), Some(vec![0x02]));
    }
}
