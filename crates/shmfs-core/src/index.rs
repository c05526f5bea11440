// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Ordered unique-key index and the cursor type used by listing iterators.

use std::borrow::Borrow;
use std::collections::btree_map::{self, BTreeMap};
use std::ops::Bound;

use crate::error::{FsError, FsResult};

/// Ordered map that refuses duplicate keys.
#[derive(Debug, Clone)]
pub struct OrderedIndex<K, V> {
    entries: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for OrderedIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> OrderedIndex<K, V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn find_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get_mut(key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Insert a new entry; an existing key is left untouched.
    pub fn insert(&mut self, key: K, value: V) -> FsResult<()> {
        match self.entries.entry(key) {
            btree_map::Entry::Occupied(_) => Err(FsError::AlreadyExists),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.remove(key)
    }

    pub fn leftmost(&self) -> Option<(&K, &V)> {
        self.entries.iter().next()
    }

    /// First entry strictly after `key`, whether or not `key` is present.
    pub fn next<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries
            .range::<Q, _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, K, V> {
        self.entries.iter()
    }

    pub fn values(&self) -> btree_map::Values<'_, K, V> {
        self.entries.values()
    }
}

/// Position inside an [`OrderedIndex`] that survives removal of the entry it
/// points at, provided the owner calls [`Cursor::entry_removed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor<K> {
    /// At whichever entry is leftmost when the cursor is read
    Start,
    /// At the entry with this key
    At(K),
    /// Past the last entry
    End,
}

impl<K: Ord + Clone> Cursor<K> {
    /// Entry the cursor targets, if any.
    pub fn get<'a, V>(&self, index: &'a OrderedIndex<K, V>) -> Option<(&'a K, &'a V)> {
        match self {
            Cursor::Start => index.leftmost(),
            Cursor::At(key) => index.entries.get_key_value(key),
            Cursor::End => None,
        }
    }

    /// Step to the entry after the current one.
    pub fn advance<V>(&mut self, index: &OrderedIndex<K, V>) {
        let next = match self {
            Cursor::Start => index.leftmost().and_then(|(key, _)| index.next(key)),
            Cursor::At(key) => index.next(key),
            Cursor::End => None,
        };
        *self = match next {
            Some((key, _)) => Cursor::At(key.clone()),
            None => Cursor::End,
        };
    }

    /// Pin a `Start` cursor to the current leftmost key.
    pub fn settle<V>(&mut self, index: &OrderedIndex<K, V>) {
        if let Cursor::Start = self {
            *self = match index.leftmost() {
                Some((key, _)) => Cursor::At(key.clone()),
                None => Cursor::End,
            };
        }
    }

    /// Move off `removed` if the cursor targets it. Works whether `removed`
    /// is still in `index` or has already been taken out.
    pub fn entry_removed<V>(&mut self, index: &OrderedIndex<K, V>, removed: &K) {
        if let Cursor::At(key) = self {
            if key == removed {
                *self = match index.next(removed) {
                    Some((key, _)) => Cursor::At(key.clone()),
                    None => Cursor::End,
                };
            }
        }
    }
}
