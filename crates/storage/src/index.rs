//! Ordered key index backing the in-memory backend.
//!
//! [`KeyIndex`] keeps entries in a [`BTreeMap`] keyed on raw bytes, so every
//! walk is lexicographic by byte order. Prefix walks are range scans that
//! stop at the first key outside the prefix.
//!
//! # Listing
//!
//! [`KeyIndex::list`] returns the immediate children of a prefix: keys with
//! no further `/` after the prefix are returned as-is, deeper keys collapse
//! into one `/`-terminated folder marker. Because the walk is ordered, all
//! keys under one marker are contiguous; once a marker is emitted the walk
//! seeks past the whole subtree instead of visiting each key in it.
//!
//! The `after` cursor and `limit` only make sense because of that ordering:
//! a page ends at a stable boundary no matter how many calls it took to get
//! there.

use std::{collections::BTreeMap, ops::Bound};

use bytes::Bytes;

const SEPARATOR: u8 = b'/';

/// Sorted, prefix-addressable key/value map.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    entries: BTreeMap<Bytes, Bytes>,
}

impl KeyIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a key.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.entries.get(key)
    }

    /// Returns `true` if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces a value, returning the previous one.
    pub fn insert(&mut self, key: Bytes, value: Bytes) -> Option<Bytes> {
        self.entries.insert(key, value)
    }

    /// Removes a key, returning its value if it was present.
    pub fn remove(&mut self, key: &[u8]) -> Option<Bytes> {
        self.entries.remove(key)
    }

    /// Iterates, in order, over every entry whose key starts with `prefix`.
    pub fn walk_prefix<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a Bytes, &'a Bytes)> + 'a {
        self.entries
            .range::<[u8], _>((Bound::Included(prefix), Bound::<&[u8]>::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
    }

    /// Lists the immediate children of `prefix`.
    ///
    /// Only children strictly greater than `after` are returned (an empty
    /// `after` means "from the start"), and at most `limit` of them (`0`
    /// means unlimited).
    #[must_use]
    pub fn list(&self, prefix: &[u8], after: &[u8], limit: usize) -> Vec<Bytes> {
        let mut out: Vec<Bytes> = Vec::new();
        // Every key below `prefix + after` would be rejected by the cursor,
        // so the first seek can start there.
        let mut start: Vec<u8> = [prefix, after].concat();

        loop {
            let mut next_start: Option<Vec<u8>> = None;

            let range: (Bound<&[u8]>, Bound<&[u8]>) =
                (Bound::Included(start.as_slice()), Bound::Unbounded);
            for (key, _) in self.entries.range::<[u8], _>(range) {
                if limit > 0 && out.len() >= limit {
                    return out;
                }
                let Some(rest) = key.strip_prefix(prefix) else {
                    return out;
                };

                match rest.iter().position(|&b| b == SEPARATOR) {
                    None => {
                        if after.is_empty() || rest > after {
                            out.push(key.slice(prefix.len()..));
                        }
                    },
                    Some(sep) => {
                        let marker = &rest[..=sep];
                        if after.is_empty() || marker > after {
                            out.push(key.slice(prefix.len()..=prefix.len() + sep));
                        }
                        // Skip the rest of this subtree: every key in it sorts
                        // below the same path with `/` bumped to `0`.
                        let mut skip = Vec::with_capacity(prefix.len() + sep + 1);
                        skip.extend_from_slice(prefix);
                        skip.extend_from_slice(&rest[..sep]);
                        skip.push(SEPARATOR + 1);
                        next_start = Some(skip);
                        break;
                    },
                }
            }

            match next_start {
                Some(skip) => start = skip,
                None => return out,
            }
        }
    }
}

impl FromIterator<(Bytes, Bytes)> for KeyIndex {
    fn from_iter<I: IntoIterator<Item = (Bytes, Bytes)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}
