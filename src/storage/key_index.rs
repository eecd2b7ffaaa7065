//! In-memory key index with exact and prefix search.
//!
//! Entries keep the archive's file order; ordinals are positions in that order.
//! A second array holds the ordinals sorted by (folded key, ordinal), which turns
//! exact and prefix queries into two binary searches each. Keys are folded on the
//! fly during the search, so no folded copy of the key set is kept.
//!
//! # Examples
//!
//! ```
//! use mdict_archive::storage::key_block::KeyEntry;
//! use mdict_archive::storage::key_index::KeyIndex;
//! use mdict_archive::utils::KeyFolding;
//!
//! let entries = vec![
//!     KeyEntry { key: "apple".into(), record_offset: 0 },
//!     KeyEntry { key: "apply".into(), record_offset: 6 },
//!     KeyEntry { key: "Apple".into(), record_offset: 13 },
//! ];
//! let folding = KeyFolding { fold_case: true, ..KeyFolding::EXACT };
//! let index = KeyIndex::build(entries, folding);
//! assert_eq!(index.exact("APPLE"), vec![0, 2]);
//! assert_eq!(index.prefix("app"), vec![0, 1, 2]);
//! ```

use std::borrow::Cow;
use std::ops::Range;

use crate::storage::key_block::KeyEntry;
use crate::utils::key_fold::KeyFolding;

/// Ordered key entries plus the sorted view used for searching.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    entries: Vec<KeyEntry>,
    sorted: Vec<usize>,
    /// Distinct record offsets in ascending order
    record_starts: Vec<u64>,
    folding: KeyFolding,
}

impl KeyIndex {
    /// Builds the index over `entries`, which must be in file order.
    pub fn build(entries: Vec<KeyEntry>, folding: KeyFolding) -> Self {
        let mut sorted: Vec<usize> = (0..entries.len()).collect();
        sorted.sort_by_cached_key(|&i| (folding.fold(&entries[i].key).into_owned(), i));

        let mut record_starts: Vec<u64> = entries.iter().map(|e| e.record_offset).collect();
        record_starts.sort_unstable();
        record_starts.dedup();

        Self { entries, sorted, record_starts, folding }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, ordinal: usize) -> Option<&KeyEntry> {
        self.entries.get(ordinal)
    }

    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }

    pub fn folding(&self) -> KeyFolding {
        self.folding
    }

    fn folded(&self, ordinal: usize) -> Cow<'_, str> {
        self.folding.fold(&self.entries[ordinal].key)
    }

    fn exact_range(&self, folded: &str) -> Range<usize> {
        let start = self.sorted.partition_point(|&i| self.folded(i).as_ref() < folded);
        let end = start + self.sorted[start..].partition_point(|&i| self.folded(i).as_ref() == folded);
        start..end
    }

    fn prefix_range(&self, folded: &str) -> Range<usize> {
        let start = self.sorted.partition_point(|&i| self.folded(i).as_ref() < folded);
        let end = start + self.sorted[start..].partition_point(|&i| self.folded(i).starts_with(folded));
        start..end
    }

    fn ordinals_in_file_order(&self, range: Range<usize>) -> Vec<usize> {
        let mut ordinals = self.sorted[range].to_vec();
        ordinals.sort_unstable();
        ordinals
    }

    /// Ordinals of every entry whose folded key equals the folded `key`, in file order.
    pub fn exact(&self, key: &str) -> Vec<usize> {
        let folded = self.folding.fold(key);
        // equal keys are already sorted by ordinal
        self.sorted[self.exact_range(&folded)].to_vec()
    }

    /// Ordinals of every entry whose folded key starts with the folded `prefix`, in file order.
    pub fn prefix(&self, prefix: &str) -> Vec<usize> {
        let folded = self.folding.fold(prefix);
        if folded.is_empty() {
            return (0..self.entries.len()).collect();
        }
        self.ordinals_in_file_order(self.prefix_range(&folded))
    }

    /// First entry matching `key` exactly, if any.
    pub fn first(&self, key: &str) -> Option<usize> {
        let folded = self.folding.fold(key);
        let range = self.exact_range(&folded);
        if range.is_empty() { None } else { Some(self.sorted[range.start]) }
    }

    /// The smallest distinct record offset greater than `offset`, i.e. where the
    /// record starting at `offset` ends. `None` for the last record.
    pub fn next_record_start(&self, offset: u64) -> Option<u64> {
        let pos = self.record_starts.partition_point(|&start| start <= offset);
        self.record_starts.get(pos).copied()
    }
}
