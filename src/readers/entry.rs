//! Lazily resolved entries returned by prefix lookups and full iteration.
//!
//! An [`EntryRef`] names one key entry. Its record is only read and decoded when
//! [`EntryRef::resolve`] is called, so iterating millions of keys costs no record
//! block decoding at all.

use std::fmt;
use std::io::{Read, Seek};
use std::ops::Range;

use super::archive::Archive;
use crate::Result;

/// A resolved record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    /// Definition text from an `.mdx` archive
    Text(String),
    /// Resource bytes from an `.mdd` archive
    Binary(Vec<u8>),
}

impl RecordValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RecordValue::Text(text) => Some(text),
            RecordValue::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RecordValue::Text(text) => text.as_bytes(),
            RecordValue::Binary(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RecordValue::Text(text) => text.into_bytes(),
            RecordValue::Binary(bytes) => bytes,
        }
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordValue::Text(text) => f.write_str(text),
            RecordValue::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// One key entry of an open archive.
pub struct EntryRef<'a, R: Read + Seek + Send> {
    archive: &'a Archive<R>,
    ordinal: usize,
}

impl<'a, R: Read + Seek + Send> EntryRef<'a, R> {
    pub(crate) fn new(archive: &'a Archive<R>, ordinal: usize) -> Self {
        Self { archive, ordinal }
    }

    /// Position of the entry in file order.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn key(&self) -> &'a str {
        self.archive.entry_key(self.ordinal)
    }

    pub fn record_offset(&self) -> u64 {
        self.archive.entry_record_offset(self.ordinal)
    }

    /// Reads and decodes the entry's record.
    pub fn resolve(&self) -> Result<RecordValue> {
        self.archive.resolve(self.ordinal)
    }
}

impl<R: Read + Seek + Send> Clone for EntryRef<'_, R> {
    fn clone(&self) -> Self {
        Self { archive: self.archive, ordinal: self.ordinal }
    }
}

impl<R: Read + Seek + Send> fmt::Debug for EntryRef<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRef")
            .field("ordinal", &self.ordinal)
            .field("key", &self.key())
            .field("record_offset", &self.record_offset())
            .finish()
    }
}

enum Ordinals {
    All(Range<usize>),
    Matches(std::vec::IntoIter<usize>),
}

/// Iterator over entries in file order.
pub struct EntryIter<'a, R: Read + Seek + Send> {
    archive: &'a Archive<R>,
    ordinals: Ordinals,
}

impl<'a, R: Read + Seek + Send> EntryIter<'a, R> {
    pub(crate) fn all(archive: &'a Archive<R>, count: usize) -> Self {
        Self { archive, ordinals: Ordinals::All(0..count) }
    }

    pub(crate) fn matches(archive: &'a Archive<R>, ordinals: Vec<usize>) -> Self {
        Self { archive, ordinals: Ordinals::Matches(ordinals.into_iter()) }
    }
}

impl<'a, R: Read + Seek + Send> Iterator for EntryIter<'a, R> {
    type Item = EntryRef<'a, R>;

    fn next(&mut self) -> Option<Self::Item> {
        let ordinal = match &mut self.ordinals {
            Ordinals::All(range) => range.next(),
            Ordinals::Matches(iter) => iter.next(),
        }?;
        Some(EntryRef::new(self.archive, ordinal))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.ordinals {
            Ordinals::All(range) => range.size_hint(),
            Ordinals::Matches(iter) => iter.size_hint(),
        }
    }
}

impl<R: Read + Seek + Send> ExactSizeIterator for EntryIter<'_, R> {}
