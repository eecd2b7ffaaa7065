// Archive access
//
// This module provides the archive facade, the lazily resolved entries returned by
// prefix lookups and iteration, and the options an archive is opened with.

pub mod archive;
pub mod entry;
pub mod options;

pub use archive::Archive;
pub use entry::{EntryIter, EntryRef, RecordValue};
pub use options::ArchiveOptions;
