//! # mdict-archive - MDict Dictionary Archive Reader
//!
//! This crate opens MDict archives (`.mdx` definition files and `.mdd` resource
//! files) read-only and answers exact, prefix and full-iteration lookups over their
//! keys.
//!
//! ## Features
//!
//! - **Both layouts**: engine 1.x (4-byte integers) and 2.x (8-byte integers) archives
//! - **All block codecs**: stored, LZO and zlib blocks, each verified by its Adler-32
//! - **Encrypted indexes**: scrambled key-block-info blocks and registration-key
//!   protected archives
//! - **Lazy records**: record blocks are decoded on first use and kept in a bounded
//!   LRU cache shared by every thread
//! - **Header-driven matching**: case folding, `StripKey` and `.mdd` path separators
//!   follow the archive header
//!
//! ## Quick Start
//!
//! ```no_run
//! use mdict_archive::{Archive, ArchiveOptions, CacheCapacity};
//!
//! # fn main() -> mdict_archive::Result<()> {
//! let options = ArchiveOptions::default().with_cache(CacheCapacity::Bytes(16 << 20));
//! let archive = Archive::open_path("/path/to/dictionary.mdx", options)?;
//! println!("{}: {} entries", archive.header()?.title, archive.len()?);
//!
//! for definition in archive.lookup_exact("hello")? {
//!     println!("{}", definition);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Archive access**: [`readers`] for the [`Archive`] facade and its entries
//! - **Archive sections**: [`storage`] for the header, key index, record directory
//!   and block cache
//! - **Cryptography**: [`crypto`] for the index ciphers
//! - **Utilities**: [`utils`] for decompression, I/O helpers and key folding
//!
//! ## Error Handling
//!
//! All fallible operations return a [`Result<T>`] type, where errors are represented by
//! [`MdictError`]. The crate uses the `snafu` library for error handling with
//! backtraces. A key that is not present is never an error.
//!
//! ```
//! use mdict_archive::{MdictError, Result};
//!
//! fn example() -> Result<String> {
//!     Err(MdictError::archive_closed())
//! }
//!
//! assert!(example().unwrap_err().is_archive_closed());
//! ```

pub mod crypto;
pub mod error;
pub mod readers;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use readers::{Archive, ArchiveOptions, EntryIter, EntryRef, RecordValue};
pub use storage::{CacheCapacity, CacheStats, HeaderMetadata};
pub use crypto::RegistrationKey;

// Re-export error types for convenience
pub use error::{MdictError, Result, snafu};
