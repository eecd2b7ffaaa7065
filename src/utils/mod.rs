// Utility functions and helpers
//
// This module provides the pluggable decompressors, declared-length I/O helpers
// and the key folding shared by the index and the lookups.

pub mod io_utils;
pub mod key_fold;
pub mod compression;

pub use io_utils::{read_at, read_exact_to_vec, stream_len};
pub use key_fold::KeyFolding;
pub use compression::{decompress, get_decompressor, CompressionMethod};
