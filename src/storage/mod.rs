// Archive sections and the structures built from them
//
// This module provides the header parser, the block codec shared by every framed
// block, the key index builder, the record block directory and the decoded block cache.

pub mod reader_helper;
pub mod header;
pub mod block_codec;
pub mod key_block_info;
pub mod key_block;
pub mod key_index;
pub mod record_directory;
pub mod record_cache;

pub use header::{ArchiveKind, EncryptionFlags, FormatVersion, HeaderMetadata};
pub use block_codec::decode_block;
pub use key_block_info::{KeyBlockInfo, KeyBlockInfoSection};
pub use key_block::KeyEntry;
pub use key_index::KeyIndex;
pub use record_directory::{RecordBlockDescriptor, RecordBlockDirectory};
pub use record_cache::{CacheCapacity, CacheStats, RecordBlockCache};
pub use reader_helper::UintReader;
