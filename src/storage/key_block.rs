//! Key blocks: runs of `(record offset, key)` pairs.
//!
//! A decoded key block is a plain sequence of
//!
//! ```text
//! record_offset (4 or 8 bytes, BE) | key text | NUL terminator
//! ```
//!
//! where the terminator is two zero bytes for UTF-16 archives. Key blocks are read
//! strictly in file order so that entry ordinals match the archive's own order.

use std::io::{Cursor, Read};

use log::debug;

use crate::storage::block_codec::read_block;
use crate::storage::header::HeaderMetadata;
use crate::storage::key_block_info::{KeyBlockInfo, KeyBlockInfoSection};
use crate::storage::reader_helper::{decode_bytes_to_string, UintReader};
use crate::utils::io_utils::to_usize;
use crate::{MdictError, Result};

/// A key and the logical offset of its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub key: String,
    /// Position in the concatenation of all decoded record blocks
    pub record_offset: u64,
}

/// Finds the end of a NUL-terminated key starting at `start`.
/// Returns the key's end and the position after the terminator.
fn key_end(data: &[u8], start: usize, is_utf16: bool) -> Option<(usize, usize)> {
    if is_utf16 {
        let mut pos = start;
        while pos + 1 < data.len() {
            if data[pos] == 0 && data[pos + 1] == 0 {
                return Some((pos, pos + 2));
            }
            pos += 2;
        }
        None
    } else {
        data[start..].iter().position(|&b| b == 0).map(|i| (start + i, start + i + 1))
    }
}

/// Parses one decoded key block.
///
/// # Arguments
///
/// * `data` - Decoded block payload
/// * `header` - Archive header, for the integer width and key encoding
/// * `declared_count` - Number of entries the key-block-info row announced
pub fn parse_key_block(data: &[u8], header: &HeaderMetadata, declared_count: u64) -> Result<Vec<KeyEntry>> {
    let width = header.version.int_width();
    let is_utf16 = header.is_utf16();
    let mut entries = Vec::with_capacity(declared_count.min(data.len() as u64) as usize);
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < width {
            return Err(MdictError::corrupt_block(format!("key block ends inside a record offset at {}", pos)));
        }
        let mut reader = UintReader::new(Cursor::new(&data[pos..pos + width]), header.version);
        let record_offset = reader.read_uint()?;
        pos += width;
        let (end, next) = key_end(data, pos, is_utf16)
            .ok_or_else(|| MdictError::corrupt_block(format!("unterminated key at {}", pos)))?;
        let key = decode_bytes_to_string(&data[pos..end], header.encoding);
        entries.push(KeyEntry { key, record_offset });
        pos = next;
    }
    if entries.len() as u64 != declared_count {
        return Err(MdictError::corrupt_block(format!(
            "key block declares {} entries, holds {}", declared_count, entries.len()
        )));
    }
    Ok(entries)
}

fn read_key_block<R: Read>(reader: &mut R, info: &KeyBlockInfo, header: &HeaderMetadata) -> Result<Vec<KeyEntry>> {
    let compressed_len = to_usize(info.compressed_len, "key block size")?;
    let decompressed_len = to_usize(info.decompressed_len, "key block size")?;
    let data = read_block(reader, compressed_len, decompressed_len, false)?;
    parse_key_block(&data, header, info.entry_count)
}

/// Reads every key block described by `section`, in order.
/// The reader must be positioned at the first key block.
pub fn read_key_blocks<R: Read>(reader: &mut R, section: &KeyBlockInfoSection, header: &HeaderMetadata) -> Result<Vec<KeyEntry>> {
    let mut entries = Vec::with_capacity(section.entry_count.min(1 << 16) as usize);
    for (i, info) in section.blocks.iter().enumerate() {
        let block = read_key_block(reader, info, header)?;
        if i + 1 == section.blocks.len() || i % 64 == 0 {
            debug!("Key block {}: {} entries starting at #{}", i, block.len(), info.first_entry);
        }
        entries.extend(block);
    }
    Ok(entries)
}
