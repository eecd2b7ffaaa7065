//! The key-block-info section: sizes and key ranges of every key block.
//!
//! 2.0 layout:
//!
//! ```text
//! u64 block_count | u64 entry_count | u64 info_decompressed_len
//! | u64 info_compressed_len | u64 key_blocks_len | u32 adler32 of the 40 bytes above
//! | framed info block (info_compressed_len bytes)
//! ```
//!
//! 1.x layout: four u32 (`block_count`, `entry_count`, `info_len`, `key_blocks_len`)
//! followed by a raw `info_len`-byte table.
//!
//! Each table row holds the block's entry count, its first and last key and its
//! compressed and decompressed sizes.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, warn};

use crate::crypto::encryption::decrypt_salsa20;
use crate::storage::block_codec::read_block;
use crate::storage::header::{FormatVersion, HeaderMetadata};
use crate::storage::reader_helper::{decode_bytes_to_string, UintReader};
use crate::utils::io_utils::{read_exact_to_vec, to_usize};
use crate::{MdictError, Result};

const V2_SUMMARY_LEN: usize = 40;
const V1_SUMMARY_LEN: usize = 16;

/// Description of one key block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBlockInfo {
    pub entry_count: u64,
    pub first_key: String,
    pub last_key: String,
    pub compressed_len: u64,
    pub decompressed_len: u64,
    /// Ordinal of the block's first entry in the whole archive
    pub first_entry: u64,
}

/// The parsed key-block-info section.
#[derive(Debug, Clone, Default)]
pub struct KeyBlockInfoSection {
    pub entry_count: u64,
    /// Total framed size of all key blocks, which follow this section
    pub key_blocks_len: u64,
    pub blocks: Vec<KeyBlockInfo>,
}

struct Summary {
    block_count: u64,
    entry_count: u64,
    info_decompressed_len: u64,
    info_compressed_len: u64,
    key_blocks_len: u64,
}

fn read_v2_summary<R: Read>(reader: &mut R, header: &HeaderMetadata, registration_key: Option<&[u8]>) -> Result<Summary> {
    let mut summary = read_exact_to_vec(reader, V2_SUMMARY_LEN)?;
    if header.encryption.key_info_header {
        let key = registration_key
            .ok_or_else(|| MdictError::decryption_failed("archive is registered, a registration key is required"))?;
        summary = decrypt_salsa20(&summary, key)?;
    }
    let checksum = reader.read_u32::<BigEndian>()?;
    let actual = adler::adler32_slice(&summary);
    if checksum != actual {
        if header.encryption.key_info_header {
            return Err(MdictError::decryption_failed("key block info does not match the registration key"));
        }
        return Err(MdictError::checksum_mismatch(checksum, actual));
    }
    let mut cursor = Cursor::new(&summary);
    Ok(Summary {
        block_count: cursor.read_u64::<BigEndian>()?,
        entry_count: cursor.read_u64::<BigEndian>()?,
        info_decompressed_len: cursor.read_u64::<BigEndian>()?,
        info_compressed_len: cursor.read_u64::<BigEndian>()?,
        key_blocks_len: cursor.read_u64::<BigEndian>()?,
    })
}

fn read_v1_summary<R: Read>(reader: &mut R) -> Result<Summary> {
    let summary = read_exact_to_vec(reader, V1_SUMMARY_LEN)?;
    let mut cursor = Cursor::new(&summary);
    let block_count = cursor.read_u32::<BigEndian>()? as u64;
    let entry_count = cursor.read_u32::<BigEndian>()? as u64;
    let info_len = cursor.read_u32::<BigEndian>()? as u64;
    let key_blocks_len = cursor.read_u32::<BigEndian>()? as u64;
    Ok(Summary {
        block_count,
        entry_count,
        info_decompressed_len: info_len,
        info_compressed_len: info_len,
        key_blocks_len,
    })
}

/// Reads a first/last key of a table row.
fn read_key<R: Read>(reader: &mut UintReader<R>, header: &HeaderMetadata) -> Result<String> {
    let mut length = reader.read_key_len()?;
    // Lengths count code units and exclude the terminator
    let unit = if header.is_utf16() { 2 } else { 1 };
    length *= unit;
    let terminator = match header.version {
        FormatVersion::V1 => 0,
        FormatVersion::V2 => unit,
    };
    let buffer = reader.read_bytes(length + terminator)?;
    Ok(decode_bytes_to_string(&buffer[..length], header.encoding))
}

fn parse_table(table: &[u8], header: &HeaderMetadata, block_count: u64) -> Result<Vec<KeyBlockInfo>> {
    let mut reader = UintReader::new(Cursor::new(table), header.version);
    let mut blocks = Vec::with_capacity(block_count.min(table.len() as u64) as usize);
    let mut first_entry = 0u64;
    for _ in 0..block_count {
        let entry_count = reader.read_uint()?;
        let first_key = read_key(&mut reader, header)?;
        let last_key = read_key(&mut reader, header)?;
        let compressed_len = reader.read_uint()?;
        let decompressed_len = reader.read_uint()?;
        blocks.push(KeyBlockInfo { entry_count, first_key, last_key, compressed_len, decompressed_len, first_entry });
        first_entry = first_entry.checked_add(entry_count)
            .ok_or_else(|| MdictError::corrupt_block("key block entry counts overflow"))?;
    }
    let consumed = reader.into_inner().position() as usize;
    if consumed != table.len() {
        warn!("Key block info table has {} trailing bytes", table.len() - consumed);
        return Err(MdictError::corrupt_block(format!(
            "key block info table is {} bytes, rows use {}", table.len(), consumed
        )));
    }
    Ok(blocks)
}

impl KeyBlockInfoSection {
    /// Reads the section starting at the reader's position, which must be just past
    /// the header. Leaves the reader at the first key block.
    ///
    /// # Arguments
    ///
    /// * `reader` - Source positioned at the section
    /// * `header` - Parsed archive header
    /// * `registration_key` - Salsa20 key, needed only when the summary is encrypted
    pub fn from_reader<R: Read>(reader: &mut R, header: &HeaderMetadata, registration_key: Option<&[u8]>) -> Result<Self> {
        let summary = match header.version {
            FormatVersion::V2 => read_v2_summary(reader, header, registration_key)?,
            FormatVersion::V1 => read_v1_summary(reader)?,
        };
        debug!(
            "Key block info: {} blocks, {} entries, info {} -> {} bytes, key blocks {} bytes",
            summary.block_count, summary.entry_count, summary.info_compressed_len,
            summary.info_decompressed_len, summary.key_blocks_len
        );

        let info_compressed_len = to_usize(summary.info_compressed_len, "key block info size")?;
        let info_decompressed_len = to_usize(summary.info_decompressed_len, "key block info size")?;
        let table = match header.version {
            FormatVersion::V2 => read_block(reader, info_compressed_len, info_decompressed_len, header.encryption.key_info_block)?,
            FormatVersion::V1 => read_exact_to_vec(reader, info_compressed_len)?,
        };

        let blocks = parse_table(&table, header, summary.block_count).map_err(|e| {
            if e.is_truncated_block() {
                MdictError::corrupt_block("key block info table ends inside a row")
            } else {
                e
            }
        })?;

        let compressed_total = blocks.iter().try_fold(0u64, |acc, b| acc.checked_add(b.compressed_len))
            .ok_or_else(|| MdictError::corrupt_block("key block sizes overflow"))?;
        if compressed_total != summary.key_blocks_len {
            return Err(MdictError::corrupt_block(format!(
                "key blocks declared {} bytes, table sums to {}", summary.key_blocks_len, compressed_total
            )));
        }
        let entry_total: u64 = blocks.iter().map(|b| b.entry_count).sum();
        if entry_total != summary.entry_count {
            return Err(MdictError::corrupt_block(format!(
                "key block info declares {} entries, blocks hold {}", summary.entry_count, entry_total
            )));
        }

        Ok(Self { entry_count: summary.entry_count, key_blocks_len: summary.key_blocks_len, blocks })
    }
}
