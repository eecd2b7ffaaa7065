//! Record block directory: where each record block lives, logically and physically.
//!
//! The record-block-info section follows the last key block:
//!
//! ```text
//! block_count | entry_count | info_len | blocks_len          (4 or 8 bytes each)
//! block_count × (compressed_len | decompressed_len)          (4 or 8 bytes each)
//! record blocks, back to back                                (blocks_len bytes)
//! ```
//!
//! Record offsets from the key index address the concatenation of all decoded
//! record blocks. [`RecordBlockDirectory::locate`] maps such an offset to a block
//! and a position inside it.

use std::io::{Cursor, Read, Seek};

use log::debug;

use crate::storage::header::FormatVersion;
use crate::storage::reader_helper::UintReader;
use crate::utils::io_utils::{read_exact_to_vec, to_usize};
use crate::{MdictError, Result};

/// One record block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordBlockDescriptor {
    /// First logical record offset held by this block
    pub logical_offset: u64,
    pub decompressed_len: u64,
    pub compressed_len: u64,
    /// Position of the block frame in the source
    pub physical_offset: u64,
}

impl RecordBlockDescriptor {
    /// Logical offset just past this block.
    pub fn logical_end(&self) -> u64 {
        self.logical_offset + self.decompressed_len
    }
}

/// All record blocks in file order.
#[derive(Debug, Clone, Default)]
pub struct RecordBlockDirectory {
    /// Number of records the section declares
    pub entry_count: u64,
    blocks: Vec<RecordBlockDescriptor>,
    total_decompressed: u64,
}

impl RecordBlockDirectory {
    /// Parses the section at the reader's position.
    ///
    /// # Arguments
    ///
    /// * `reader` - Source positioned just past the last key block
    /// * `version` - Integer width of the archive
    /// * `source_len` - Total source length, to check that every block is present
    pub fn from_reader<R: Read + Seek>(reader: &mut R, version: FormatVersion, source_len: u64) -> Result<Self> {
        let width = version.int_width() as u64;
        let summary = read_exact_to_vec(reader, 4 * width as usize)?;
        let mut summary = UintReader::new(Cursor::new(summary), version);
        let block_count = summary.read_uint()?;
        let entry_count = summary.read_uint()?;
        let info_len = summary.read_uint()?;
        let blocks_len = summary.read_uint()?;
        debug!("Record block info: {} blocks, {} entries, info {} bytes, blocks {} bytes",
            block_count, entry_count, info_len, blocks_len);

        let row_len = 2 * width;
        if block_count.checked_mul(row_len) != Some(info_len) {
            return Err(MdictError::corrupt_block(format!(
                "record block info is {} bytes, {} blocks need {}", info_len, block_count, block_count.saturating_mul(row_len)
            )));
        }
        let table = read_exact_to_vec(reader, to_usize(info_len, "record block info size")?)?;
        let first_block = reader.stream_position()?;

        let mut rows = UintReader::new(Cursor::new(table), version);
        let mut blocks = Vec::with_capacity(block_count as usize);
        let mut logical_offset = 0u64;
        let mut physical_offset = first_block;
        for _ in 0..block_count {
            let compressed_len = rows.read_uint()?;
            let decompressed_len = rows.read_uint()?;
            blocks.push(RecordBlockDescriptor { logical_offset, decompressed_len, compressed_len, physical_offset });
            logical_offset = logical_offset.checked_add(decompressed_len)
                .ok_or_else(|| MdictError::corrupt_block("record block sizes overflow"))?;
            physical_offset = physical_offset.checked_add(compressed_len)
                .ok_or_else(|| MdictError::corrupt_block("record block sizes overflow"))?;
        }

        let compressed_total = physical_offset - first_block;
        if compressed_total != blocks_len {
            return Err(MdictError::corrupt_block(format!(
                "record blocks declared {} bytes, table sums to {}", blocks_len, compressed_total
            )));
        }
        if physical_offset > source_len {
            return Err(MdictError::truncated_block(blocks_len, source_len.saturating_sub(first_block)));
        }

        Ok(Self { entry_count, blocks, total_decompressed: logical_offset })
    }

    /// Finds the block holding logical `offset` and the offset inside that block.
    pub fn locate(&self, offset: u64) -> Result<(usize, u64)> {
        if offset >= self.total_decompressed {
            return Err(MdictError::offset_out_of_range(offset, self.total_decompressed));
        }
        // last block starting at or before offset; empty blocks sort before the one holding it
        let index = self.blocks.partition_point(|b| b.logical_offset <= offset) - 1;
        Ok((index, offset - self.blocks[index].logical_offset))
    }

    pub fn block(&self, index: usize) -> Option<&RecordBlockDescriptor> {
        self.blocks.get(index)
    }

    pub fn blocks(&self) -> &[RecordBlockDescriptor] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Size of all decoded record data.
    pub fn total_decompressed(&self) -> u64 {
        self.total_decompressed
    }
}
