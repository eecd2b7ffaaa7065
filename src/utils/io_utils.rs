//! I/O helpers for reading declared-length sections from a byte source.
//!
//! Every section of an archive announces its size before its bytes. These helpers
//! read exactly that many bytes and report a short source as
//! [`MdictError::TruncatedBlock`] carrying both the declared and the available count.

use std::io::{Read, Seek, SeekFrom};

use crate::{MdictError, Result};

/// Upper bound for buffer preallocation; larger sections grow while reading.
const MAX_PREALLOC: usize = 1 << 20;

/// Reads exactly `len` bytes, failing with `TruncatedBlock` if the source ends early.
pub fn read_exact_to_vec<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(MdictError::truncated_block(len as u64, buf.len() as u64));
    }
    Ok(buf)
}

/// Reads `len` bytes starting at absolute position `offset`.
pub fn read_at<R: Read + Seek>(reader: &mut R, offset: u64, len: usize) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    read_exact_to_vec(reader, len)
}

/// Total length of a seekable source. The cursor position is preserved.
pub fn stream_len<R: Seek>(reader: &mut R) -> Result<u64> {
    let pos = reader.stream_position()?;
    let len = reader.seek(SeekFrom::End(0))?;
    if pos != len {
        reader.seek(SeekFrom::Start(pos))?;
    }
    Ok(len)
}

/// Converts a declared 64-bit size into `usize`, rejecting values this platform cannot
/// allocate.
pub fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| MdictError::corrupt_block(format!("{} too large: {}", what, value)))
}
