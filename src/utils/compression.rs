//! Decompression of MDict block payloads.
//!
//! A block frame names its codec with a one-byte tag:
//! - `0`: stored, no compression
//! - `1`: LZO1X
//! - `2`: zlib (deflate)
//!
//! Every codec must produce exactly the decompressed length declared by the
//! surrounding info section; anything else is reported as a corrupt block.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::{MdictError, Result};

/// Compression methods a block frame may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionMethod {
    /// Payload is stored as is
    None = 0,
    /// LZO1X compression
    Lzo = 1,
    /// zlib-wrapped deflate compression
    Deflate = 2,
}

impl TryFrom<u8> for CompressionMethod {
    type Error = MdictError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Lzo),
            2 => Ok(CompressionMethod::Deflate),
            _ => Err(MdictError::unsupported_compression(value)),
        }
    }
}

/// zlib cannot expand a byte further than this; LZO1X stays well below it.
const MAX_EXPANSION: usize = 1032;

/// Rejects declared sizes no payload of `compressed_len` bytes can decode to, then
/// reserves the output buffer without aborting on allocation failure.
fn output_buffer(compressed_len: usize, original_size: usize) -> Result<Vec<u8>> {
    let limit = compressed_len.saturating_mul(MAX_EXPANSION).saturating_add(64);
    if original_size > limit {
        return Err(MdictError::corrupt_block(format!(
            "declared size {} is impossible for {} compressed bytes", original_size, compressed_len
        )));
    }
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(original_size)
        .map_err(|e| MdictError::corrupt_block(format!("cannot allocate {} bytes: {}", original_size, e)))?;
    Ok(buffer)
}

/// Common interface for the block decompressors.
pub trait Decompressor {
    /// Decompresses `data`, which must expand to exactly `original_size` bytes.
    fn decompress(&self, data: &[u8], original_size: usize) -> Result<Vec<u8>>;
}

/// Pass-through for stored payloads.
pub struct NoCompression;

impl Decompressor for NoCompression {
    fn decompress(&self, data: &[u8], original_size: usize) -> Result<Vec<u8>> {
        if data.len() != original_size {
            return Err(MdictError::size_mismatch(original_size as u64, data.len() as u64));
        }
        Ok(data.to_vec())
    }
}

/// LZO1X decompression.
pub struct LzoDecompressor;

impl Decompressor for LzoDecompressor {
    fn decompress(&self, data: &[u8], original_size: usize) -> Result<Vec<u8>> {
        let mut decompressed = output_buffer(data.len(), original_size)?;
        decompressed.resize(original_size, 0);
        let (result, error) = rust_lzo::LZOContext::decompress_to_slice(data, &mut decompressed);
        if error != rust_lzo::LZOError::OK {
            return Err(MdictError::corrupt_block(format!("LZO decompression error: {}", error as i32)));
        }
        let produced = result.len();
        if produced != original_size {
            return Err(MdictError::size_mismatch(original_size as u64, produced as u64));
        }
        Ok(decompressed)
    }
}

/// zlib (deflate) decompression.
pub struct DeflateDecompressor;

impl Decompressor for DeflateDecompressor {
    fn decompress(&self, data: &[u8], original_size: usize) -> Result<Vec<u8>> {
        // One byte of slack is enough to tell "too long" from "exact".
        let mut decompressed = output_buffer(data.len(), original_size)?;
        let mut decoder = ZlibDecoder::new(data).take((original_size as u64).saturating_add(1));
        decoder.read_to_end(&mut decompressed)
            .map_err(|e| MdictError::corrupt_block(format!("Inflate error: {}", e)))?;
        if decompressed.len() != original_size {
            return Err(MdictError::size_mismatch(original_size as u64, decompressed.len() as u64));
        }
        Ok(decompressed)
    }
}

pub fn get_decompressor(method: CompressionMethod) -> Box<dyn Decompressor> {
    match method {
        CompressionMethod::None => Box::new(NoCompression),
        CompressionMethod::Lzo => Box::new(LzoDecompressor),
        CompressionMethod::Deflate => Box::new(DeflateDecompressor),
    }
}

/// Decompresses `data` with `method` to exactly `expected_len` bytes.
pub fn decompress(method: CompressionMethod, data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    get_decompressor(method).decompress(data, expected_len)
}
