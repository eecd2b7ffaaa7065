//! Decoding of framed key and record blocks.
//!
//! Every key block, record block and the 2.0 key-block-info block share one frame:
//!
//! ```text
//! u8 compression tag | 3 reserved bytes | u32 BE adler32 of the decoded data | payload
//! ```
//!
//! The frame carries no length of its own; the surrounding info section declares
//! both the framed (compressed) size and the decoded size. When the section is
//! encrypted, the payload is scrambled with a key derived from the checksum bytes.

use std::io::Read;

use log::trace;

use crate::crypto::encryption::{decrypt_block_payload, derive_block_key};
use crate::utils::compression::{decompress, CompressionMethod};
use crate::utils::io_utils::read_exact_to_vec;
use crate::{MdictError, Result};

/// Size of the tag and checksum words in front of every payload.
pub const FRAME_HEADER_LEN: usize = 8;

/// Decodes one framed block.
///
/// # Arguments
///
/// * `raw` - The complete frame, exactly as long as the declared compressed size
/// * `decompressed_len` - The decoded size declared by the info section
/// * `encrypted` - Whether this section is scrambled with the checksum-keyed cipher
///
/// # Returns
///
/// Returns the decoded payload, guaranteed to be `decompressed_len` bytes whose
/// Adler-32 equals the frame checksum.
pub fn decode_block(raw: &[u8], decompressed_len: usize, encrypted: bool) -> Result<Vec<u8>> {
    if raw.len() < FRAME_HEADER_LEN {
        return Err(MdictError::truncated_block(FRAME_HEADER_LEN as u64, raw.len() as u64));
    }
    let tag = raw[0];
    let checksum_bytes = [raw[4], raw[5], raw[6], raw[7]];
    let checksum = u32::from_be_bytes(checksum_bytes);

    let method = CompressionMethod::try_from(tag)?;
    let payload = &raw[FRAME_HEADER_LEN..];
    let data = if encrypted {
        let key = derive_block_key(&checksum_bytes);
        let mut plain = payload.to_vec();
        decrypt_block_payload(&mut plain, &key);
        decompress(method, &plain, decompressed_len)?
    } else {
        decompress(method, payload, decompressed_len)?
    };

    let actual = adler::adler32_slice(&data);
    if actual != checksum {
        return Err(MdictError::checksum_mismatch(checksum, actual));
    }
    trace!("Decoded {:?} block: {} -> {} bytes", method, raw.len(), data.len());
    Ok(data)
}

/// Reads a frame of `compressed_len` bytes from `reader` and decodes it.
pub fn read_block<R: Read>(reader: &mut R, compressed_len: usize, decompressed_len: usize, encrypted: bool) -> Result<Vec<u8>> {
    let raw = read_exact_to_vec(reader, compressed_len)?;
    decode_block(&raw, decompressed_len, encrypted)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::testing::frame_block;

    const TEXT: &[u8] = b"fruit\0device\0red fruit\0fruit\0device\0red fruit\0";

    #[test]
    fn test_decode_each_codec() {
        for method in [CompressionMethod::None, CompressionMethod::Lzo, CompressionMethod::Deflate] {
            let frame = frame_block(TEXT, method, false);
            let data = decode_block(&frame, TEXT.len(), false).unwrap();
            assert_eq!(data, TEXT);
            assert_eq!(adler::adler32_slice(&data).to_be_bytes(), frame[4..8]);
        }
    }

    #[test]
    fn test_decode_encrypted() {
        let frame = frame_block(TEXT, CompressionMethod::Deflate, true);
        assert_eq!(decode_block(&frame, TEXT.len(), true).unwrap(), TEXT);
        // reading scrambled bytes as plain input never yields data
        assert!(decode_block(&frame, TEXT.len(), false).is_err());
    }

    #[test]
    fn test_declared_size_mismatch() {
        let frame = frame_block(&[7u8; 98], CompressionMethod::Deflate, false);
        assert!(decode_block(&frame, 100, false).unwrap_err().is_corrupt_block());
        assert!(decode_block(&frame, 98, false).is_ok());
    }

    #[test]
    fn test_oversized_declared_length() {
        for method in [CompressionMethod::None, CompressionMethod::Lzo, CompressionMethod::Deflate] {
            let frame = frame_block(b"tiny", method, false);
            assert!(decode_block(&frame, usize::MAX, false).unwrap_err().is_corrupt_block());
            assert!(decode_block(&frame, 1 << 40, true).unwrap_err().is_corrupt_block());
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut frame = frame_block(TEXT, CompressionMethod::None, false);
        frame[7] ^= 0x01;
        assert!(decode_block(&frame, TEXT.len(), false).unwrap_err().is_corrupt_block());

        let mut frame = frame_block(TEXT, CompressionMethod::None, false);
        let last = frame.len() - 1;
        frame[last] ^= 0x20;
        assert!(decode_block(&frame, TEXT.len(), false).unwrap_err().is_corrupt_block());
    }

    #[test]
    fn test_unknown_tag() {
        let mut frame = frame_block(TEXT, CompressionMethod::None, false);
        frame[0] = 9;
        assert!(decode_block(&frame, TEXT.len(), false).unwrap_err().is_unsupported_compression());
    }

    #[test]
    fn test_truncation() {
        assert!(decode_block(&[2, 0, 0], 10, false).unwrap_err().is_truncated_block());
        let frame = frame_block(TEXT, CompressionMethod::Deflate, false);
        let mut cursor = Cursor::new(&frame[..frame.len() - 3]);
        assert!(read_block(&mut cursor, frame.len(), TEXT.len(), false).unwrap_err().is_truncated_block());
    }
}
