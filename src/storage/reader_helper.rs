//! Helper functions for reading and decoding archive data.
//!
//! This module provides utility functions for:
//! - Mapping header encoding names to `encoding_rs` encodings
//! - Stripping NUL terminators from narrow and wide strings
//! - Reading version-width integers and key lengths

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};
use encoding_rs::Encoding;
use log::debug;

use crate::storage::header::FormatVersion;
use crate::{MdictError, Result};

/// Gets an encoding object by the label found in an archive header.
///
/// # Arguments
///
/// * `label` - Encoding label (e.g., "UTF-8", "UTF-16", "GBK", "Big5"); empty means UTF-8
///
/// # Returns
///
/// Returns a reference to the corresponding Encoding object.
///
/// # Errors
///
/// Returns `MalformedHeader` if the encoding label is not recognized.
pub fn get_encoding_object_by_label(label: &str) -> Result<&'static Encoding> {
    let encoding = label.trim().to_lowercase();
    let label = match encoding.as_str() {
        "" => "utf-8",
        "utf-16" | "utf16" => "utf-16le",
        // GBK and GB2312 archives routinely contain GB18030-only characters
        "gbk" | "gb2312" => "gb18030",
        _ => encoding.as_str(),
    };
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| MdictError::malformed_header(format!("Invalid encoding: {}", encoding)))
}

/// Whether `encoding` uses two-byte code units.
pub fn is_wide_encoding(encoding: &'static Encoding) -> bool {
    encoding == encoding_rs::UTF_16LE || encoding == encoding_rs::UTF_16BE
}

/// Strips trailing NUL terminators from a narrow or wide string.
///
/// # Arguments
///
/// * `cstr` - The byte array containing the C-string
/// * `is_wchar` - Whether the string is made of two-byte code units
pub fn bytes_from_cstr(cstr: &[u8], is_wchar: bool) -> &[u8] {
    let mut end = cstr.len();
    if is_wchar {
        end -= end % 2;
        while end >= 2 && cstr[end - 1] == 0 && cstr[end - 2] == 0 {
            end -= 2;
        }
    } else {
        while end >= 1 && cstr[end - 1] == 0 {
            end -= 1;
        }
    }
    &cstr[..end]
}

/// Decodes bytes to a string using the specified encoding, dropping trailing NULs.
/// Malformed sequences become U+FFFD.
pub fn decode_bytes_to_string(cstr: &[u8], encoding_obj: &'static Encoding) -> String {
    let cstr = bytes_from_cstr(cstr, is_wide_encoding(encoding_obj));
    let (decoded, had_errors) = encoding_obj.decode_without_bom_handling(cstr);
    if had_errors {
        debug!("Decoding error with: {}", encoding_obj.name());
    }
    decoded.into_owned()
}

/// Reads the integers whose width depends on the format version.
pub struct UintReader<R: Read> {
    reader: R,
    version: FormatVersion,
}

impl<R: Read> UintReader<R> {
    pub fn new(reader: R, version: FormatVersion) -> Self {
        Self { reader, version }
    }

    /// Reads a 4-byte (V1) or 8-byte (V2) big-endian integer.
    #[inline]
    pub fn read_uint(&mut self) -> Result<u64> {
        match self.version {
            FormatVersion::V1 => Ok(self.reader.read_u32::<BigEndian>()? as u64),
            FormatVersion::V2 => Ok(self.reader.read_u64::<BigEndian>()?),
        }
    }

    /// Reads a key length: one byte in V1, a big-endian u16 in V2.
    #[inline]
    pub fn read_key_len(&mut self) -> Result<usize> {
        match self.version {
            FormatVersion::V1 => Ok(self.reader.read_u8()? as usize),
            FormatVersion::V2 => Ok(self.reader.read_u16::<BigEndian>()? as usize),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        crate::utils::io_utils::read_exact_to_vec(&mut self.reader, len)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
