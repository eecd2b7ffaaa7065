//! Archive header parsing.
//!
//! Every archive starts with a length-prefixed, checksummed XML element that
//! describes the rest of the file:
//!
//! ```text
//! u32 BE length | length bytes of XML text | u32 LE adler32 of the text
//! ```
//!
//! The text is UTF-16LE when its second byte is zero and UTF-8 otherwise. The root
//! element is `Dictionary` for definition archives (`.mdx`) and `Library_Data` for
//! resource archives (`.mdd`).
//!
//! # Examples
//!
//! ```
//! use mdict_archive::storage::header::{ArchiveKind, FormatVersion, HeaderMetadata};
//!
//! let xml = r#"<Dictionary RequiredEngineVersion="2.0" Encrypted="No" Encoding="UTF-8" Title="Demo"/>"#;
//! let header = HeaderMetadata::from_xml(xml)?;
//! assert_eq!(header.kind, ArchiveKind::Mdx);
//! assert_eq!(header.version, FormatVersion::V2);
//! assert_eq!(header.title, "Demo");
//! # Ok::<(), mdict_archive::MdictError>(())
//! ```

use std::io::Read;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use encoding_rs::Encoding;
use log::{debug, warn};
use quick_xml::events::Event;

use crate::storage::reader_helper::{decode_bytes_to_string, get_encoding_object_by_label, is_wide_encoding};
use crate::utils::io_utils::read_exact_to_vec;
use crate::utils::key_fold::KeyFolding;
use crate::{MdictError, Result};

/// Headers larger than this are rejected before allocation.
const MAX_HEADER_LEN: u32 = 16 << 20;

/// Binary layout generation of the archive.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FormatVersion {
    /// Engine 1.x: 4-byte integers, one-byte key lengths
    V1 = 1,
    /// Engine 2.x: 8-byte integers, two-byte key lengths, terminated keys
    V2 = 2,
}

impl FormatVersion {
    /// Maps a `RequiredEngineVersion` value such as "2.0" to a layout.
    ///
    /// # Errors
    ///
    /// Returns `MalformedHeader` for unparsable values and for engine 3.0 or newer,
    /// which uses an unrelated container.
    pub fn from_engine_version(version: &str) -> Result<Self> {
        let number = version.trim().parse::<f32>()
            .map_err(|_| MdictError::malformed_header(format!("Invalid RequiredEngineVersion: {:?}", version)))?;
        if !number.is_finite() || number < 0.0 {
            return Err(MdictError::malformed_header(format!("Invalid RequiredEngineVersion: {:?}", version)));
        }
        if number < 2.0 {
            Ok(FormatVersion::V1)
        } else if number < 3.0 {
            Ok(FormatVersion::V2)
        } else {
            Err(MdictError::malformed_header(format!("Unsupported engine version: {}", version)))
        }
    }

    /// Width in bytes of the section integers.
    pub fn int_width(&self) -> usize {
        match self {
            FormatVersion::V1 => 4,
            FormatVersion::V2 => 8,
        }
    }
}

/// Definition archive or resource archive.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArchiveKind {
    /// `.mdx`, records are text
    Mdx,
    /// `.mdd`, records are binary resources
    Mdd,
}

/// Which index sections are encrypted, from the `Encrypted` attribute.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct EncryptionFlags {
    /// The key-block-info summary is Salsa20/8-encrypted with a registration key (bit 0)
    pub key_info_header: bool,
    /// The key-block-info block is scrambled with the checksum-keyed cipher (bit 1)
    pub key_info_block: bool,
}

impl EncryptionFlags {
    /// Parses `Yes`, `No` or an integer bit set.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("yes") {
            return Ok(Self { key_info_header: false, key_info_block: true });
        }
        if value.eq_ignore_ascii_case("no") {
            return Ok(Self::default());
        }
        let bits = value.parse::<u32>()
            .map_err(|_| MdictError::malformed_header(format!("Invalid Encrypted attribute: {:?}", value)))?;
        Ok(Self {
            key_info_header: bits & 0x01 != 0,
            key_info_block: bits & 0x02 != 0,
        })
    }
}

/// Attributes of the header element.
#[derive(Clone, Debug)]
pub struct HeaderMetadata {
    pub kind: ArchiveKind,
    pub version: FormatVersion,
    pub encryption: EncryptionFlags,
    /// Encoding of keys and mdx records
    pub encoding: &'static Encoding,
    pub key_case_sensitive: bool,
    pub strip_key: bool,

    pub required_engine_version: String,
    pub generated_by_engine_version: String,
    pub title: String,
    pub description: String,
    pub creation_date: String,
    pub style_sheet: String,
    pub format: String,
    pub register_by: String,
    pub is_compact_format: bool,
    pub left_to_right: bool,

    /// Every attribute in document order, values unescaped
    pub attributes: Vec<(String, String)>,
    pub raw_xml: String,
}

fn get_node_attr_str<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn get_node_attr_bool(attrs: &[(String, String)], key: &str, default: bool) -> bool {
    match get_node_attr_str(attrs, key).map(|v| v.trim().to_lowercase()) {
        Some(v) if v == "yes" || v == "true" => true,
        Some(v) if v == "no" || v == "false" => false,
        _ => default,
    }
}

fn owned_attr(attrs: &[(String, String)], key: &str) -> String {
    get_node_attr_str(attrs, key).unwrap_or_default().to_string()
}

fn parse_root(xml: &str) -> Result<(String, Vec<(String, String)>)> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf)
            .map_err(|e| MdictError::malformed_header(format!("Failed to parse XML: {}", e)))?;
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = std::str::from_utf8(e.name().as_ref())
                    .map_err(|e| MdictError::malformed_header(format!("Invalid UTF-8 in XML: {}", e)))?
                    .to_string();
                let mut attrs = Vec::new();
                for attr_result in e.attributes().with_checks(false) {
                    let attr = attr_result
                        .map_err(|e| MdictError::malformed_header(format!("Failed to parse XML attributes: {}", e)))?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let raw = String::from_utf8_lossy(attr.value.as_ref()).into_owned();
                    // Descriptions often carry bare '&', keep those verbatim
                    let value = quick_xml::escape::unescape(&raw)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| raw.clone());
                    attrs.push((key, value));
                }
                return Ok((name, attrs));
            }
            Event::Eof => return Err(MdictError::malformed_header("No root element found in XML")),
            _ => {}
        }
    }
}

impl HeaderMetadata {
    /// Builds the metadata from the header element text.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let (root_name, attrs) = parse_root(xml)?;
        let kind = match root_name.to_lowercase().as_str() {
            "dictionary" => ArchiveKind::Mdx,
            "library_data" => ArchiveKind::Mdd,
            other => return Err(MdictError::malformed_header(format!("Unknown root element: {}", other))),
        };

        let required_engine_version = get_node_attr_str(&attrs, "RequiredEngineVersion")
            .ok_or_else(|| MdictError::malformed_header("Missing RequiredEngineVersion"))?
            .to_string();
        let mut version = FormatVersion::from_engine_version(&required_engine_version)?;
        let mut encryption = EncryptionFlags::parse(
            get_node_attr_str(&attrs, "Encrypted").ok_or_else(|| MdictError::malformed_header("Missing Encrypted"))?,
        )?;

        let encoding = match kind {
            // Resource names are always stored as UTF-16LE in the 2.0 layout
            ArchiveKind::Mdd => {
                version = FormatVersion::V2;
                encoding_rs::UTF_16LE
            }
            ArchiveKind::Mdx => get_encoding_object_by_label(get_node_attr_str(&attrs, "Encoding").unwrap_or_default())?,
        };

        // the 1.x layout stores its key index in the clear whatever Encrypted says
        if version == FormatVersion::V1 && encryption != EncryptionFlags::default() {
            warn!("Ignoring Encrypted={:?} on a 1.x archive", get_node_attr_str(&attrs, "Encrypted").unwrap_or_default());
            encryption = EncryptionFlags::default();
        }

        // Compat is an old misspelling of Compact
        let is_compact_format = get_node_attr_bool(&attrs, "Compact", get_node_attr_bool(&attrs, "Compat", false));

        Ok(Self {
            kind,
            version,
            encryption,
            encoding,
            key_case_sensitive: get_node_attr_bool(&attrs, "KeyCaseSensitive", false),
            strip_key: kind == ArchiveKind::Mdx && get_node_attr_bool(&attrs, "StripKey", false),
            generated_by_engine_version: owned_attr(&attrs, "GeneratedByEngineVersion"),
            title: owned_attr(&attrs, "Title"),
            description: owned_attr(&attrs, "Description"),
            creation_date: owned_attr(&attrs, "CreationDate"),
            style_sheet: owned_attr(&attrs, "StyleSheet"),
            format: owned_attr(&attrs, "Format"),
            register_by: owned_attr(&attrs, "RegisterBy"),
            is_compact_format,
            left_to_right: get_node_attr_bool(&attrs, "Left2Right", true),
            required_engine_version,
            attributes: attrs,
            raw_xml: xml.to_string(),
        })
    }

    /// Reads the framed header and leaves `reader` just past its checksum.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let xml = read_header_text(reader)?;
        debug!("Archive header: {}", xml);
        Self::from_xml(&xml)
    }

    pub fn is_mdd(&self) -> bool {
        self.kind == ArchiveKind::Mdd
    }

    /// Whether keys and text use two-byte code units.
    pub fn is_utf16(&self) -> bool {
        is_wide_encoding(self.encoding)
    }

    /// Looks up any header attribute by its exact name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        get_node_attr_str(&self.attributes, name)
    }

    /// Folding rules the archive's keys were sorted under.
    pub fn key_folding(&self) -> KeyFolding {
        KeyFolding {
            fold_case: !self.key_case_sensitive,
            alpha_and_digit_only: self.strip_key,
            unify_separators: self.is_mdd(),
        }
    }
}

fn read_header_text<R: Read>(reader: &mut R) -> Result<String> {
    let length = reader.read_u32::<BigEndian>()
        .map_err(|e| MdictError::malformed_header(format!("Missing header length: {}", e)))?;
    if length == 0 || length > MAX_HEADER_LEN {
        return Err(MdictError::malformed_header(format!("Invalid header length: {}", length)));
    }
    let data = read_exact_to_vec(reader, length as usize)
        .map_err(|e| MdictError::malformed_header(format!("Header truncated: {}", e)))?;
    let checksum = reader.read_u32::<LittleEndian>()
        .map_err(|e| MdictError::malformed_header(format!("Missing header checksum: {}", e)))?;
    let actual = adler::adler32_slice(&data);
    if checksum != actual {
        return Err(MdictError::malformed_header(format!(
            "Header checksum mismatch: expected {:#010x}, got {:#010x}", checksum, actual
        )));
    }
    let encoding = if data.len() > 1 && data[1] == 0 { encoding_rs::UTF_16LE } else { encoding_rs::UTF_8 };
    Ok(decode_bytes_to_string(&data, encoding))
}
