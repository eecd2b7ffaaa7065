//! Test fixtures: an in-memory archive writer and block framing helpers.
//!
//! [`ArchiveBuilder`] lays out complete `.mdx`/`.mdd` files byte by byte so every
//! reader test runs against a real archive layout without fixture files.

use std::io::Write;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use encoding_rs::Encoding;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::crypto::encryption::{decrypt_salsa20, derive_block_key};
use crate::storage::header::ArchiveKind;
use crate::storage::reader_helper::get_encoding_object_by_label;
use crate::utils::compression::CompressionMethod;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn lzo_compress(data: &[u8]) -> Vec<u8> {
    // worst case LZO1X expansion
    let mut compressed = Vec::with_capacity(data.len() + data.len() / 16 + 64 + 3);
    let mut ctx = rust_lzo::LZOContext::new();
    let error = ctx.compress(data, &mut compressed);
    assert!(error == rust_lzo::LZOError::OK, "LZO compression error: {}", error as i32);
    compressed
}

/// Inverse of `decrypt_block_payload`.
pub fn scramble_block_payload(data: &mut [u8], key: &[u8]) {
    let mut previous = 0x36u8;
    for (i, byte) in data.iter_mut().enumerate() {
        let scrambled = (*byte ^ previous ^ (i as u8) ^ key[i % key.len()]).rotate_left(4);
        *byte = scrambled;
        previous = scrambled;
    }
}

/// Frames `data` the way key, record and key-block-info blocks are stored.
pub fn frame_block(data: &[u8], method: CompressionMethod, encrypted: bool) -> Vec<u8> {
    let mut payload = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Lzo => lzo_compress(data),
        CompressionMethod::Deflate => deflate(data),
    };
    let checksum = adler::adler32_slice(data).to_be_bytes();
    if encrypted {
        scramble_block_payload(&mut payload, &derive_block_key(&checksum));
    }
    let mut frame = vec![method as u8, 0, 0, 0];
    frame.extend_from_slice(&checksum);
    frame.extend_from_slice(&payload);
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Engine 1.2: 4-byte integers, raw key block info table
    V1,
    /// Engine 2.0: 8-byte integers, framed key block info table
    V2,
}

/// Where each section of a built archive starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionOffsets {
    pub key_info: usize,
    pub key_blocks: usize,
    pub record_info: usize,
    pub record_blocks: usize,
}

#[derive(Debug, Clone)]
enum Record {
    Text(String),
    Raw(Vec<u8>),
}

/// Writes complete archives in memory.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    kind: ArchiveKind,
    layout: Layout,
    encoding_label: String,
    case_sensitive: bool,
    strip_key: bool,
    extra_attrs: Vec<(String, String)>,
    entries: Vec<(String, Record)>,
    keys_per_block: usize,
    records_per_block: usize,
    key_compression: CompressionMethod,
    record_compression: CompressionMethod,
    encrypt_key_info: bool,
    summary_key: Option<[u8; 16]>,
    record_size_deltas: Vec<(usize, i64)>,
    record_entry_count_delta: i64,
}

impl ArchiveBuilder {
    fn new(kind: ArchiveKind) -> Self {
        Self {
            kind,
            layout: Layout::V2,
            encoding_label: "UTF-8".to_string(),
            case_sensitive: false,
            strip_key: false,
            extra_attrs: Vec::new(),
            entries: Vec::new(),
            keys_per_block: 32,
            records_per_block: 32,
            key_compression: CompressionMethod::Deflate,
            record_compression: CompressionMethod::Deflate,
            encrypt_key_info: false,
            summary_key: None,
            record_size_deltas: Vec::new(),
            record_entry_count_delta: 0,
        }
    }

    pub fn mdx() -> Self {
        Self::new(ArchiveKind::Mdx)
    }

    pub fn mdd() -> Self {
        Self::new(ArchiveKind::Mdd)
    }

    /// Adds a text record, stored NUL-terminated in the archive encoding.
    pub fn entry(mut self, key: &str, text: &str) -> Self {
        self.entries.push((key.to_string(), Record::Text(text.to_string())));
        self
    }

    /// Adds a record stored byte for byte.
    pub fn raw_entry(mut self, key: &str, bytes: &[u8]) -> Self {
        self.entries.push((key.to_string(), Record::Raw(bytes.to_vec())));
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn utf16(self) -> Self {
        self.encoding_label("UTF-16")
    }

    pub fn encoding_label(mut self, label: &str) -> Self {
        self.encoding_label = label.to_string();
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn strip_key(mut self) -> Self {
        self.strip_key = true;
        self
    }

    pub fn header_attr(mut self, name: &str, value: &str) -> Self {
        self.extra_attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn keys_per_block(mut self, n: usize) -> Self {
        self.keys_per_block = n.max(1);
        self
    }

    pub fn records_per_block(mut self, n: usize) -> Self {
        self.records_per_block = n.max(1);
        self
    }

    pub fn key_compression(mut self, method: CompressionMethod) -> Self {
        self.key_compression = method;
        self
    }

    pub fn record_compression(mut self, method: CompressionMethod) -> Self {
        self.record_compression = method;
        self
    }

    /// Scrambles the key block info block (`Encrypted="2"`).
    pub fn encrypt_key_info(mut self) -> Self {
        self.encrypt_key_info = true;
        self
    }

    /// Encrypts the key block info summary under a registration key (`Encrypted="1"`).
    pub fn encrypt_summary(mut self, key: [u8; 16]) -> Self {
        self.summary_key = Some(key);
        self
    }

    /// Declares record block `block` to decode to `delta` more bytes than it does.
    pub fn record_size_delta(mut self, block: usize, delta: i64) -> Self {
        self.record_size_deltas.push((block, delta));
        self
    }

    /// Declares `delta` more records than there are keys.
    pub fn record_entry_count_delta(mut self, delta: i64) -> Self {
        self.record_entry_count_delta = delta;
        self
    }

    fn encoding(&self) -> &'static Encoding {
        match self.kind {
            ArchiveKind::Mdd => encoding_rs::UTF_16LE,
            ArchiveKind::Mdx => get_encoding_object_by_label(&self.encoding_label).unwrap(),
        }
    }

    fn is_utf16(&self) -> bool {
        self.encoding() == encoding_rs::UTF_16LE
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        if self.is_utf16() {
            // encoding_rs never encodes to UTF-16
            text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
        } else {
            let (bytes, _, had_errors) = self.encoding().encode(text);
            assert!(!had_errors, "{:?} is not representable in {}", text, self.encoding().name());
            bytes.into_owned()
        }
    }

    fn terminator(&self) -> Vec<u8> {
        vec![0; if self.is_utf16() { 2 } else { 1 }]
    }

    fn record_bytes(&self, record: &Record) -> Vec<u8> {
        match record {
            Record::Text(text) => {
                let mut bytes = self.encode(text);
                bytes.extend(self.terminator());
                bytes
            }
            Record::Raw(bytes) => bytes.clone(),
        }
    }

    /// Logical offsets of every record, in entry order.
    pub fn record_offsets(&self) -> Vec<u64> {
        let mut offset = 0u64;
        self.entries.iter()
            .map(|(_, record)| {
                let start = offset;
                offset += self.record_bytes(record).len() as u64;
                start
            })
            .collect()
    }

    fn write_uint(&self, out: &mut Vec<u8>, value: u64) {
        match self.layout {
            Layout::V1 => out.write_u32::<BigEndian>(value as u32).unwrap(),
            Layout::V2 => out.write_u64::<BigEndian>(value).unwrap(),
        }
    }

    fn header_frame(&self) -> Vec<u8> {
        let version = match self.layout {
            Layout::V1 => "1.2",
            Layout::V2 => "2.0",
        };
        let encrypted = match (self.summary_key.is_some(), self.encrypt_key_info) {
            (false, false) => "No".to_string(),
            (summary, info) => ((summary as u8) | ((info as u8) << 1)).to_string(),
        };
        let yes_no = |flag: bool| if flag { "Yes" } else { "No" };
        let mut xml = match self.kind {
            ArchiveKind::Mdx => format!(
                r#"<Dictionary GeneratedByEngineVersion="{v}" RequiredEngineVersion="{v}" Encrypted="{e}" Encoding="{enc}" Format="Html" KeyCaseSensitive="{cs}" StripKey="{sk}" Title="Test Dictionary" Description="Built in memory" CreationDate="2026-10-19""#,
                v = version, e = encrypted, enc = self.encoding_label,
                cs = yes_no(self.case_sensitive), sk = yes_no(self.strip_key),
            ),
            ArchiveKind::Mdd => format!(
                r#"<Library_Data GeneratedByEngineVersion="{v}" RequiredEngineVersion="{v}" Encrypted="{e}" Format="" KeyCaseSensitive="{cs}" Title="Test Resources""#,
                v = version, e = encrypted, cs = yes_no(self.case_sensitive),
            ),
        };
        for (name, value) in &self.extra_attrs {
            xml.push_str(&format!(r#" {}="{}""#, name, quick_xml::escape::escape(value.as_str())));
        }
        xml.push_str("/>\r\n");

        let text: Vec<u8> = match self.kind {
            ArchiveKind::Mdd => xml.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect(),
            ArchiveKind::Mdx if self.is_utf16() => xml.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect(),
            ArchiveKind::Mdx => xml.into_bytes(),
        };
        let mut out = Vec::new();
        out.write_u32::<BigEndian>(text.len() as u32).unwrap();
        out.extend_from_slice(&text);
        out.write_u32::<LittleEndian>(adler::adler32_slice(&text)).unwrap();
        out
    }

    fn write_info_key(&self, out: &mut Vec<u8>, key: &str) {
        let bytes = self.encode(key);
        let units = if self.is_utf16() { bytes.len() / 2 } else { bytes.len() };
        match self.layout {
            Layout::V1 => {
                out.push(units as u8);
                out.extend_from_slice(&bytes);
            }
            Layout::V2 => {
                out.write_u16::<BigEndian>(units as u16).unwrap();
                out.extend_from_slice(&bytes);
                out.extend(self.terminator());
            }
        }
    }

    /// Key blocks and the table describing them.
    fn key_blocks(&self, offsets: &[u64]) -> (Vec<u8>, Vec<u8>, u64) {
        let mut table = Vec::new();
        let mut blocks = Vec::new();
        let mut block_count = 0u64;
        let numbered: Vec<_> = self.entries.iter().zip(offsets).collect();
        for chunk in numbered.chunks(self.keys_per_block) {
            let mut payload = Vec::new();
            for &(entry, &offset) in chunk {
                self.write_uint(&mut payload, offset);
                payload.extend(self.encode(&entry.0));
                payload.extend(self.terminator());
            }
            let frame = frame_block(&payload, self.key_compression, false);

            let first_key = &chunk[0].0.0;
            let last_key = &chunk[chunk.len() - 1].0.0;
            self.write_uint(&mut table, chunk.len() as u64);
            self.write_info_key(&mut table, first_key);
            self.write_info_key(&mut table, last_key);
            self.write_uint(&mut table, frame.len() as u64);
            self.write_uint(&mut table, payload.len() as u64);
            blocks.extend(frame);
            block_count += 1;
        }
        (table, blocks, block_count)
    }

    fn key_info(&self, table: &[u8], key_blocks_len: u64, block_count: u64) -> Vec<u8> {
        let entry_count = self.entries.len() as u64;
        let mut out = Vec::new();
        match self.layout {
            Layout::V1 => {
                for value in [block_count, entry_count, table.len() as u64, key_blocks_len] {
                    out.write_u32::<BigEndian>(value as u32).unwrap();
                }
                out.extend_from_slice(table);
            }
            Layout::V2 => {
                let framed = frame_block(table, self.key_compression, self.encrypt_key_info);
                let mut summary = Vec::new();
                for value in [block_count, entry_count, table.len() as u64, framed.len() as u64, key_blocks_len] {
                    summary.write_u64::<BigEndian>(value).unwrap();
                }
                let checksum = adler::adler32_slice(&summary);
                match &self.summary_key {
                    Some(key) => out.extend(decrypt_salsa20(&summary, key).unwrap()),
                    None => out.extend_from_slice(&summary),
                }
                out.write_u32::<BigEndian>(checksum).unwrap();
                out.extend(framed);
            }
        }
        out
    }

    /// Record-block-info header and table, then the record blocks.
    fn records(&self) -> (Vec<u8>, Vec<u8>) {
        let mut rows = Vec::new();
        let mut blocks = Vec::new();
        let chunks: Vec<_> = self.entries.chunks(self.records_per_block).collect();
        for (index, chunk) in chunks.iter().enumerate() {
            let payload: Vec<u8> = chunk.iter().flat_map(|(_, record)| self.record_bytes(record)).collect();
            let frame = frame_block(&payload, self.record_compression, false);
            let delta: i64 = self.record_size_deltas.iter()
                .filter(|(block, _)| *block == index)
                .map(|(_, delta)| *delta)
                .sum();
            self.write_uint(&mut rows, frame.len() as u64);
            self.write_uint(&mut rows, (payload.len() as i64 + delta) as u64);
            blocks.extend(frame);
        }
        let mut info = Vec::new();
        self.write_uint(&mut info, chunks.len() as u64);
        self.write_uint(&mut info, (self.entries.len() as i64 + self.record_entry_count_delta) as u64);
        self.write_uint(&mut info, rows.len() as u64);
        self.write_uint(&mut info, blocks.len() as u64);
        info.extend(rows);
        (info, blocks)
    }

    fn assemble(&self) -> (Vec<u8>, SectionOffsets) {
        let offsets = self.record_offsets();
        let mut out = self.header_frame();
        let key_info_offset = out.len();

        let (table, key_blocks, block_count) = self.key_blocks(&offsets);
        out.extend(self.key_info(&table, key_blocks.len() as u64, block_count));
        let key_blocks_offset = out.len();
        out.extend(key_blocks);

        let record_info_offset = out.len();
        let (record_info, record_blocks) = self.records();
        out.extend(record_info);
        let record_blocks_offset = out.len();
        out.extend(record_blocks);

        let sections = SectionOffsets {
            key_info: key_info_offset,
            key_blocks: key_blocks_offset,
            record_info: record_info_offset,
            record_blocks: record_blocks_offset,
        };
        (out, sections)
    }

    pub fn build(&self) -> Vec<u8> {
        self.assemble().0
    }

    pub fn section_offsets(&self) -> SectionOffsets {
        self.assemble().1
    }

    pub fn key_info_offset(&self) -> usize {
        self.section_offsets().key_info
    }
}
