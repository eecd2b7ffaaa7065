//! The archive facade: open an `.mdx` or `.mdd` file and look keys up.
//!
//! Opening reads the header, the key-block-info section, every key block and the
//! record-block-info section, in that order. Record blocks stay on disk until a
//! lookup needs one; decoded blocks are shared through a bounded cache.
//!
//! # Examples
//!
//! ```no_run
//! use mdict_archive::{Archive, ArchiveOptions};
//!
//! # fn main() -> mdict_archive::Result<()> {
//! let archive = Archive::open_path("dictionary.mdx", ArchiveOptions::default())?;
//! for definition in archive.lookup_exact("apple")? {
//!     println!("{}", definition);
//! }
//! for entry in archive.lookup_prefix("app")?.take(10) {
//!     println!("{} -> {}", entry.key(), entry.resolve()?);
//! }
//! archive.close()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::entry::{EntryIter, RecordValue};
use super::options::ArchiveOptions;
use crate::crypto::encryption::RegistrationKey;
use crate::storage::block_codec::decode_block;
use crate::storage::header::{ArchiveKind, HeaderMetadata};
use crate::storage::key_block::read_key_blocks;
use crate::storage::key_block_info::KeyBlockInfoSection;
use crate::storage::key_index::KeyIndex;
use crate::storage::reader_helper::decode_bytes_to_string;
use crate::storage::record_cache::{CacheStats, RecordBlockCache};
use crate::storage::record_directory::{RecordBlockDescriptor, RecordBlockDirectory};
use crate::utils::io_utils::{read_at, stream_len, to_usize};
use crate::{MdictError, Result};

const LINK_PREFIX: &[u8] = b"@@@LINK=";
const LINK_PREFIX_W: &[u8] = &[
    0x40, 0x00, // '@'
    0x40, 0x00, // '@'
    0x40, 0x00, // '@'
    0x4C, 0x00, // 'L'
    0x49, 0x00, // 'I'
    0x4E, 0x00, // 'N'
    0x4B, 0x00, // 'K'
    0x3D, 0x00, // '='
];

/// An open MDict archive.
///
/// All lookups take `&self`; the archive can be shared between threads. Only the
/// byte source (locked while compressed bytes are read) and the block cache change
/// after opening.
pub struct Archive<R: Read + Seek + Send> {
    header: HeaderMetadata,
    index: KeyIndex,
    directory: RecordBlockDirectory,
    cache: RecordBlockCache,
    source: Mutex<Option<R>>,
    closed: AtomicBool,
    follow_links: bool,
}

impl Archive<BufReader<File>> {
    /// Opens an archive file.
    ///
    /// Without a registration in `options`, a `.key` file next to the archive
    /// (same base name) supplies one if present.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the `.mdx` or `.mdd` file
    /// * `options` - Cache bound, validation mode and registration data
    pub fn open_path<P: AsRef<Path>>(path: P, mut options: ArchiveOptions) -> Result<Self> {
        let path = path.as_ref();
        if options.registration.is_none() {
            options.registration = RegistrationKey::from_key_file(path.with_extension("key"));
        }
        let file = File::open(path)?;
        debug!("Opening {}", path.display());
        Archive::open(BufReader::new(file), options)
    }

    /// Opens the `.mdd` resource archive that accompanies an `.mdx` file.
    ///
    /// # Errors
    ///
    /// `Io` if there is no companion file, `MalformedHeader` if it is not a
    /// resource archive, or any error of [`Archive::open_path`].
    pub fn open_resources<P: AsRef<Path>>(mdx_path: P, options: ArchiveOptions) -> Result<Self> {
        let archive = Archive::open_path(mdx_path.as_ref().with_extension("mdd"), options)?;
        if archive.header.kind != ArchiveKind::Mdd {
            return Err(MdictError::malformed_header(format!(
                "{} is not a resource archive", mdx_path.as_ref().with_extension("mdd").display()
            )));
        }
        Ok(archive)
    }
}

impl<R: Read + Seek + Send> Archive<R> {
    /// Opens an archive from any seekable byte source.
    ///
    /// Either the whole index is built or an error is returned; there is no
    /// partially opened archive.
    ///
    /// # Errors
    ///
    /// `MalformedHeader`, `TruncatedBlock`, `CorruptBlock`, `UnsupportedCompression`,
    /// `DecryptionFailed` or `Io`, from the first section that fails.
    pub fn open(mut source: R, options: ArchiveOptions) -> Result<Self> {
        let source_len = stream_len(&mut source)?;
        source.seek(SeekFrom::Start(0))?;

        let header = HeaderMetadata::from_reader(&mut source)?;
        let registration_key = if header.encryption.key_info_header {
            let registration = options.registration.as_ref()
                .ok_or_else(|| MdictError::decryption_failed("archive is registered, a registration key is required"))?;
            Some(registration.derive_key()?)
        } else {
            None
        };

        let key_info = KeyBlockInfoSection::from_reader(&mut source, &header, registration_key.as_ref().map(|k| &k[..]))?;
        let entries = read_key_blocks(&mut source, &key_info, &header)?;
        let directory = RecordBlockDirectory::from_reader(&mut source, header.version, source_len)?;
        if directory.entry_count != entries.len() as u64 {
            return Err(MdictError::corrupt_block(format!(
                "record section declares {} entries, key index holds {}", directory.entry_count, entries.len()
            )));
        }
        if let Some(entry) = entries.iter().find(|e| e.record_offset >= directory.total_decompressed()) {
            warn!("Key {:?} points past the record data ({} >= {})",
                entry.key, entry.record_offset, directory.total_decompressed());
        }

        let index = KeyIndex::build(entries, header.key_folding());
        let archive = Self {
            cache: RecordBlockCache::new(options.cache),
            source: Mutex::new(Some(source)),
            closed: AtomicBool::new(false),
            follow_links: options.follow_links,
            header,
            index,
            directory,
        };
        if !options.lazy_records {
            archive.validate()?;
        }
        info!(
            "Opened {:?} archive {:?}: {} entries, {} key blocks, {} record blocks",
            archive.header.kind, archive.header.title, archive.index.len(),
            key_info.blocks.len(), archive.directory.len()
        );
        Ok(archive)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MdictError::archive_closed());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn header(&self) -> Result<&HeaderMetadata> {
        self.ensure_open()?;
        Ok(&self.header)
    }

    /// Number of key entries.
    pub fn len(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.index.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.ensure_open()?;
        Ok(self.cache.stats())
    }

    /// Every record of every entry whose key matches `key`, in file order.
    /// No match gives an empty vector.
    pub fn lookup_exact(&self, key: &str) -> Result<Vec<RecordValue>> {
        self.ensure_open()?;
        self.index.exact(key).into_iter().map(|ordinal| self.resolve(ordinal)).collect()
    }

    /// The record of the first entry matching `key`.
    pub fn lookup_first(&self, key: &str) -> Result<Option<RecordValue>> {
        self.ensure_open()?;
        self.index.first(key).map(|ordinal| self.resolve(ordinal)).transpose()
    }

    /// Entries whose key starts with `prefix`, in file order. Records are resolved
    /// on demand.
    pub fn lookup_prefix(&self, prefix: &str) -> Result<EntryIter<'_, R>> {
        self.ensure_open()?;
        // a prefix that folds to nothing matches every entry
        if self.index.folding().fold(prefix).is_empty() {
            return Ok(EntryIter::all(self, self.index.len()));
        }
        Ok(EntryIter::matches(self, self.index.prefix(prefix)))
    }

    /// Every entry in file order. Records are resolved on demand.
    pub fn iterate_all(&self) -> Result<EntryIter<'_, R>> {
        self.ensure_open()?;
        Ok(EntryIter::all(self, self.index.len()))
    }

    /// Releases the byte source and the cached blocks. Every later call fails with
    /// `ArchiveClosed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(MdictError::archive_closed());
        }
        let source = self.source.lock().take();
        drop(source);
        self.cache.clear();
        debug!("Archive {:?} closed", self.header.title);
        Ok(())
    }

    /// Decodes every record block and checks every record offset, without caching.
    pub fn validate(&self) -> Result<()> {
        self.ensure_open()?;
        for descriptor in self.directory.blocks() {
            self.load_block(descriptor)?;
        }
        for entry in self.index.entries() {
            self.directory.locate(entry.record_offset)?;
        }
        debug!("Validated {} record blocks", self.directory.len());
        Ok(())
    }

    pub(crate) fn entry_key(&self, ordinal: usize) -> &str {
        &self.index.entries()[ordinal].key
    }

    pub(crate) fn entry_record_offset(&self, ordinal: usize) -> u64 {
        self.index.entries()[ordinal].record_offset
    }

    fn load_block(&self, descriptor: &RecordBlockDescriptor) -> Result<Vec<u8>> {
        let compressed_len = to_usize(descriptor.compressed_len, "record block size")?;
        let decompressed_len = to_usize(descriptor.decompressed_len, "record block size")?;
        let raw = {
            let mut source = self.source.lock();
            let source = source.as_mut().ok_or_else(MdictError::archive_closed)?;
            read_at(source, descriptor.physical_offset, compressed_len)?
        };
        decode_block(&raw, decompressed_len, false)
    }

    fn block(&self, index: usize) -> Result<(Arc<[u8]>, RecordBlockDescriptor)> {
        let descriptor = *self.directory.block(index)
            .ok_or_else(|| MdictError::corrupt_block(format!("record block {} does not exist", index)))?;
        let data = self.cache.get_or_decode(index, descriptor.decompressed_len, || self.load_block(&descriptor))?;
        Ok((data, descriptor))
    }

    /// Raw bytes of the record starting at logical `offset`.
    fn record_bytes(&self, offset: u64) -> Result<Vec<u8>> {
        let (block_index, start) = self.directory.locate(offset)?;
        let (data, descriptor) = self.block(block_index)?;
        let end = self.index.next_record_start(offset)
            .unwrap_or(self.directory.total_decompressed())
            .min(descriptor.logical_end());
        let start = start as usize;
        let end = (end - descriptor.logical_offset) as usize;
        Ok(data[start..end].to_vec())
    }

    fn link_target(&self, raw: &[u8]) -> Option<String> {
        let prefix = if self.header.is_utf16() { LINK_PREFIX_W } else { LINK_PREFIX };
        if !raw.starts_with(prefix) {
            return None;
        }
        let text = decode_bytes_to_string(&raw[prefix.len()..], self.header.encoding);
        Some(text.trim().to_string())
    }

    /// Follows `@@@LINK=` redirects from `ordinal` and returns the final record bytes.
    fn resolve_links(&self, ordinal: usize, raw: Vec<u8>) -> Result<Vec<u8>> {
        let mut visited = HashSet::new();
        visited.insert(ordinal);
        let mut raw = raw;
        while let Some(target) = self.link_target(&raw) {
            let next = self.index.first(&target)
                .ok_or_else(|| MdictError::corrupt_block(format!(
                    "{:?} links to missing entry {:?}", self.entry_key(ordinal), target
                )))?;
            if !visited.insert(next) {
                return Err(MdictError::corrupt_block(format!(
                    "cyclic link from {:?} through {:?}", self.entry_key(ordinal), target
                )));
            }
            raw = self.record_bytes(self.entry_record_offset(next))?;
        }
        Ok(raw)
    }

    pub(crate) fn resolve(&self, ordinal: usize) -> Result<RecordValue> {
        self.ensure_open()?;
        let raw = self.record_bytes(self.entry_record_offset(ordinal))?;
        if self.header.is_mdd() {
            return Ok(RecordValue::Binary(raw));
        }
        let raw = if self.follow_links { self.resolve_links(ordinal, raw)? } else { raw };
        Ok(RecordValue::Text(decode_bytes_to_string(&raw, self.header.encoding)))
    }
}
