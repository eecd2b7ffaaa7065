//! Error types and result type for the crate.
//!
//! Every fallible operation returns [`Result<T>`]. Errors are built with `snafu`
//! and capture a backtrace at the point of construction.
//!
//! # Examples
//!
//! ```
//! use mdict_archive::{MdictError, Result};
//!
//! fn check_tag(tag: u8) -> Result<()> {
//!     if tag > 2 {
//!         return Err(MdictError::unsupported_compression(tag));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_tag(7).unwrap_err().is_unsupported_compression());
//! ```
//!
//! # Error Variants
//!
//! - [`MdictError::MalformedHeader`]: header document missing, unreadable or unsupported
//! - [`MdictError::TruncatedBlock`]: fewer bytes available than a section declares
//! - [`MdictError::CorruptBlock`]: checksum, size or count mismatch
//! - [`MdictError::UnsupportedCompression`]: unknown compression tag in a block frame
//! - [`MdictError::DecryptionFailed`]: no usable key for an encrypted section
//! - [`MdictError::OffsetOutOfRange`]: record offset beyond the record data
//! - [`MdictError::ArchiveClosed`]: the archive was closed
//! - [`MdictError::Io`]: the byte source failed

use std::io;

use snafu::{Backtrace, Snafu};

// Re-export snafu for context providers
pub use snafu;

/// Main error type for the crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MdictError {
    /// I/O error raised by the underlying byte source.
    #[snafu(display("IO error: {source}"))]
    Io {
        source: io::Error,
        backtrace: Backtrace,
    },

    /// The leading header document is absent, corrupt or describes an unsupported archive.
    #[snafu(display("Malformed header: {message}"))]
    MalformedHeader {
        message: String,
        backtrace: Backtrace,
    },

    /// A block or section is shorter than its declared length.
    #[snafu(display("Truncated block: expected {expected} bytes, {available} available"))]
    TruncatedBlock {
        expected: u64,
        available: u64,
        backtrace: Backtrace,
    },

    /// Decoded data failed a checksum, size or count check.
    #[snafu(display("Corrupt block: {message}"))]
    CorruptBlock {
        message: String,
        backtrace: Backtrace,
    },

    /// The compression tag of a block frame is not one of the known codecs.
    #[snafu(display("Unsupported compression tag: {tag:#04x}"))]
    UnsupportedCompression {
        tag: u8,
        backtrace: Backtrace,
    },

    /// An encrypted section could not be decrypted.
    #[snafu(display("Decryption failed: {message}"))]
    DecryptionFailed {
        message: String,
        backtrace: Backtrace,
    },

    /// A record offset does not fall inside the record data.
    #[snafu(display("Record offset {offset} out of range (total {total})"))]
    OffsetOutOfRange {
        offset: u64,
        total: u64,
        backtrace: Backtrace,
    },

    /// The archive has been closed.
    #[snafu(display("Archive closed"))]
    ArchiveClosed {
        backtrace: Backtrace,
    },

    /// Function was called with invalid parameters.
    #[snafu(display("Invalid parameter: {message}"))]
    InvalidParameter {
        message: String,
        backtrace: Backtrace,
    },
}

// A short read always means the source holds fewer bytes than a section declared.
impl From<io::Error> for MdictError {
    fn from(source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            return Self::TruncatedBlock {
                expected: 0,
                available: 0,
                backtrace: Backtrace::capture(),
            };
        }
        Self::Io { source, backtrace: Backtrace::capture() }
    }
}

impl From<hex::FromHexError> for MdictError {
    fn from(source: hex::FromHexError) -> Self {
        Self::InvalidParameter {
            message: format!("Invalid hex string: {}", source),
            backtrace: Backtrace::capture(),
        }
    }
}

impl From<serde_json::Error> for MdictError {
    fn from(source: serde_json::Error) -> Self {
        Self::InvalidParameter {
            message: format!("Invalid options: {}", source),
            backtrace: Backtrace::capture(),
        }
    }
}

/// Helper methods for creating errors without context providers.
impl MdictError {
    /// Creates a `MalformedHeader` error with the given message.
    pub fn malformed_header<S: Into<String>>(message: S) -> Self {
        Self::MalformedHeader {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Creates a `TruncatedBlock` error.
    pub fn truncated_block(expected: u64, available: u64) -> Self {
        Self::TruncatedBlock {
            expected,
            available,
            backtrace: Backtrace::capture(),
        }
    }

    /// Creates a `CorruptBlock` error with the given message.
    pub fn corrupt_block<S: Into<String>>(message: S) -> Self {
        Self::CorruptBlock {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Creates a `CorruptBlock` error describing an Adler-32 mismatch.
    pub fn checksum_mismatch(expected: u32, got: u32) -> Self {
        Self::corrupt_block(format!("checksum mismatch: expected {:#010x}, got {:#010x}", expected, got))
    }

    /// Creates a `CorruptBlock` error describing a decoded size mismatch.
    pub fn size_mismatch(expected: u64, got: u64) -> Self {
        Self::corrupt_block(format!("decoded size mismatch: expected {}, got {}", expected, got))
    }

    pub fn unsupported_compression(tag: u8) -> Self {
        Self::UnsupportedCompression {
            tag,
            backtrace: Backtrace::capture(),
        }
    }

    pub fn decryption_failed<S: Into<String>>(message: S) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn offset_out_of_range(offset: u64, total: u64) -> Self {
        Self::OffsetOutOfRange {
            offset,
            total,
            backtrace: Backtrace::capture(),
        }
    }

    pub fn archive_closed() -> Self {
        Self::ArchiveClosed {
            backtrace: Backtrace::capture(),
        }
    }

    /// Creates an `InvalidParameter` error with the given message.
    pub fn invalid_parameter<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameter {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Same variant and details with a fresh backtrace, for handing one failure to
    /// several callers.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            MdictError::Io { source, .. } => Self::Io {
                source: io::Error::new(source.kind(), source.to_string()),
                backtrace: Backtrace::capture(),
            },
            MdictError::MalformedHeader { message, .. } => Self::malformed_header(message.clone()),
            MdictError::TruncatedBlock { expected, available, .. } => Self::truncated_block(*expected, *available),
            MdictError::CorruptBlock { message, .. } => Self::corrupt_block(message.clone()),
            MdictError::UnsupportedCompression { tag, .. } => Self::unsupported_compression(*tag),
            MdictError::DecryptionFailed { message, .. } => Self::decryption_failed(message.clone()),
            MdictError::OffsetOutOfRange { offset, total, .. } => Self::offset_out_of_range(*offset, *total),
            MdictError::ArchiveClosed { .. } => Self::archive_closed(),
            MdictError::InvalidParameter { message, .. } => Self::invalid_parameter(message.clone()),
        }
    }

    pub fn is_malformed_header(&self) -> bool {
        matches!(self, MdictError::MalformedHeader { .. })
    }

    pub fn is_truncated_block(&self) -> bool {
        matches!(self, MdictError::TruncatedBlock { .. })
    }

    pub fn is_corrupt_block(&self) -> bool {
        matches!(self, MdictError::CorruptBlock { .. })
    }

    pub fn is_unsupported_compression(&self) -> bool {
        matches!(self, MdictError::UnsupportedCompression { .. })
    }

    pub fn is_decryption_failed(&self) -> bool {
        matches!(self, MdictError::DecryptionFailed { .. })
    }

    pub fn is_offset_out_of_range(&self) -> bool {
        matches!(self, MdictError::OffsetOutOfRange { .. })
    }

    pub fn is_archive_closed(&self) -> bool {
        matches!(self, MdictError::ArchiveClosed { .. })
    }
}

/// A specialized `Result` type for archive operations.
pub type Result<T> = std::result::Result<T, MdictError>;
