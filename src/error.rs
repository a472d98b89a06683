//! All error types used in this crate

use crate::encoding;
use crate::entry::Method;

/// Any zip-related error, from invalid archives to encoding problems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not a valid zip file, or a variant that is unsupported.
    #[error("format: {0}")]
    Format(#[from] FormatError),

    /// Something is not supported by this crate
    #[error("unsupported: {0}")]
    Unsupported(#[from] UnsupportedError),

    /// Invalid UTF-8, a code page this crate doesn't speak, or any problem
    /// encountered while decoding text in general.
    #[error("encoding: {0:?}")]
    Encoding(#[from] encoding::DecodingError),

    /// An extra field could not be encoded or decoded.
    #[error("extra field: {0}")]
    ExtraField(#[from] ExtraFieldError),

    /// I/O-related error
    #[error("io: {0}")]
    IO(#[from] std::io::Error),

    /// Decompression-related error
    #[error("{method:?} decompression error: {msg}")]
    Decompression {
        /// The compression method that failed
        method: Method,
        /// Additional information
        msg: String,
    },

    /// The 12-byte encryption header did not validate against the entry's
    /// CRC-32: the password is (almost certainly) wrong.
    #[error("wrong password for encrypted entry")]
    BadPassword,

    /// A nonsensical argument: opening a sequential stream for reading,
    /// appending to an empty stream, and the like.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The logical write position would exceed 2^63 - 1.
    #[error("write position would exceed 2^63 - 1")]
    WriteLimit,
}

impl Error {
    /// Create a new error indicating that the given method is not supported.
    pub fn method_not_supported(method: Method) -> Self {
        Self::Unsupported(UnsupportedError::MethodNotSupported(method))
    }
}

/// Some part of the zip format is not supported by this crate.
#[derive(Debug, thiserror::Error)]
pub enum UnsupportedError {
    /// The compression method is not supported.
    #[error("compression method not supported: {0:?}")]
    MethodNotSupported(Method),

    /// The entry is encrypted with the "Strong Encryption" scheme of
    /// appnote 6.2, which this crate does not implement.
    #[error("strong encryption is not supported")]
    StrongEncryption,

    /// The deflate stream requested an external preset dictionary.
    #[error("deflate stream requires an external dictionary")]
    DictionaryNeeded,
}

/// Specific zip format errors, mostly due to invalid zip archives but that could also stem from
/// implementation shortcomings.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The end of central directory record was not found.
    ///
    /// This usually indicates that the file being read is not a zip archive.
    #[error("end of central directory record not found")]
    DirectoryEndSignatureNotFound,

    /// The zip64 end of central directory record could not be parsed.
    ///
    /// This is only returned when a zip64 end of central directory *locator* was found,
    /// so the archive should be zip64, but isn't.
    #[error("zip64 end of central directory record not found")]
    Directory64EndRecordInvalid,

    /// Corrupted/partial zip file: the offset we found for the central directory
    /// points outside of the current file.
    #[error("directory offset points outside of file")]
    DirectoryOffsetPointsOutsideFile,

    /// End of central directory record claims an impossible number of files.
    ///
    /// Each entry takes a minimum amount of size, so if the overall archive size is smaller than
    /// claimed_records_count * minimum_entry_size, we know it's not a valid zip file.
    #[error("impossible number of files: claims to have {claimed_records_count}, but zip size is {zip_size}")]
    ImpossibleNumberOfFiles {
        /// number of files claimed in the end of central directory record
        claimed_records_count: u64,
        /// total size of the zip file
        zip_size: u64,
    },

    /// The central record is corrupted somewhat.
    ///
    /// This can happen when the end of central directory record advertises
    /// a certain number of files, but we weren't able to read the same number of central directory
    /// headers.
    #[error("invalid central record: expected to read {expected} files, got {actual}")]
    InvalidCentralRecord {
        /// expected number of files
        expected: u64,
        /// actual number of files
        actual: u64,
    },

    /// An extra field (that we support) was not decoded correctly.
    ///
    /// This can indicate an invalid zip archive, or an implementation error in this crate.
    #[error("could not decode extra field")]
    InvalidExtraField,

    /// The local file header (before the file data) could not be parsed correctly.
    #[error("invalid local file header")]
    InvalidLocalHeader,

    /// The data descriptor (after the file data) could not be parsed correctly.
    #[error("invalid data descriptor")]
    InvalidDataDescriptor,

    /// The uncompressed size didn't match
    #[error("uncompressed size didn't match: expected {expected}, got {actual}")]
    WrongSize {
        /// expected size in bytes (from the central directory, data descriptor, etc.)
        expected: u64,
        /// actual size in bytes (from decompressing the entry)
        actual: u64,
    },

    /// The CRC-32 checksum didn't match.
    #[error("checksum didn't match: expected {expected:x?}, got {actual:x?}")]
    WrongChecksum {
        /// expected checksum (from the central directory, etc.)
        expected: u32,
        /// actual checksum (from decompressing the entry)
        actual: u32,
    },
}

/// Errors encoding or decoding the extra field TLV sequence.
#[derive(Debug, thiserror::Error)]
pub enum ExtraFieldError {
    /// A declared record length overruns the buffer, or the buffer ends in
    /// the middle of a record header.
    #[error("extra field data is corrupted")]
    CorruptedData,

    /// A single record's payload exceeds the u16 length field.
    #[error("extra field 0x{tag:04x} payload too large: {len} bytes")]
    FieldSizeLimit {
        /// tag of the offending record
        tag: u16,
        /// actual payload length
        len: usize,
    },

    /// The encoded sequence would exceed the allowed total size.
    #[error("extra fields too large: {size} bytes, at most {max} allowed")]
    BufferSizeLimit {
        /// cumulative encoded size
        size: usize,
        /// maximum allowed size
        max: usize,
    },
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::IO(e) => e,
            e => std::io::Error::new(std::io::ErrorKind::Other, e),
        }
    }
}
