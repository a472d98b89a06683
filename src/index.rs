//! The central directory index: locating the end-of-central-directory
//! records, and lazily scanning central directory entries into a pair of
//! path lookup maps.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use tracing::trace;
use winnow::{Parser, Partial};

use crate::entry::{EntryInfo, ZipOptions};
use crate::error::{Error, FormatError};
use crate::format::{
    DirectoryHeader, EndOfCentralDirectory, EndOfCentralDirectory64Locator,
    EndOfCentralDirectory64Record, EndOfCentralDirectoryRecord, ExtraFieldSettings,
    ExtraFields, ExtraTimestampField, ExtraZip64Field, Located, TAG_EXTENDED_TIMESTAMP,
    TAG_ZIP64,
};
use crate::format::{unix_to_datetime, zero_datetime};
use crate::path::{clean_path, decode_comment, decode_path, TextCodecs};

/// How path lookups compare names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseSensitivity {
    /// Platform default: insensitive on Windows and macOS, sensitive
    /// elsewhere.
    #[default]
    Default,
    /// Compare byte-for-byte.
    Sensitive,
    /// Compare after lowercasing.
    Insensitive,
}

impl CaseSensitivity {
    /// Resolve to a concrete answer: is the comparison case-sensitive?
    pub fn is_sensitive(self) -> bool {
        match self {
            CaseSensitivity::Sensitive => true,
            CaseSensitivity::Insensitive => false,
            CaseSensitivity::Default => {
                cfg_if::cfg_if! {
                    if #[cfg(any(windows, target_os = "macos"))] {
                        false
                    } else {
                        true
                    }
                }
            }
        }
    }
}

/// Lowercasing hook for case-insensitive lookups. The default is ASCII
/// lowercasing; callers with locale-aware needs supply their own.
pub type Lowercaser = fn(&str) -> String;

pub(crate) fn ascii_lowercase(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// The parsed trailing records plus the lazily scanned central directory.
pub(crate) struct DirectoryIndex {
    /// the whole central directory, read upfront
    dir_buf: Vec<u8>,
    /// parse position within [Self::dir_buf]; everything before it has
    /// been mapped already
    cursor: usize,
    /// where the central directory starts in the underlying stream
    dir_offset: u64,
    /// prepended-data offset (self-extractor prefixes and the like)
    global_offset: i64,
    /// number of entries the end records claim
    total_entries: u64,
    /// a zip64 end-of-central-directory record was present
    pub(crate) is_zip64: bool,
    /// raw archive comment bytes
    pub(crate) comment_raw: Vec<u8>,
    /// entries scanned so far, in central directory order
    entries: Vec<EntryInfo>,
    by_path: HashMap<String, usize>,
    by_path_ci: HashMap<String, usize>,
    lowercase: Lowercaser,
}

impl DirectoryIndex {
    /// Locate the trailing records and pull the central directory into
    /// memory. `stream` may be positioned anywhere.
    pub(crate) fn open<R: Read + Seek>(stream: &mut R, lowercase: Lowercaser) -> Result<Self, Error> {
        let size = stream.seek(SeekFrom::End(0))?;

        // the comment is at most 64 KiB, the fixed part 22 bytes
        let tail_len = size.min(65536 + EndOfCentralDirectoryRecord::MIN_LENGTH as u64 + 2);
        stream.seek(SeekFrom::Start(size - tail_len))?;
        let mut tail = vec![0u8; tail_len as usize];
        stream.read_exact(&mut tail)?;

        let mut located = EndOfCentralDirectoryRecord::find_in_block(&tail)
            .ok_or(FormatError::DirectoryEndSignatureNotFound)?;
        located.offset += size - tail_len;
        trace!(offset = located.offset, "found end of central directory");

        let dir64 = Self::read_zip64(stream, &located)?;
        let is_zip64 = dir64.is_some();
        let eocd = EndOfCentralDirectory::new(size, located, dir64)?;

        let total_entries = eocd.directory_records();
        // each entry needs at least a central directory record; an end
        // record claiming more than fits is lying
        if total_entries > size / DirectoryHeader::LENGTH as u64 {
            return Err(FormatError::ImpossibleNumberOfFiles {
                claimed_records_count: total_entries,
                zip_size: size,
            }
            .into());
        }
        let dir_offset = eocd.directory_offset();
        let dir_size = eocd.directory_size();
        if dir_offset.checked_add(dir_size).map_or(true, |end| end > size) {
            return Err(FormatError::DirectoryOffsetPointsOutsideFile.into());
        }

        stream.seek(SeekFrom::Start(dir_offset))?;
        let mut dir_buf = vec![0u8; dir_size as usize];
        stream.read_exact(&mut dir_buf)?;

        Ok(Self {
            dir_buf,
            cursor: 0,
            dir_offset,
            global_offset: eocd.global_offset,
            total_entries,
            is_zip64,
            comment_raw: eocd.comment().to_vec(),
            entries: Vec::new(),
            by_path: HashMap::new(),
            by_path_ci: HashMap::new(),
            lowercase,
        })
    }

    /// Check for a zip64 locator right before the end record, and follow
    /// it to the zip64 end record if there is one.
    fn read_zip64<R: Read + Seek>(
        stream: &mut R,
        eocd: &Located<EndOfCentralDirectoryRecord>,
    ) -> Result<Option<Located<EndOfCentralDirectory64Record>>, Error> {
        let locator_len = EndOfCentralDirectory64Locator::LENGTH as u64;
        if eocd.offset < locator_len {
            return Ok(None);
        }

        stream.seek(SeekFrom::Start(eocd.offset - locator_len))?;
        let mut block = [0u8; EndOfCentralDirectory64Locator::LENGTH];
        stream.read_exact(&mut block)?;

        let locator = match EndOfCentralDirectory64Locator::parser
            .parse_peek(Partial::new(&block[..]))
        {
            Ok((_, locator)) => locator,
            Err(_) => return Ok(None),
        };
        trace!(
            offset = locator.directory_offset,
            "found zip64 end of central directory locator"
        );

        // the fixed part of the zip64 end record is 56 bytes
        stream.seek(SeekFrom::Start(locator.directory_offset))?;
        let mut block = [0u8; 56];
        stream.read_exact(&mut block)?;

        match EndOfCentralDirectory64Record::parser.parse_peek(Partial::new(&block[..])) {
            Ok((_, record)) => Ok(Some(Located {
                offset: locator.directory_offset,
                inner: record,
            })),
            Err(_) => Err(FormatError::Directory64EndRecordInvalid.into()),
        }
    }

    /// Number of entries the end records claim.
    pub(crate) fn total_entries(&self) -> u64 {
        self.total_entries
    }

    /// Absolute offset of the central directory in the stream.
    pub(crate) fn directory_offset(&self) -> u64 {
        self.dir_offset
    }

    /// Prefix length of non-zip data at the start of the stream.
    pub(crate) fn global_offset(&self) -> i64 {
        self.global_offset
    }

    /// The raw central directory bytes, as read from the stream.
    pub(crate) fn raw_directory(&self) -> &[u8] {
        &self.dir_buf
    }

    /// Entries mapped so far.
    pub(crate) fn mapped(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entry(&self, index: usize) -> Option<&EntryInfo> {
        self.entries.get(index)
    }

    /// Parse the next unmapped central directory entry, insert it into the
    /// lookup maps, and return its index.
    pub(crate) fn scan_next(&mut self, codecs: &TextCodecs) -> Result<Option<usize>, Error> {
        if self.entries.len() as u64 >= self.total_entries {
            return Ok(None);
        }
        if self.cursor >= self.dir_buf.len() {
            return Err(FormatError::InvalidCentralRecord {
                expected: self.total_entries,
                actual: self.entries.len() as u64,
            }
            .into());
        }

        let mut input = Partial::new(&self.dir_buf[self.cursor..]);
        let header = match DirectoryHeader::parser.parse_next(&mut input) {
            Ok(header) => header,
            Err(_) => {
                return Err(FormatError::InvalidCentralRecord {
                    expected: self.total_entries,
                    actual: self.entries.len() as u64,
                }
                .into());
            }
        };
        self.cursor += header.len();

        let entry = self.entry_from_header(&header, codecs)?;
        let index = self.entries.len();

        let key = clean_path(&entry.path);
        self.by_path.entry(key.clone()).or_insert(index);
        // first inserted wins on a case clash
        self.by_path_ci
            .entry((self.lowercase)(&key))
            .or_insert(index);

        self.entries.push(entry);
        Ok(Some(index))
    }

    /// Convert a parsed central record into entry metadata: apply the
    /// zip64 promotions, decode texts, and derive attributes.
    fn entry_from_header(
        &self,
        header: &DirectoryHeader,
        codecs: &TextCodecs,
    ) -> Result<EntryInfo, Error> {
        let central_extra = ExtraFields::parse(&header.extra.0)
            .map_err(|_| FormatError::InvalidExtraField)?;

        let mut uncompressed_size = header.uncompressed_size as u64;
        let mut compressed_size = header.compressed_size as u64;
        let mut header_offset = header.header_offset as u64;

        let settings = ExtraFieldSettings {
            needs_uncompressed_size: header.uncompressed_size == !0u32,
            needs_compressed_size: header.compressed_size == !0u32,
            needs_header_offset: header.header_offset == !0u32,
        };
        if let Some(data) = central_extra.get(TAG_ZIP64) {
            let z64 = ExtraZip64Field::parse(data, settings)
                .ok_or(FormatError::InvalidExtraField)?;
            if let Some(n) = z64.uncompressed_size {
                uncompressed_size = n;
            }
            if let Some(n) = z64.compressed_size {
                compressed_size = n;
            }
            if let Some(n) = z64.header_offset {
                header_offset = n;
            }
        }

        let options = ZipOptions(header.flags);
        let path = decode_path(&header.name.0, options, &central_extra, codecs)?;
        let comment = decode_comment(&header.comment.0, options, &central_extra, codecs)?;

        // best-effort timestamp from central information alone; opening the
        // entry refines this with the local header's extras
        let modified = central_extra
            .get(TAG_EXTENDED_TIMESTAMP)
            .and_then(ExtraTimestampField::parse_central)
            .and_then(|ts| ts.mtime)
            .and_then(|mtime| unix_to_datetime(mtime as i64))
            .or_else(|| header.modified.to_datetime())
            .unwrap_or_else(zero_datetime);

        let mut entry = EntryInfo {
            path,
            uncompressed_size: uncompressed_size as i64,
            compressed_size: compressed_size as i64,
            crc32: header.crc32,
            method: header.method,
            options,
            made_by: header.creator_version,
            version_needed: header.reader_version,
            internal_attrs: header.internal_attrs,
            external_attrs: header.external_attrs,
            disk_number: header.disk_nbr_start,
            modified,
            comment,
            central_extra,
            header_offset: (header_offset as i64 + self.global_offset) as u64,
            ..Default::default()
        };
        entry.derive_kind();
        Ok(entry)
    }

    /// Look up an entry by path, scanning further into the central
    /// directory only as far as needed.
    pub(crate) fn find(
        &mut self,
        path: &str,
        sensitive: bool,
        codecs: &TextCodecs,
    ) -> Result<Option<usize>, Error> {
        let needle = clean_path(path);
        let needle_ci = (self.lowercase)(&needle);

        let lookup = |this: &Self| {
            if sensitive {
                this.by_path.get(&needle).copied()
            } else {
                this.by_path_ci.get(&needle_ci).copied()
            }
        };

        if let Some(found) = lookup(self) {
            return Ok(Some(found));
        }

        // resume the scan from the last mapped entry
        while self.scan_next(codecs)?.is_some() {
            if let Some(found) = lookup(self) {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> Option<&mut EntryInfo> {
        self.entries.get_mut(index)
    }
}
