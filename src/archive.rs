//! The read-side archive handle: parses the trailing records eagerly,
//! scans the central directory lazily, and opens per-entry payload
//! readers.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{trace, warn};

use crate::crypto::Cipher;
use crate::entry::{EntryInfo, EntryKind};
use crate::error::{Error, FormatError};
use crate::format::{
    unix_to_datetime, ExtraFields, ExtraNtfsField, ExtraTimestampField, ExtraUnixField,
    LocalFileHeaderRecord, MsdosTimestamp, TAG_EXTENDED_TIMESTAMP, TAG_INFOZIP_UNIX, TAG_NTFS,
    TAG_UNIX,
};
use crate::index::{ascii_lowercase, CaseSensitivity, DirectoryIndex, Lowercaser};
use crate::path::TextCodecs;
use crate::read::EntryReader;

/// Configuration for opening an archive.
#[derive(Clone, Copy)]
pub struct ArchiveOptions {
    /// Codecs for decoding legacy paths and comments. `None` fields mean
    /// "detect".
    pub codecs: TextCodecs,
    /// Default case sensitivity for path lookups.
    pub case_sensitivity: CaseSensitivity,
    /// Lowercasing hook for the case-insensitive lookup map.
    pub lowercaser: Lowercaser,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            codecs: TextCodecs::default(),
            case_sensitivity: CaseSensitivity::Default,
            lowercaser: ascii_lowercase,
        }
    }
}

/// A zip archive opened for reading.
///
/// The end-of-central-directory records are parsed eagerly on open; the
/// central directory itself is scanned incrementally as entries are
/// iterated or looked up.
///
/// An archive is not safe for concurrent use; opening an entry borrows the
/// archive exclusively, so only one entry stream can exist at a time.
pub struct ZipArchive<R: Read + Seek> {
    stream: R,
    index: DirectoryIndex,
    options: ArchiveOptions,
    comment: String,
}

impl<R: Read + Seek> std::fmt::Debug for ZipArchive<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchive").finish_non_exhaustive()
    }
}

impl ZipArchive<File> {
    /// Open an archive file by path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Open an archive from any seekable stream.
    pub fn new(stream: R) -> Result<Self, Error> {
        Self::with_options(stream, ArchiveOptions::default())
    }

    /// Open an archive with explicit codecs and lookup configuration.
    pub fn with_options(mut stream: R, options: ArchiveOptions) -> Result<Self, Error> {
        let index = DirectoryIndex::open(&mut stream, options.lowercaser)?;
        let comment = match index.comment_raw.is_empty() {
            true => String::new(),
            false => options
                .codecs
                .comment
                .unwrap_or_else(|| crate::encoding::Encoding::guess(&index.comment_raw))
                .decode(&index.comment_raw)?,
        };
        trace!(
            entries = index.total_entries(),
            zip64 = index.is_zip64,
            "opened archive"
        );
        Ok(Self {
            stream,
            index,
            options,
            comment,
        })
    }

    /// Number of entries in the central directory.
    pub fn entry_count(&self) -> u64 {
        self.index.total_entries()
    }

    /// The archive's global comment.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Whether the archive carries zip64 end records.
    pub fn is_zip64(&self) -> bool {
        self.index.is_zip64
    }

    /// Iterate over all entries, in central directory order.
    ///
    /// Entries are scanned lazily; a corrupt central record surfaces as an
    /// `Err` item.
    pub fn entries(&mut self) -> Entries<'_, R> {
        Entries {
            archive: self,
            next: 0,
        }
    }

    /// Central-directory metadata for the entry at `index`, in iteration
    /// order.
    pub fn entry(&mut self, index: usize) -> Result<EntryInfo, Error> {
        while self.index.mapped() <= index {
            if self.index.scan_next(&self.options.codecs)?.is_none() {
                return Err(Error::InvalidArgument("entry index out of range"));
            }
        }
        Ok(self.index.entry(index).expect("scanned up to index").clone())
    }

    /// Look up an entry by path.
    ///
    /// Paths are normalized before comparison; `case` picks the lookup
    /// map, with [CaseSensitivity::Default] resolving per platform.
    pub fn find_entry(
        &mut self,
        path: &str,
        case: CaseSensitivity,
    ) -> Result<Option<EntryInfo>, Error> {
        Ok(self
            .find_index(path, case)?
            .map(|i| self.index.entry(i).expect("index valid").clone()))
    }

    fn find_index(&mut self, path: &str, case: CaseSensitivity) -> Result<Option<usize>, Error> {
        let sensitive = match case {
            CaseSensitivity::Default => self.options.case_sensitivity.is_sensitive(),
            other => other.is_sensitive(),
        };
        self.index.find(path, sensitive, &self.options.codecs)
    }

    /// Full metadata for an entry: reads its local file header and merges
    /// the local extra fields, refining timestamps and the symlink target.
    pub fn stat(&mut self, path: &str, case: CaseSensitivity) -> Result<Option<EntryInfo>, Error> {
        match self.find_index(path, case)? {
            Some(index) => self.stat_at(index).map(Some),
            None => Ok(None),
        }
    }

    /// [ZipArchive::stat] by entry index.
    pub fn stat_at(&mut self, index: usize) -> Result<EntryInfo, Error> {
        let (entry, _) = self.refine(index)?;
        Ok(entry)
    }

    /// Open an entry's payload for reading.
    pub fn open_entry(
        &mut self,
        path: &str,
        case: CaseSensitivity,
    ) -> Result<EntryReader<'_, R>, Error> {
        match self.find_index(path, case)? {
            Some(index) => self.open_entry_at(index, None),
            None => Err(Error::InvalidArgument("no such entry")),
        }
    }

    /// Open an encrypted entry's payload with a password.
    pub fn open_entry_with_password(
        &mut self,
        path: &str,
        case: CaseSensitivity,
        password: &[u8],
    ) -> Result<EntryReader<'_, R>, Error> {
        match self.find_index(path, case)? {
            Some(index) => self.open_entry_at(index, Some(password)),
            None => Err(Error::InvalidArgument("no such entry")),
        }
    }

    /// Open the entry at `index`, optionally with a password.
    pub fn open_entry_at(
        &mut self,
        index: usize,
        password: Option<&[u8]>,
    ) -> Result<EntryReader<'_, R>, Error> {
        let (entry, data_start) = self.refine(index)?;

        let keys = if entry.is_encrypted() && !entry.raw {
            match (entry.crypt_keys, password) {
                (Some(keys), _) => Some(keys),
                (None, Some(password)) => Some(Cipher::from_password(password).keys()),
                (None, None) => {
                    return Err(Error::InvalidArgument(
                        "entry is encrypted and no password was supplied",
                    ))
                }
            }
        } else {
            None
        };

        EntryReader::new(&mut self.stream, &entry, data_start, keys)
    }

    /// Open the entry at `index` raw: yields the stored bytes without
    /// decompressing or decrypting, and skips CRC verification.
    pub fn open_entry_raw(&mut self, index: usize) -> Result<EntryReader<'_, R>, Error> {
        let (mut entry, data_start) = self.refine(index)?;
        entry.raw = true;
        EntryReader::new(&mut self.stream, &entry, data_start, None)
    }

    /// Hand back the underlying stream.
    pub fn into_inner(self) -> R {
        self.stream
    }

    /// Read the entry's local file header, merge its extra fields into the
    /// metadata, and compute where the payload starts.
    fn refine(&mut self, index: usize) -> Result<(EntryInfo, u64), Error> {
        let mut entry = self.entry(index)?;

        self.stream.seek(SeekFrom::Start(entry.header_offset))?;
        let mut fixed = [0u8; LocalFileHeaderRecord::LENGTH];
        self.stream.read_exact(&mut fixed)?;
        if &fixed[..4] != b"PK\x03\x04" {
            return Err(FormatError::InvalidLocalHeader.into());
        }
        let name_len = u16::from_le_bytes([fixed[26], fixed[27]]) as u64;
        let extra_len = u16::from_le_bytes([fixed[28], fixed[29]]) as u64;

        let data_start = entry.header_offset
            + LocalFileHeaderRecord::LENGTH as u64
            + name_len
            + extra_len;

        // only the extra field is interesting; skip over the name
        self.stream.seek(SeekFrom::Current(name_len as i64))?;
        let mut extra = vec![0u8; extra_len as usize];
        self.stream.read_exact(&mut extra)?;

        match ExtraFields::parse(&extra) {
            Ok(fields) => entry.local_extra = fields,
            Err(e) => {
                // a bogus local extra field shouldn't make the payload
                // unreadable
                warn!("ignoring corrupt local extra field: {}", e);
            }
        }

        let dos = MsdosTimestamp {
            time: u16::from_le_bytes([fixed[10], fixed[11]]),
            date: u16::from_le_bytes([fixed[12], fixed[13]]),
        };
        resolve_times(&mut entry, dos);
        resolve_symlink_target(&mut entry);

        if let Some(cached) = self.index.entry_mut(index) {
            cached.local_extra = entry.local_extra.clone();
            cached.modified = entry.modified;
            cached.created = entry.created;
            cached.accessed = entry.accessed;
            cached.symlink_target = entry.symlink_target.clone();
        }

        Ok((entry, data_start))
    }
}

/// Lazy iterator over an archive's entries.
pub struct Entries<'a, R: Read + Seek> {
    archive: &'a mut ZipArchive<R>,
    next: usize,
}

impl<R: Read + Seek> Iterator for Entries<'_, R> {
    type Item = Result<EntryInfo, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next;
        if (index as u64) >= self.archive.index.total_entries() {
            return None;
        }
        self.next += 1;
        Some(self.archive.entry(index))
    }
}

/// Pick the best available timestamps, in decreasing order of resolution:
/// NTFS (local extra), the extended timestamp (when its central and local
/// halves agree), Info-ZIP UNIX v1, and finally the DOS timestamp from the
/// header.
fn resolve_times(entry: &mut EntryInfo, dos: MsdosTimestamp) {
    let ntfs = entry.local_extra.get(TAG_NTFS).and_then(ExtraNtfsField::parse);

    let ext_ts = resolve_extended_timestamp(entry);

    let unix = entry
        .local_extra
        .get(TAG_INFOZIP_UNIX)
        .or_else(|| entry.local_extra.get(TAG_UNIX))
        .and_then(ExtraUnixField::parse);

    let modified = ntfs
        .as_ref()
        .and_then(|f| f.mtime.to_datetime())
        .or_else(|| {
            ext_ts
                .as_ref()
                .and_then(|ts| ts.mtime)
                .and_then(|t| unix_to_datetime(t as i64))
        })
        .or_else(|| {
            unix.as_ref()
                .and_then(|f| unix_to_datetime(f.mtime as i64))
        })
        .or_else(|| dos.to_datetime());

    if let Some(modified) = modified {
        entry.modified = modified;
    }

    entry.created = ntfs
        .as_ref()
        .and_then(|f| f.ctime.to_datetime())
        .or_else(|| {
            ext_ts
                .as_ref()
                .and_then(|ts| ts.ctime)
                .and_then(|t| unix_to_datetime(t as i64))
        })
        // creation falls back to modification
        .or(Some(entry.modified));

    entry.accessed = ntfs
        .as_ref()
        .and_then(|f| f.atime.to_datetime())
        .or_else(|| {
            ext_ts
                .as_ref()
                .and_then(|ts| ts.atime)
                .and_then(|t| unix_to_datetime(t as i64))
        })
        .or_else(|| {
            unix.as_ref()
                .and_then(|f| unix_to_datetime(f.atime as i64))
        })
        .or(Some(entry.modified));
}

/// The extended timestamp only counts when both halves are present, every
/// time the local half advertises is also advertised centrally, and the
/// two modification times agree.
fn resolve_extended_timestamp(entry: &EntryInfo) -> Option<ExtraTimestampField> {
    let local = entry
        .local_extra
        .get(TAG_EXTENDED_TIMESTAMP)
        .and_then(ExtraTimestampField::parse_local)?;
    let central = entry
        .central_extra
        .get(TAG_EXTENDED_TIMESTAMP)
        .and_then(ExtraTimestampField::parse_central)?;

    if local.flags & 0b111 == 0 {
        return None;
    }
    if local.flags & !central.flags & 0b111 != 0 {
        return None;
    }
    if local.flags & ExtraTimestampField::MOD_TIME != 0 && local.mtime != central.mtime {
        return None;
    }
    Some(local)
}

/// Symlink entries store their target as the trailing bytes of the
/// Info-ZIP UNIX extra field.
fn resolve_symlink_target(entry: &mut EntryInfo) {
    if entry.kind != EntryKind::Symlink || entry.symlink_target.is_some() {
        return;
    }
    let target = entry
        .local_extra
        .get(TAG_INFOZIP_UNIX)
        .or_else(|| entry.local_extra.get(TAG_UNIX))
        .and_then(ExtraUnixField::parse)
        .and_then(|f| String::from_utf8(f.data).ok())
        .filter(|t| !t.is_empty());
    entry.symlink_target = target;
}
