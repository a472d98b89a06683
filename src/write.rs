//! Writing zip archives: the [ZipWriter] handle, the per-entry
//! [EntryWriter] stream, and the sinks that back them.
//!
//! Entries flow plaintext → deflate → encryption → sink; the CRC-32 is
//! accumulated on the plaintext. On seekable sinks the local header is
//! back-patched with the final sizes; on sequential sinks a data
//! descriptor is emitted instead.

use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::trace;

use crate::checksum::{Checksum, Crc32};
use crate::crypto::{Cipher, CryptoWriter};
use crate::entry::{CompressionQuality, EntryInfo, EntryKind, Method, ZipOptions};
use crate::error::Error;
use crate::format::{
    datetime_to_unix, payload, DataDescriptorRecord, DirectoryHeader,
    EndOfCentralDirectory64Locator, EndOfCentralDirectory64Record, EndOfCentralDirectoryRecord,
    ExtraFields, ExtraNtfsField, ExtraTimestampField, ExtraUnixField, ExtraZip64Field,
    HostSystem, LocalFileHeaderRecord, NtfsTimestamp, Version, ZipBytes, ZipString,
    TAG_EXTENDED_TIMESTAMP, TAG_INFOZIP_UNIX, TAG_NTFS, TAG_ZIP64,
};
use crate::index::DirectoryIndex;
use crate::path::{encode_entry_text, TextCodecs};
use crate::zstream::{DeflateWriter, Flavor};

const U32_SENTINEL: u32 = 0xffff_ffff;
const U16_SENTINEL: u16 = 0xffff;

/// Where archive bytes go: a writer that knows its position, and may or
/// may not be able to go back and patch.
pub trait Sink: Write {
    /// Current byte offset in the output.
    fn position(&mut self) -> io::Result<u64>;

    /// Whether [Sink::patch_at] works.
    fn is_seekable(&self) -> bool;

    /// Overwrite `data` at `offset`, then restore the current position.
    fn patch_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;
}

/// A sink over any [Write] + [Seek] stream.
pub struct SeekSink<W: Write + Seek> {
    inner: W,
}

impl<W: Write + Seek> SeekSink<W> {
    /// Hand back the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> Write for SeekSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> Sink for SeekSink<W> {
    fn position(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn patch_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let here = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(data)?;
        self.inner.seek(SeekFrom::Start(here))?;
        Ok(())
    }
}

/// A sink over a sequential stream: counts bytes, cannot patch. Forces
/// data descriptors on every entry.
pub struct StreamSink<W: Write> {
    inner: W,
    pos: u64,
}

impl<W: Write> StreamSink<W> {
    /// Hand back the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for StreamSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Sink for StreamSink<W> {
    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn patch_at(&mut self, _offset: u64, _data: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sequential sink cannot patch",
        ))
    }
}

/// Configuration for an archive being written.
#[derive(Clone, Copy)]
pub struct WriterOptions {
    /// Which toolchains should understand paths, comments and attributes.
    pub compatibility: crate::entry::Compatibility,
    /// Codecs for legacy text, used by the DOS and custom profiles.
    pub codecs: TextCodecs,
    /// Reserve zip64 headroom for every entry, allowing payloads and
    /// offsets past 4 GiB.
    pub zip64: bool,
    /// Emit data descriptors instead of back-patching local headers.
    /// Ignored (forced on) for sequential sinks.
    pub data_descriptors: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compatibility: Default::default(),
            codecs: TextCodecs::default(),
            zip64: false,
            data_descriptors: true,
        }
    }
}

/// A zip archive being written.
///
/// Entries are added one at a time through [ZipWriter::open_entry]; the
/// central directory and end records are emitted by [ZipWriter::finish].
pub struct ZipWriter<S: Sink> {
    sink: S,
    opts: WriterOptions,
    /// finished entries' central records, in open order
    dir: Vec<DirectoryHeader>,
    /// raw central directory carried over from an existing archive (Add
    /// mode); re-emitted verbatim before [Self::dir]
    carried_dir: Vec<u8>,
    carried_entries: u64,
    /// non-zip prefix length; recorded offsets are relative to it
    base_offset: i64,
    /// raw comment carried over from an existing archive, kept unless a
    /// new comment is set
    carried_comment: Vec<u8>,
    comment: Option<String>,
    finished: bool,
}

impl<W: Write + Seek> ZipWriter<SeekSink<W>> {
    /// Start a fresh archive at the stream's current position.
    ///
    /// A non-zero starting position makes a self-extractor-style archive:
    /// whatever precedes it is kept as an opaque prefix.
    pub fn create(w: W) -> Result<Self, Error> {
        Self::create_with_options(w, WriterOptions::default())
    }

    /// [ZipWriter::create] with explicit options.
    pub fn create_with_options(mut w: W, opts: WriterOptions) -> Result<Self, Error> {
        let base_offset = w.stream_position()? as i64;
        Ok(Self {
            sink: SeekSink { inner: w },
            opts,
            dir: Vec::new(),
            carried_dir: Vec::new(),
            carried_entries: 0,
            base_offset,
            carried_comment: Vec::new(),
            comment: None,
            finished: false,
        })
    }
}

impl<W: Read + Write + Seek> ZipWriter<SeekSink<W>> {
    /// Open an existing archive and position to add entries to it.
    ///
    /// The existing central directory is read, then overwritten by the
    /// new entries; it is re-emitted (with the new records appended) on
    /// [ZipWriter::finish].
    pub fn append(w: W) -> Result<Self, Error> {
        Self::append_with_options(w, WriterOptions::default())
    }

    /// [ZipWriter::append] with explicit options.
    pub fn append_with_options(mut w: W, opts: WriterOptions) -> Result<Self, Error> {
        let index = DirectoryIndex::open(&mut w, crate::index::ascii_lowercase)?;
        let carried_dir = index.raw_directory().to_vec();
        let carried_comment = index.comment_raw.clone();
        let carried_entries = index.total_entries();
        let base_offset = index.global_offset();

        // new entries start where the old central directory began
        w.seek(SeekFrom::Start(index.directory_offset()))?;

        Ok(Self {
            sink: SeekSink { inner: w },
            opts,
            dir: Vec::new(),
            carried_dir,
            carried_entries,
            base_offset,
            carried_comment,
            comment: None,
            finished: false,
        })
    }
}

impl<W: Write> ZipWriter<StreamSink<W>> {
    /// Start a fresh archive on a sequential (non-seekable) stream.
    ///
    /// Every entry gets a data descriptor, since the local headers cannot
    /// be revisited.
    pub fn create_stream(w: W) -> Self {
        Self::create_stream_with_options(w, WriterOptions::default())
    }

    /// [ZipWriter::create_stream] with explicit options.
    pub fn create_stream_with_options(w: W, opts: WriterOptions) -> Self {
        Self {
            sink: StreamSink { inner: w, pos: 0 },
            opts,
            dir: Vec::new(),
            carried_dir: Vec::new(),
            carried_entries: 0,
            base_offset: 0,
            carried_comment: Vec::new(),
            comment: None,
            finished: false,
        }
    }
}

impl<S: Sink> ZipWriter<S> {
    /// Set the archive comment. `None` leaves any carried-over comment
    /// alone (which, for a fresh archive, means no comment).
    pub fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
    }

    /// Number of entries written so far (including carried-over ones).
    pub fn entry_count(&self) -> u64 {
        self.carried_entries + self.dir.len() as u64
    }

    /// Begin a new entry described by `info`. Bytes written to the
    /// returned stream become the entry's payload; call
    /// [EntryWriter::finish] to seal it.
    pub fn open_entry(&mut self, info: EntryInfo) -> Result<EntryWriter<'_, S>, Error> {
        self.open_entry_inner(info, None)
    }

    /// Begin a new encrypted entry. The plaintext CRC-32 must already be
    /// set in `info` (the encryption header embeds it, and it cannot be
    /// patched after the fact).
    pub fn open_entry_with_password(
        &mut self,
        info: EntryInfo,
        password: &[u8],
    ) -> Result<EntryWriter<'_, S>, Error> {
        self.open_entry_inner(info, Some(password))
    }

    fn open_entry_inner(
        &mut self,
        mut info: EntryInfo,
        password: Option<&[u8]>,
    ) -> Result<EntryWriter<'_, S>, Error> {
        if self.finished {
            return Err(Error::InvalidArgument("archive is already finished"));
        }
        if info.path.is_empty() || info.path.starts_with('/') {
            return Err(Error::InvalidArgument(
                "entry path must be relative and non-empty",
            ));
        }
        if !info.raw && !matches!(info.method, Method::Store | Method::Deflate) {
            return Err(Error::method_not_supported(info.method));
        }

        // keep the path shape and the entry kind in agreement
        if info.path.ends_with('/') {
            info.kind = EntryKind::Directory;
        } else if info.kind == EntryKind::Directory {
            info.path.push('/');
        }
        match info.kind {
            EntryKind::Directory => {
                info.method = Method::Store;
            }
            EntryKind::Symlink => {
                if info.symlink_target.as_deref().map_or(true, str::is_empty) {
                    return Err(Error::InvalidArgument("symlink entry without a target"));
                }
                info.method = Method::Store;
            }
            EntryKind::File => {}
        }

        let encrypted = password.is_some() || info.crypt_keys.is_some() || info.is_encrypted();
        if encrypted && !info.raw {
            if info.crc32 == 0 {
                return Err(Error::InvalidArgument(
                    "encrypted entries need the plaintext crc32 up front",
                ));
            }
            if password.is_none() && info.crypt_keys.is_none() {
                return Err(Error::InvalidArgument(
                    "entry is flagged encrypted but no password or keys were supplied",
                ));
            }
        }

        let zip64 = self.opts.zip64
            || info.uncompressed_size as u64 >= U32_SENTINEL as u64
            || info.compressed_size as u64 >= U32_SENTINEL as u64;

        let seekable = self.sink.is_seekable();
        let descriptor = if !seekable {
            true
        } else if info.method == Method::Store && info.level == 0 && !encrypted {
            // 1.0-compatible stored entries: sizes are patched, no
            // descriptor, version-needed stays at 1.0
            false
        } else {
            self.opts.data_descriptors
        };

        info.default_external_attrs();
        info.made_by = made_by(self.opts.compatibility, info.kind, zip64);

        let mut options = info.options;
        if encrypted {
            options |= ZipOptions::ENCRYPTED;
        }
        if descriptor {
            options |= ZipOptions::DATA_DESCRIPTOR;
        }
        if info.method == Method::Deflate {
            options.set_quality(CompressionQuality::from_level(info.level));
        }

        let text = encode_entry_text(
            &info.path,
            &info.comment,
            self.opts.compatibility,
            &self.opts.codecs,
        );
        if text.unicode {
            options |= ZipOptions::UNICODE;
        }
        info.options = options;
        info.version_needed = Version {
            host_system: HostSystem::MsDos,
            version: version_needed(&info, zip64),
        };

        // assemble the extra fields: caller-provided records first, then
        // the profile's text and timestamp records, then zip64 headroom
        let mut local_extra = info.local_extra.clone();
        let mut central_extra = info.central_extra.clone();
        for (tag, data) in text.local {
            local_extra.insert(tag, data);
        }
        for (tag, data) in text.central {
            central_extra.insert(tag, data);
        }
        add_timestamp_extras(&info, self.opts.compatibility, &mut central_extra, &mut local_extra);

        let mut zip64_patch_rel = None;
        if zip64 {
            // reserve a local zip64 record now, patch the real sizes in
            // at finish time; it must land at the end of the extra bytes
            // for the patch offset to be right
            local_extra.remove(TAG_ZIP64);
            let z64 = ExtraZip64Field {
                uncompressed_size: Some(info.uncompressed_size.max(0) as u64),
                compressed_size: Some(info.compressed_size.max(0) as u64),
                header_offset: None,
            };
            let encoded_before = local_extra.encode(None)?;
            zip64_patch_rel = Some(encoded_before.len() as u64 + 4);
            local_extra.insert(TAG_ZIP64, payload(|w| z64.write_to(w)));
        }

        let local_extra_bytes = local_extra.encode(Some(u16::MAX as usize))?;
        info.local_extra = local_extra;
        info.central_extra = central_extra;

        // the crc is only known up front for raw and encrypted entries;
        // sizes only for raw ones
        let known_crc = if info.raw || encrypted { info.crc32 } else { 0 };
        let known_sizes = info.raw;

        let header = LocalFileHeaderRecord {
            reader_version: info.version_needed,
            flags: info.options.0,
            method: info.method,
            modified: info.dos_modified(),
            crc32: known_crc,
            compressed_size: if zip64 {
                U32_SENTINEL
            } else if known_sizes {
                info.compressed_size as u32
            } else {
                0
            },
            uncompressed_size: if zip64 {
                U32_SENTINEL
            } else if known_sizes {
                info.uncompressed_size as u32
            } else {
                0
            },
            name: ZipString(text.name.clone()),
            extra: ZipBytes(local_extra_bytes),
        };

        let local_offset = self.sink.position()?;
        header.write_to(&mut self.sink)?;
        trace!(
            path = %info.path,
            offset = local_offset,
            zip64,
            descriptor,
            "entry local header written"
        );

        let cipher = if encrypted && !info.raw {
            let keys = match (info.crypt_keys, password) {
                (Some(keys), _) => keys,
                (None, Some(password)) => Cipher::from_password(password).keys(),
                (None, None) => unreachable!("encrypted implies keys or password"),
            };
            Some(Cipher::from_keys(keys))
        } else {
            None
        };

        let pipe = match (&info.method, &cipher, info.raw) {
            (_, _, true) | (Method::Store, None, _) => WritePipe::Store,
            (Method::Store, Some(cipher), _) => WritePipe::StoreCrypto(CryptoWriter::new(
                Vec::new(),
                cipher.clone(),
                info.crc32,
            )?),
            (Method::Deflate, None, _) => WritePipe::Deflate(DeflateWriter::new(
                Vec::new(),
                Flavor::Deflate,
                deflate_level(info.level),
            )),
            (Method::Deflate, Some(cipher), _) => {
                let crypto = CryptoWriter::new(Vec::new(), cipher.clone(), info.crc32)?;
                WritePipe::DeflateCrypto(DeflateWriter::new(
                    crypto,
                    Flavor::Deflate,
                    deflate_level(info.level),
                ))
            }
            (Method::Unrecognized(_), _, _) => unreachable!("validated above"),
        };

        let name_len = text.name.len() as u64;
        let zip64_patch = zip64_patch_rel.map(|rel| {
            local_offset + LocalFileHeaderRecord::LENGTH as u64 + name_len + rel
        });

        Ok(EntryWriter {
            writer: self,
            info,
            name_bytes: text.name,
            comment_bytes: text.comment,
            pipe: Some(pipe),
            hasher: Crc32::default(),
            uncompressed: 0,
            compressed: 0,
            local_offset,
            zip64,
            zip64_patch,
            descriptor,
            finished: false,
        })
    }

    /// Write the central directory and the end records, consuming the
    /// writer and handing back the sink.
    ///
    /// Finishing is attempted even after an entry error; the first error
    /// encountered wins.
    pub fn finish(mut self) -> Result<S, Error> {
        self.do_finish()?;
        Ok(self.sink)
    }

    fn do_finish(&mut self) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let central_start = self.sink.position()?;
        self.sink.write_all(&self.carried_dir)?;
        for record in &self.dir {
            record.write_to(&mut self.sink)?;
        }
        let central_end = self.sink.position()?;

        let entries = self.carried_entries + self.dir.len() as u64;
        let central_size = central_end - central_start;
        let central_offset = (central_start as i64 - self.base_offset) as u64;

        let needs_zip64 = entries >= U16_SENTINEL as u64
            || central_size >= U32_SENTINEL as u64
            || central_offset >= U32_SENTINEL as u64;

        if needs_zip64 {
            let record = EndOfCentralDirectory64Record {
                record_size: EndOfCentralDirectory64Record::CONTENT_SIZE,
                creator_version: Version::ZIP64 as u16,
                reader_version: Version::ZIP64 as u16,
                disk_nbr: 0,
                dir_disk_nbr: 0,
                dir_records_this_disk: entries,
                directory_records: entries,
                directory_size: central_size,
                directory_offset: central_offset,
            };
            record.write_to(&mut self.sink)?;

            let locator = EndOfCentralDirectory64Locator {
                dir_disk_number: 0,
                directory_offset: (central_end as i64 - self.base_offset) as u64,
                total_disks: 1,
            };
            locator.write_to(&mut self.sink)?;
        }

        let comment = match &self.comment {
            Some(comment) => self
                .opts
                .codecs
                .comment_or_default()
                .encode(comment)
                .unwrap_or_else(|| comment.as_bytes().to_vec()),
            None => self.carried_comment.clone(),
        };

        let eocd = EndOfCentralDirectoryRecord {
            disk_nbr: 0,
            dir_disk_nbr: 0,
            dir_records_this_disk: entries.min(U16_SENTINEL as u64) as u16,
            directory_records: entries.min(U16_SENTINEL as u64) as u16,
            directory_size: central_size.min(U32_SENTINEL as u64) as u32,
            directory_offset: central_offset.min(U32_SENTINEL as u64) as u32,
            comment,
        };
        eocd.write_to(&mut self.sink)?;
        self.sink.flush()?;

        trace!(entries, central_size, needs_zip64, "archive finished");
        Ok(())
    }
}

fn deflate_level(level: i32) -> Option<u32> {
    match level {
        -1 => None,
        l => Some(l.clamp(0, 9) as u32),
    }
}

fn version_needed(info: &EntryInfo, zip64: bool) -> u8 {
    if zip64 {
        Version::ZIP64
    } else if info.method == Method::Deflate
        || info.kind != EntryKind::File
        || info.options.has(ZipOptions::ENCRYPTED)
    {
        Version::DEFLATE
    } else {
        Version::BASE
    }
}

fn made_by(compat: crate::entry::Compatibility, kind: EntryKind, zip64: bool) -> Version {
    use crate::entry::Compatibility;

    let version = if zip64 { Version::ZIP64 } else { Version::DEFLATE };
    let host_system = if compat.has(Compatibility::UNIX) || kind == EntryKind::Symlink {
        HostSystem::Unix
    } else if compat.has(Compatibility::WINDOWS) {
        HostSystem::WindowsNtfs
    } else if compat.has(Compatibility::DOS) {
        HostSystem::MsDos
    } else {
        Version::host(version).host_system
    };
    Version {
        host_system,
        version,
    }
}

/// Attach the compatibility profile's timestamp records, unless the
/// caller already provided their own.
fn add_timestamp_extras(
    info: &EntryInfo,
    compat: crate::entry::Compatibility,
    central: &mut ExtraFields,
    local: &mut ExtraFields,
) {
    use crate::entry::Compatibility;

    if compat.has(Compatibility::UNIX) && !local.contains(TAG_EXTENDED_TIMESTAMP) {
        let mtime = datetime_to_unix(info.modified);
        let atime = info.accessed.map(datetime_to_unix);
        let ctime = info.created.map(datetime_to_unix);

        let mut flags = ExtraTimestampField::MOD_TIME;
        if atime.is_some_and(|t| t != mtime) {
            flags |= ExtraTimestampField::ACC_TIME;
        }
        if ctime.is_some_and(|t| t != mtime) {
            flags |= ExtraTimestampField::CRT_TIME;
        }
        let ts = ExtraTimestampField {
            flags,
            mtime: Some(mtime),
            atime,
            ctime,
        };
        local.insert(TAG_EXTENDED_TIMESTAMP, payload(|w| ts.write_local(w)));
        central.insert(TAG_EXTENDED_TIMESTAMP, payload(|w| ts.write_central(w)));
    }

    if compat.has(Compatibility::UNIX)
        && info.kind == EntryKind::Symlink
        && !local.contains(TAG_INFOZIP_UNIX)
    {
        let target = info.symlink_target.clone().unwrap_or_default();
        let unix = ExtraUnixField {
            atime: datetime_to_unix(info.accessed.unwrap_or(info.modified)),
            mtime: datetime_to_unix(info.modified),
            uid: Some(0),
            gid: Some(0),
            data: target.into_bytes(),
        };
        local.insert(TAG_INFOZIP_UNIX, payload(|w| unix.write_to(w)));
    }

    if compat.has(Compatibility::WINDOWS) && !local.contains(TAG_NTFS) {
        let mtime = NtfsTimestamp::from_datetime(info.modified);
        let ntfs = ExtraNtfsField {
            mtime,
            atime: info
                .accessed
                .map(NtfsTimestamp::from_datetime)
                .unwrap_or(mtime),
            ctime: info
                .created
                .map(NtfsTimestamp::from_datetime)
                .unwrap_or(mtime),
        };
        local.insert(TAG_NTFS, payload(|w| ntfs.write_to(w)));
    }
}

/// The per-entry transform pipeline. Deflate and encryption stages stage
/// their output in memory; [EntryWriter] drains the staging buffer to the
/// sink after every write.
enum WritePipe {
    /// raw or stored-unencrypted: bytes go straight to the sink
    Store,
    StoreCrypto(CryptoWriter<Vec<u8>>),
    Deflate(DeflateWriter<Vec<u8>>),
    DeflateCrypto(DeflateWriter<CryptoWriter<Vec<u8>>>),
}

impl WritePipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            WritePipe::Store => Ok(()),
            WritePipe::StoreCrypto(w) => w.write_all(buf),
            WritePipe::Deflate(w) => w.write_all(buf),
            WritePipe::DeflateCrypto(w) => w.write_all(buf),
        }
    }

    /// Take whatever the pipeline has staged so far.
    fn drain(&mut self) -> Vec<u8> {
        match self {
            WritePipe::Store => Vec::new(),
            WritePipe::StoreCrypto(w) => std::mem::take(w.get_mut()),
            WritePipe::Deflate(w) => std::mem::take(w.get_mut()),
            WritePipe::DeflateCrypto(w) => std::mem::take(w.get_mut().get_mut()),
        }
    }

    /// Flush all remaining compressed bytes and return them.
    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            WritePipe::Store => Ok(Vec::new()),
            WritePipe::StoreCrypto(w) => Ok(w.into_inner()),
            WritePipe::Deflate(w) => w.finish(),
            WritePipe::DeflateCrypto(w) => Ok(w.finish()?.into_inner()),
        }
    }
}

/// A byte stream writing one entry's payload.
///
/// Dropping an unfinished entry writer finalizes it on a best-effort
/// basis; call [EntryWriter::finish] to observe errors.
pub struct EntryWriter<'a, S: Sink> {
    writer: &'a mut ZipWriter<S>,
    info: EntryInfo,
    name_bytes: Vec<u8>,
    comment_bytes: Vec<u8>,
    pipe: Option<WritePipe>,
    hasher: Crc32,
    uncompressed: u64,
    compressed: u64,
    local_offset: u64,
    zip64: bool,
    zip64_patch: Option<u64>,
    descriptor: bool,
    finished: bool,
}

impl<S: Sink> EntryWriter<'_, S> {
    /// Bytes accepted so far (plaintext side).
    pub fn size(&self) -> u64 {
        self.uncompressed
    }

    fn drain_to_sink(&mut self) -> io::Result<()> {
        let staged = self.pipe.as_mut().expect("pipe present").drain();
        if !staged.is_empty() {
            self.writer.sink.write_all(&staged)?;
            self.compressed += staged.len() as u64;
        }
        Ok(())
    }

    /// Seal the entry: flush the pipeline, write the data descriptor or
    /// patch the local header, and queue the central directory record.
    pub fn finish(mut self) -> Result<(), Error> {
        self.finish_inner()
    }

    fn finish_inner(&mut self) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let tail = self.pipe.take().expect("pipe present").finish()?;
        self.writer.sink.write_all(&tail)?;
        self.compressed += tail.len() as u64;

        let crc32 = if self.info.raw {
            self.info.crc32
        } else {
            self.hasher.value()
        };
        let uncompressed = if self.info.raw {
            self.info.uncompressed_size.max(0) as u64
        } else {
            self.uncompressed
        };
        let compressed = self.compressed;

        if !self.zip64
            && (compressed >= U32_SENTINEL as u64 || uncompressed >= U32_SENTINEL as u64)
        {
            return Err(Error::InvalidArgument(
                "entry grew past 4 GiB without zip64 enabled",
            ));
        }

        if self.descriptor {
            let descriptor = DataDescriptorRecord {
                crc32,
                compressed_size: compressed,
                uncompressed_size: uncompressed,
            };
            descriptor.write_to(&mut self.writer.sink, self.zip64)?;
        } else {
            // back-patch crc and sizes into the local header
            let mut patch = Vec::with_capacity(12);
            patch.extend_from_slice(&crc32.to_le_bytes());
            if self.zip64 {
                patch.extend_from_slice(&U32_SENTINEL.to_le_bytes());
                patch.extend_from_slice(&U32_SENTINEL.to_le_bytes());
            } else {
                patch.extend_from_slice(&(compressed as u32).to_le_bytes());
                patch.extend_from_slice(&(uncompressed as u32).to_le_bytes());
            }
            self.writer
                .sink
                .patch_at(self.local_offset + LocalFileHeaderRecord::CRC32_OFFSET, &patch)?;

            if let Some(offset) = self.zip64_patch {
                let z64 = ExtraZip64Field {
                    uncompressed_size: Some(uncompressed),
                    compressed_size: Some(compressed),
                    header_offset: None,
                };
                self.writer
                    .sink
                    .patch_at(offset, &payload(|w| z64.write_to(w)))?;
            }
        }

        self.queue_central_record(crc32, compressed, uncompressed)?;

        self.info.crc32 = crc32;
        self.info.compressed_size = compressed as i64;
        self.info.uncompressed_size = uncompressed as i64;
        trace!(
            path = %self.info.path,
            crc32,
            compressed,
            uncompressed,
            "entry finished"
        );
        Ok(())
    }

    /// Build the central directory record for this entry, promoting to
    /// zip64 exactly when a stored field overflows.
    fn queue_central_record(
        &mut self,
        crc32: u32,
        compressed: u64,
        uncompressed: u64,
    ) -> Result<(), Error> {
        let header_offset = (self.local_offset as i64 - self.writer.base_offset) as u64;

        let mut central_extra = self.info.central_extra.clone();
        central_extra.remove(TAG_ZIP64);

        let needs_zip64 = compressed >= U32_SENTINEL as u64
            || uncompressed >= U32_SENTINEL as u64
            || header_offset >= U32_SENTINEL as u64;
        if needs_zip64 {
            let z64 = ExtraZip64Field {
                uncompressed_size: (uncompressed >= U32_SENTINEL as u64).then_some(uncompressed),
                compressed_size: (compressed >= U32_SENTINEL as u64).then_some(compressed),
                header_offset: (header_offset >= U32_SENTINEL as u64).then_some(header_offset),
            };
            central_extra.insert(TAG_ZIP64, payload(|w| z64.write_to(w)));
        }

        let extra_bytes = central_extra.encode(Some(u16::MAX as usize))?;

        let clamp_u32 = |v: u64| v.min(U32_SENTINEL as u64) as u32;
        let record = DirectoryHeader {
            creator_version: self.info.made_by,
            reader_version: self.info.version_needed,
            flags: self.info.options.0,
            method: self.info.method,
            modified: self.info.dos_modified(),
            crc32,
            compressed_size: clamp_u32(compressed),
            uncompressed_size: clamp_u32(uncompressed),
            disk_nbr_start: 0,
            internal_attrs: self.info.internal_attrs,
            external_attrs: self.info.external_attrs,
            header_offset: clamp_u32(header_offset),
            name: ZipString(std::mem::take(&mut self.name_bytes)),
            extra: ZipBytes(extra_bytes),
            comment: ZipString(std::mem::take(&mut self.comment_bytes)),
        };

        self.writer.dir.push(record);
        Ok(())
    }
}

impl<S: Sink> Write for EntryWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "entry is already finished",
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let new_size = self.uncompressed + buf.len() as u64;
        if new_size > i64::MAX as u64 {
            return Err(Error::WriteLimit.into());
        }

        if self.info.raw {
            // raw bytes are already compressed; they bypass the pipeline
            self.writer.sink.write_all(buf)?;
            self.compressed += buf.len() as u64;
            self.uncompressed = new_size;
            return Ok(buf.len());
        }

        self.hasher.update(buf);
        self.uncompressed = new_size;

        if matches!(self.pipe.as_ref().expect("pipe present"), WritePipe::Store) {
            self.writer.sink.write_all(buf)?;
            self.compressed += buf.len() as u64;
        } else {
            self.pipe.as_mut().expect("pipe present").write(buf)?;
            self.drain_to_sink()?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.sink.flush()
    }
}

impl<S: Sink> Drop for EntryWriter<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            // best effort; errors surface only through explicit finish()
            let _ = self.finish_inner();
        }
    }
}
