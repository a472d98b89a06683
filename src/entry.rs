//! Per-entry metadata: the [EntryInfo] value type and the flag fields it
//! carries.

use chrono::{DateTime, Utc};
use winnow::{binary::le_u16, PResult, Partial};

use crate::format::{
    ExtraFields, HostSystem, Mode, MsdosMode, MsdosTimestamp, UnixMode, Version,
};

/// Compression method used for a file entry.
///
/// Only [Store][Method::Store] and [Deflate][Method::Deflate] can be read
/// and written; anything else is carried through metadata but opening the
/// payload errors out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// No compression is applied
    Store,

    /// [DEFLATE (RFC 1951)](https://www.ietf.org/rfc/rfc1951.txt)
    Deflate,

    /// A compression method that isn't supported by this crate.
    Unrecognized(u16),
}

impl Method {
    const STORE: u16 = 0;
    const DEFLATE: u16 = 8;

    /// Parse a method from a byte slice
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        le_u16(i).map(From::from)
    }
}

impl From<u16> for Method {
    fn from(u: u16) -> Self {
        match u {
            Self::STORE => Self::Store,
            Self::DEFLATE => Self::Deflate,
            u => Self::Unrecognized(u),
        }
    }
}

impl From<Method> for u16 {
    fn from(method: Method) -> Self {
        match method {
            Method::Store => Method::STORE,
            Method::Deflate => Method::DEFLATE,
            Method::Unrecognized(u) => u,
        }
    }
}

/// The general purpose bit flag of a zip entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ZipOptions(pub u16);

impl ZipOptions {
    /// bit 0: the entry is encrypted (traditional PKWARE)
    pub const ENCRYPTED: Self = Self(1 << 0);
    /// bit 1: compression quality (meaning depends on method)
    pub const COMPRESS_OPTION_1: Self = Self(1 << 1);
    /// bit 2: compression quality (meaning depends on method)
    pub const COMPRESS_OPTION_2: Self = Self(1 << 2);
    /// bit 3: sizes and crc are in the trailing data descriptor
    pub const DATA_DESCRIPTOR: Self = Self(1 << 3);
    /// bit 5: compressed patched data
    pub const PATCH: Self = Self(1 << 5);
    /// bit 6: strong encryption (unsupported)
    pub const STRONG_ENCRYPTION: Self = Self(1 << 6);
    /// bit 11: file name and comment are UTF-8
    pub const UNICODE: Self = Self(1 << 11);
    /// bit 13: local header fields are masked (central directory encryption)
    pub const LOCAL_HEADER_MASKING: Self = Self(1 << 13);

    /// Whether any of the given bits are set.
    pub fn has(self, rhs: Self) -> bool {
        self.0 & rhs.0 != 0
    }

    /// The compression quality encoded in bits 1 and 2, for deflate.
    pub fn quality(self) -> CompressionQuality {
        match (
            self.has(Self::COMPRESS_OPTION_1),
            self.has(Self::COMPRESS_OPTION_2),
        ) {
            (false, false) => CompressionQuality::Normal,
            (true, false) => CompressionQuality::Maximum,
            (false, true) => CompressionQuality::Fast,
            (true, true) => CompressionQuality::SuperFast,
        }
    }

    /// Set bits 1 and 2 from a compression quality.
    pub fn set_quality(&mut self, q: CompressionQuality) {
        self.0 &= !(Self::COMPRESS_OPTION_1.0 | Self::COMPRESS_OPTION_2.0);
        match q {
            CompressionQuality::Normal => {}
            CompressionQuality::Maximum => self.0 |= Self::COMPRESS_OPTION_1.0,
            CompressionQuality::Fast => self.0 |= Self::COMPRESS_OPTION_2.0,
            CompressionQuality::SuperFast => {
                self.0 |= Self::COMPRESS_OPTION_1.0 | Self::COMPRESS_OPTION_2.0
            }
        }
    }
}

impl std::ops::BitOr for ZipOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ZipOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Deflate compression quality, as advertised by flag bits 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionQuality {
    /// -en: normal compression
    Normal,
    /// -ex: maximum compression
    Maximum,
    /// -ef: fast compression
    Fast,
    /// -es: super fast compression
    SuperFast,
}

impl CompressionQuality {
    /// Map a deflate level to the quality bits it advertises.
    pub fn from_level(level: i32) -> Self {
        match level {
            1 => CompressionQuality::SuperFast,
            2 => CompressionQuality::Fast,
            8 | 9 => CompressionQuality::Maximum,
            _ => CompressionQuality::Normal,
        }
    }
}

/// Compatibility profile for an archive being written: which toolchains
/// should be able to make sense of paths, comments and attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compatibility(pub u8);

impl Compatibility {
    /// Use the configured codecs; emit no Unicode extras.
    pub const CUSTOM: Self = Self(0);
    /// 8.3 paths, legacy code page, DOS attributes.
    pub const DOS: Self = Self(1);
    /// UTF-8 paths, Unicode flag, UNIX mode bits and timestamps.
    pub const UNIX: Self = Self(2);
    /// UTF-8 paths, Unicode flag, NTFS timestamps, ZipArchive code page
    /// extra.
    pub const WINDOWS: Self = Self(4);

    /// Whether all of the given profile's bits are set.
    pub fn has(self, rhs: Self) -> bool {
        self.0 & rhs.0 == rhs.0
    }

    /// Whether this is the custom (no flags) profile.
    pub fn is_custom(self) -> bool {
        self.0 == 0
    }
}

impl Default for Compatibility {
    fn default() -> Self {
        Self(Self::UNIX.0 | Self::WINDOWS.0)
    }
}

impl std::ops::BitOr for Compatibility {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The entry's file type: a directory, a file, or a symbolic link.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EntryKind {
    /// The entry is a regular file
    File,

    /// The entry is a directory
    Directory,

    /// The entry is a symbolic link
    Symlink,
}

/// Describes a zip archive entry (a file, a directory, a symlink).
///
/// This is plain data with value semantics: reading fills one in from the
/// central directory (and the local header, where they disagree), writing
/// consumes one to describe the entry to create.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Path of the entry, forward-slash separated, relative to the archive
    /// root. A trailing `/` denotes a directory.
    ///
    /// There are zip files in the wild with all sorts of evil variants
    /// (absolute paths, `..` traversals), so be conservative in what you
    /// accept; see [EntryInfo::sanitized_path].
    pub path: String,

    /// What kind of filesystem object this entry describes.
    pub kind: EntryKind,

    /// Target of the link, for symlink entries.
    pub symlink_target: Option<String>,

    /// Size in bytes, before compression. Zero for directories.
    pub uncompressed_size: i64,

    /// Size in bytes, after compression (including the 12-byte encryption
    /// header, for encrypted entries).
    pub compressed_size: i64,

    /// CRC-32 of the uncompressed payload.
    pub crc32: u32,

    /// Compression method: Store or Deflate.
    pub method: Method,

    /// Deflate level, `-1` for the backend default, `0..=9` otherwise.
    pub level: i32,

    /// zlib strategy tag. Carried as metadata; the deflate backend this
    /// crate uses always applies the default strategy.
    pub strategy: i32,

    /// General purpose bit flag.
    pub options: ZipOptions,

    /// Host system and zip-spec version of the entry's creator.
    pub made_by: Version,

    /// Version needed to extract.
    pub version_needed: Version,

    /// Internal attributes; bit 0 means "probably text".
    pub internal_attrs: u16,

    /// External attributes: DOS attribute bits in the low byte, host
    /// specific bits (e.g. the UNIX mode) in the high 16.
    pub external_attrs: u32,

    /// Disk number this entry starts on; always 0, multi-volume archives
    /// are not supported.
    pub disk_number: u16,

    /// This entry's "last modified" timestamp - with caveats
    ///
    /// Due to the history of the ZIP file format, this may be inaccurate. It may be offset
    /// by a few hours, if there is no extended timestamp information. It may have a resolution
    /// as low as two seconds, if only MSDOS timestamps are present. It may default to the Unix
    /// epoch, if something went really wrong.
    pub modified: DateTime<Utc>,

    /// This entry's "created" timestamp, if available.
    ///
    /// See [EntryInfo::modified] for caveats.
    pub created: Option<DateTime<Utc>>,

    /// This entry's "last accessed" timestamp, if available.
    pub accessed: Option<DateTime<Utc>>,

    /// Per-entry comment.
    pub comment: String,

    /// Extra fields of the central directory record.
    pub central_extra: ExtraFields,

    /// Extra fields of the local file header.
    pub local_extra: ExtraFields,

    /// Pre-derived PKWARE key state, so a password can be reused without
    /// re-deriving it per entry.
    pub crypt_keys: Option<[u32; 3]>,

    /// When true, reading yields the stored (compressed) bytes and writing
    /// expects already-compressed bytes.
    pub raw: bool,

    /// Offset of the local file header in the archive.
    pub(crate) header_offset: u64,
}

impl Default for EntryInfo {
    fn default() -> Self {
        Self {
            path: String::new(),
            kind: EntryKind::File,
            symlink_target: None,
            uncompressed_size: 0,
            compressed_size: 0,
            crc32: 0,
            method: Method::Deflate,
            level: -1,
            strategy: 0,
            options: ZipOptions::default(),
            made_by: Version::host(Version::DEFLATE),
            version_needed: Version {
                host_system: HostSystem::MsDos,
                version: Version::DEFLATE,
            },
            internal_attrs: 0,
            external_attrs: 0,
            disk_number: 0,
            modified: crate::format::zero_datetime(),
            created: None,
            accessed: None,
            comment: String::new(),
            central_extra: ExtraFields::default(),
            local_extra: ExtraFields::default(),
            crypt_keys: None,
            raw: false,
            header_offset: 0,
        }
    }
}

impl EntryInfo {
    /// A file entry with the given path, ready to be written.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// A directory entry; a trailing `/` is appended if missing.
    pub fn directory(path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.ends_with('/') {
            path.push('/');
        }
        Self {
            path,
            kind: EntryKind::Directory,
            method: Method::Store,
            ..Default::default()
        }
    }

    /// A symlink entry pointing at `target`.
    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Symlink,
            symlink_target: Some(target.into()),
            method: Method::Store,
            ..Default::default()
        }
    }

    /// The mode derived from external attributes and the creator's host
    /// system.
    pub fn mode(&self) -> Mode {
        let mut mode = Mode::from_external_attrs(self.made_by.host_system, self.external_attrs);
        if self.path.ends_with('/') {
            // believe it or not, this is straight from the APPNOTE
            mode |= Mode::DIR;
        }
        mode
    }

    /// POSIX permission bits, derived from the external attributes.
    pub fn permissions(&self) -> u32 {
        self.mode().permissions()
    }

    /// Project POSIX permission bits onto the external attributes,
    /// preserving the file type and DOS bits.
    pub fn set_permissions(&mut self, permissions: u32) {
        let high = (self.external_attrs >> 16) & !0o777;
        let dos = self.external_attrs & 0xff;
        let mut dos = MsdosMode(dos);
        if permissions & 0o200 == 0 {
            dos |= MsdosMode::READ_ONLY;
        } else {
            dos &= MsdosMode(!MsdosMode::READ_ONLY.0);
        }
        self.external_attrs = (high | (permissions & 0o777)) << 16 | dos.0;
    }

    /// Whether the entry is flagged as text (internal attributes, bit 0).
    pub fn is_text(&self) -> bool {
        self.internal_attrs & 1 != 0
    }

    /// Whether the DOS hidden attribute is set.
    pub fn is_hidden(&self) -> bool {
        MsdosMode(self.external_attrs).has(MsdosMode::HIDDEN)
    }

    /// Whether the DOS system attribute is set.
    pub fn is_system(&self) -> bool {
        MsdosMode(self.external_attrs).has(MsdosMode::SYSTEM)
    }

    /// Whether the DOS read-only attribute is set, or no write permission
    /// bit remains.
    pub fn is_read_only(&self) -> bool {
        MsdosMode(self.external_attrs).has(MsdosMode::READ_ONLY)
            || (self.made_by.host_system.has_unix_attributes() && self.permissions() & 0o222 == 0)
    }

    /// Whether the entry is encrypted with the traditional PKWARE cipher.
    pub fn is_encrypted(&self) -> bool {
        self.options.has(ZipOptions::ENCRYPTED)
    }

    /// Derive the entry kind from the path shape, the external attributes
    /// and the creator's host system.
    pub(crate) fn derive_kind(&mut self) {
        let mode = self.mode();
        self.kind = if mode.has(Mode::SYMLINK) && self.made_by.host_system.supports_symlinks() {
            EntryKind::Symlink
        } else if mode.has(Mode::DIR) || self.path.ends_with('/') {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
    }

    /// Fill in external attributes appropriate for the entry's kind and the
    /// target host, when the caller didn't set any.
    pub(crate) fn default_external_attrs(&mut self) {
        if self.external_attrs != 0 {
            return;
        }
        let unix_mode = match self.kind {
            EntryKind::File => UnixMode::IFREG | UnixMode(0o644),
            EntryKind::Directory => UnixMode::IFDIR | UnixMode(0o755),
            EntryKind::Symlink => UnixMode::IFLNK | UnixMode(0o777),
        };
        let mut dos = MsdosMode(0);
        if self.kind == EntryKind::Directory {
            dos |= MsdosMode::DIR;
        }
        dos |= MsdosMode::ARCHIVED;
        self.external_attrs = (unix_mode.0 << 16) | dos.0;
    }

    /// Returns a sanitized version of the entry's path, if it
    /// seems safe. In particular, if this method feels like the
    /// entry path is trying to do a zip slip (cf.
    /// <https://snyk.io/research/zip-slip-vulnerability>), it'll return
    /// None.
    pub fn sanitized_path(&self) -> Option<&str> {
        let path = self.path.as_str();

        // refuse entries with traversed/absolute path to mitigate zip slip
        if path.contains("..") {
            return None;
        }
        if path.contains(":\\") || path.starts_with('\\') {
            return None;
        }

        // strip absolute prefix on entries pointing to root path
        let mut path = path;
        while let Some(stripped) = path.strip_prefix('/') {
            path = stripped;
        }
        Some(path)
    }

    /// The stored modification timestamp in MS-DOS format.
    pub fn dos_modified(&self) -> MsdosTimestamp {
        MsdosTimestamp::from_datetime(self.modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_bits_round_trip() {
        for q in [
            CompressionQuality::Normal,
            CompressionQuality::Maximum,
            CompressionQuality::Fast,
            CompressionQuality::SuperFast,
        ] {
            let mut opts = ZipOptions::default();
            opts.set_quality(q);
            assert_eq!(opts.quality(), q);
        }
    }

    #[test]
    fn directory_constructor_appends_slash() {
        let e = EntryInfo::directory("some/dir");
        assert_eq!(e.path, "some/dir/");
        assert_eq!(e.kind, EntryKind::Directory);
    }

    #[test]
    fn default_attrs_for_symlink() {
        let mut e = EntryInfo::symlink("a/link", "target");
        e.default_external_attrs();
        let unix = UnixMode(e.external_attrs >> 16);
        assert_eq!(unix & UnixMode::IFMT, UnixMode::IFLNK);
    }

    #[test]
    fn kind_derivation_prefers_attributes() {
        let mut e = EntryInfo::file("weird");
        e.made_by = Version {
            host_system: HostSystem::Unix,
            version: 30,
        };
        e.external_attrs = (UnixMode::IFLNK | UnixMode(0o777)).0 << 16;
        e.derive_kind();
        assert_eq!(e.kind, EntryKind::Symlink);

        // a DOS-made entry can't be a symlink
        e.made_by.host_system = HostSystem::MsDos;
        e.derive_kind();
        assert_eq!(e.kind, EntryKind::File);
    }

    #[test]
    fn sanitized_path_refuses_traversal() {
        let mut e = EntryInfo::file("../../etc/passwd");
        assert_eq!(e.sanitized_path(), None);
        e.path = "/abs/path".into();
        assert_eq!(e.sanitized_path(), Some("abs/path"));
    }

    #[test]
    fn permissions_projection() {
        let mut e = EntryInfo::file("f");
        e.made_by = Version {
            host_system: HostSystem::Unix,
            version: 30,
        };
        e.external_attrs = (UnixMode::IFREG | UnixMode(0o644)).0 << 16;
        assert_eq!(e.permissions(), 0o644);

        e.set_permissions(0o400);
        assert_eq!(e.permissions(), 0o400);
        assert!(e.is_read_only());
    }
}
