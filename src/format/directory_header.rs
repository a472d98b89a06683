use std::io::{self, Write};

use byteorder::{WriteBytesExt, LE};
use winnow::{
    binary::{le_u16, le_u32},
    token::literal,
    PResult, Parser, Partial,
};

use crate::encoding::detect_utf8;
use crate::entry::Method;
use crate::format::{MsdosTimestamp, Version, ZipBytes, ZipString};

/// 4.3.12 Central directory structure: File header
#[derive(Debug, Clone)]
pub struct DirectoryHeader {
    /// version made by
    pub creator_version: Version,
    /// version needed to extract
    pub reader_version: Version,
    /// general purpose bit flag
    pub flags: u16,
    /// compression method
    pub method: Method,
    /// last mod file datetime
    pub modified: MsdosTimestamp,
    /// crc32
    pub crc32: u32,
    /// compressed size
    pub compressed_size: u32,
    /// uncompressed size
    pub uncompressed_size: u32,
    /// disk number start
    pub disk_nbr_start: u16,
    /// internal file attributes
    pub internal_attrs: u16,
    /// external file attributes
    pub external_attrs: u32,
    /// relative offset of local header
    pub header_offset: u32,

    /// name
    pub name: ZipString,
    /// extra
    pub extra: ZipBytes,
    /// comment
    pub comment: ZipString,
}

impl DirectoryHeader {
    /// The signature for a central directory entry
    pub const SIGNATURE: &'static str = "PK\x01\x02";

    /// Fixed size of the record, before the variable-length fields.
    pub const LENGTH: usize = 46;

    /// Parser for the central directory file header
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = literal(Self::SIGNATURE).parse_next(i)?;
        let creator_version = Version::parser.parse_next(i)?;
        let reader_version = Version::parser.parse_next(i)?;
        let flags = le_u16.parse_next(i)?;
        let method = le_u16.parse_next(i).map(Method::from)?;
        let modified = MsdosTimestamp::parser.parse_next(i)?;
        let crc32 = le_u32.parse_next(i)?;
        let compressed_size = le_u32.parse_next(i)?;
        let uncompressed_size = le_u32.parse_next(i)?;
        let name_len = le_u16.parse_next(i)?;
        let extra_len = le_u16.parse_next(i)?;
        let comment_len = le_u16.parse_next(i)?;
        let disk_nbr_start = le_u16.parse_next(i)?;
        let internal_attrs = le_u16.parse_next(i)?;
        let external_attrs = le_u32.parse_next(i)?;
        let header_offset = le_u32.parse_next(i)?;

        let name = ZipString::parser(name_len).parse_next(i)?;
        let extra = ZipBytes::parser(extra_len).parse_next(i)?;
        let comment = ZipString::parser(comment_len).parse_next(i)?;

        Ok(Self {
            creator_version,
            reader_version,
            flags,
            method,
            modified,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_nbr_start,
            internal_attrs,
            external_attrs,
            header_offset,
            name,
            extra,
            comment,
        })
    }

    /// Serialize, mirroring [DirectoryHeader::parser]
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE.as_bytes())?;
        self.creator_version.write_to(w)?;
        self.reader_version.write_to(w)?;
        w.write_u16::<LE>(self.flags)?;
        w.write_u16::<LE>(self.method.into())?;
        self.modified.write_to(w)?;
        w.write_u32::<LE>(self.crc32)?;
        w.write_u32::<LE>(self.compressed_size)?;
        w.write_u32::<LE>(self.uncompressed_size)?;
        w.write_u16::<LE>(self.name.len() as u16)?;
        w.write_u16::<LE>(self.extra.0.len() as u16)?;
        w.write_u16::<LE>(self.comment.len() as u16)?;
        w.write_u16::<LE>(self.disk_nbr_start)?;
        w.write_u16::<LE>(self.internal_attrs)?;
        w.write_u32::<LE>(self.external_attrs)?;
        w.write_u32::<LE>(self.header_offset)?;
        w.write_all(&self.name.0)?;
        w.write_all(&self.extra.0)?;
        w.write_all(&self.comment.0)
    }

    /// Total size of the serialized record.
    pub fn len(&self) -> usize {
        Self::LENGTH + self.name.len() + self.extra.0.len() + self.comment.len()
    }

    /// Whether the name or comment definitely can't be UTF-8, or whether the
    /// UTF-8 flag should be trusted.
    pub fn is_non_utf8(&self) -> bool {
        let (valid1, require1) = detect_utf8(&self.name.0[..]);
        let (valid2, require2) = detect_utf8(&self.comment.0[..]);
        if !valid1 || !valid2 {
            // definitely not utf-8
            return true;
        }

        if !require1 && !require2 {
            // name and comment only use single-byte runes that overlap with UTF-8
            return false;
        }

        // Might be UTF-8, might be some other encoding; preserve existing flag.
        // Some ZIP writers use UTF-8 encoding without setting the UTF-8 flag.
        // Since it is impossible to always distinguish valid UTF-8 from some
        // other encoding (e.g., GBK or Shift-JIS), we trust the flag.
        self.flags & 0x800 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::HostSystem;

    #[test]
    fn directory_header_round_trip() {
        let header = DirectoryHeader {
            creator_version: Version {
                host_system: HostSystem::Unix,
                version: 30,
            },
            reader_version: Version {
                host_system: HostSystem::MsDos,
                version: 20,
            },
            flags: 0x0808,
            method: Method::Deflate,
            modified: MsdosTimestamp {
                time: 0x1234,
                date: 0x5678,
            },
            crc32: 42,
            compressed_size: 10,
            uncompressed_size: 20,
            disk_nbr_start: 0,
            internal_attrs: 1,
            external_attrs: 0o100644 << 16,
            header_offset: 1000,
            name: ZipString(b"some/file".to_vec()),
            extra: ZipBytes(vec![]),
            comment: ZipString(b"a comment".to_vec()),
        };

        let mut out = Vec::new();
        header.write_to(&mut out).unwrap();
        assert_eq!(out.len(), header.len());

        let parsed = DirectoryHeader::parser
            .parse_peek(Partial::new(&out[..]))
            .unwrap()
            .1;
        assert_eq!(parsed.external_attrs, header.external_attrs);
        assert_eq!(parsed.header_offset, header.header_offset);
        assert_eq!(parsed.comment, header.comment);
        assert_eq!(parsed.creator_version, header.creator_version);
    }
}
