use std::io::{self, Write};

use byteorder::{WriteBytesExt, LE};
use winnow::{
    binary::{le_u16, le_u32, le_u64},
    combinator::opt,
    seq,
    token::literal,
    PResult, Parser, Partial,
};

use crate::entry::Method;
use crate::format::{MsdosTimestamp, Version, ZipBytes, ZipString};

/// 4.3.7 Local file header
#[derive(Debug, Clone)]
pub struct LocalFileHeaderRecord {
    /// version needed to extract
    pub reader_version: Version,

    /// general purpose bit flag
    pub flags: u16,

    /// compression method
    pub method: Method,

    /// last mod file datetime
    pub modified: MsdosTimestamp,

    /// crc-32
    pub crc32: u32,

    /// compressed size
    pub compressed_size: u32,

    /// uncompressed size
    pub uncompressed_size: u32,

    /// file name
    pub name: ZipString,

    /// extra field
    pub extra: ZipBytes,
}

impl LocalFileHeaderRecord {
    /// The signature for a local file header
    pub const SIGNATURE: &'static str = "PK\x03\x04";

    /// Fixed size of the header, before the name and extra field.
    pub const LENGTH: usize = 30;

    /// Offset of the crc32 field from the header start, for back-patching.
    pub const CRC32_OFFSET: u64 = 14;

    /// Parser for the local file header
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = literal(Self::SIGNATURE).parse_next(i)?;

        let reader_version = Version::parser.parse_next(i)?;
        let flags = le_u16.parse_next(i)?;
        let method = le_u16.parse_next(i).map(Method::from)?;
        let modified = MsdosTimestamp::parser.parse_next(i)?;
        let crc32 = le_u32.parse_next(i)?;
        let compressed_size = le_u32.parse_next(i)?;
        let uncompressed_size = le_u32.parse_next(i)?;

        let name_len = le_u16.parse_next(i)?;
        let extra_len = le_u16.parse_next(i)?;

        let name = ZipString::parser(name_len).parse_next(i)?;
        let extra = ZipBytes::parser(extra_len).parse_next(i)?;

        Ok(Self {
            reader_version,
            flags,
            method,
            modified,
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }

    /// Serialize, mirroring [LocalFileHeaderRecord::parser]
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE.as_bytes())?;
        self.reader_version.write_to(w)?;
        w.write_u16::<LE>(self.flags)?;
        w.write_u16::<LE>(self.method.into())?;
        self.modified.write_to(w)?;
        w.write_u32::<LE>(self.crc32)?;
        w.write_u32::<LE>(self.compressed_size)?;
        w.write_u32::<LE>(self.uncompressed_size)?;
        w.write_u16::<LE>(self.name.len() as u16)?;
        w.write_u16::<LE>(self.extra.0.len() as u16)?;
        w.write_all(&self.name.0)?;
        w.write_all(&self.extra.0)
    }

    /// Check for the presence of the bit flag that indicates a data descriptor
    /// is present after the file data.
    pub fn has_data_descriptor(&self) -> bool {
        // 4.3.9.1 This descriptor MUST exist if bit 3 of the general
        // purpose bit flag is set (see below).
        self.flags & 0b1000 != 0
    }

    /// Total size of the serialized header.
    pub fn len(&self) -> usize {
        Self::LENGTH + self.name.len() + self.extra.0.len()
    }
}

/// 4.3.9  Data descriptor:
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptorRecord {
    /// CRC32 checksum
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
}

impl DataDescriptorRecord {
    const SIGNATURE: &'static str = "PK\x07\x08";

    /// Create a parser for the data descriptor record.
    pub fn mk_parser(is_zip64: bool) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self> {
        move |i| {
            // From appnote.txt:
            //
            // 4.3.9.3 Although not originally assigned a signature, the value
            // 0x08074b50 has commonly been adopted as a signature value for the
            // data descriptor record.  Implementers SHOULD be aware that ZIP files
            // MAY be encountered with or without this signature marking data
            // descriptors and SHOULD account for either case when reading ZIP files
            // to ensure compatibility.
            let _ = opt(literal(Self::SIGNATURE)).parse_next(i)?;

            if is_zip64 {
                seq! {Self {
                    crc32: le_u32,
                    compressed_size: le_u64,
                    uncompressed_size: le_u64,
                }}
                .parse_next(i)
            } else {
                seq! {Self {
                    crc32: le_u32,
                    compressed_size: le_u32.map(|x| x as u64),
                    uncompressed_size: le_u32.map(|x| x as u64),
                }}
                .parse_next(i)
            }
        }
    }

    /// Serialize; this crate always emits the signature.
    pub fn write_to<W: Write>(&self, w: &mut W, is_zip64: bool) -> io::Result<()> {
        w.write_all(Self::SIGNATURE.as_bytes())?;
        w.write_u32::<LE>(self.crc32)?;
        if is_zip64 {
            w.write_u64::<LE>(self.compressed_size)?;
            w.write_u64::<LE>(self.uncompressed_size)
        } else {
            w.write_u32::<LE>(self.compressed_size as u32)?;
            w.write_u32::<LE>(self.uncompressed_size as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::HostSystem;

    #[test]
    fn local_header_round_trip() {
        let header = LocalFileHeaderRecord {
            reader_version: Version {
                host_system: HostSystem::MsDos,
                version: 20,
            },
            flags: 0x0800,
            method: Method::Deflate,
            modified: MsdosTimestamp {
                time: 0x5432,
                date: 0x4d62,
            },
            crc32: 0xdead_beef,
            compressed_size: 128,
            uncompressed_size: 1024,
            name: ZipString(b"dir/hello.txt".to_vec()),
            extra: ZipBytes(vec![1, 2, 3, 4]),
        };

        let mut out = Vec::new();
        header.write_to(&mut out).unwrap();
        assert_eq!(out.len(), header.len());
        assert_eq!(&out[..4], b"PK\x03\x04");

        let parsed = LocalFileHeaderRecord::parser
            .parse_peek(Partial::new(&out[..]))
            .unwrap()
            .1;
        assert_eq!(parsed.flags, header.flags);
        assert_eq!(parsed.method, Method::Deflate);
        assert_eq!(parsed.crc32, header.crc32);
        assert_eq!(parsed.name, header.name);
        assert_eq!(parsed.extra.0, header.extra.0);
    }

    #[test]
    fn descriptor_optional_signature() {
        let desc = DataDescriptorRecord {
            crc32: 0x1234_5678,
            compressed_size: 100,
            uncompressed_size: 200,
        };
        let mut out = Vec::new();
        desc.write_to(&mut out, false).unwrap();
        assert_eq!(out.len(), 16);

        // with signature
        let parsed = DataDescriptorRecord::mk_parser(false)
            .parse_peek(Partial::new(&out[..]))
            .unwrap()
            .1;
        assert_eq!(parsed, desc);

        // without
        let parsed = DataDescriptorRecord::mk_parser(false)
            .parse_peek(Partial::new(&out[4..]))
            .unwrap()
            .1;
        assert_eq!(parsed, desc);
    }

    #[test]
    fn descriptor_zip64_sizes() {
        let desc = DataDescriptorRecord {
            crc32: 1,
            compressed_size: u32::MAX as u64 + 10,
            uncompressed_size: u32::MAX as u64 + 20,
        };
        let mut out = Vec::new();
        desc.write_to(&mut out, true).unwrap();
        assert_eq!(out.len(), 24);

        let parsed = DataDescriptorRecord::mk_parser(true)
            .parse_peek(Partial::new(&out[..]))
            .unwrap()
            .1;
        assert_eq!(parsed, desc);
    }
}
