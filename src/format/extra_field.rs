//! The `<2-byte id, 2-byte length, data>` TLV sequence stored in local and
//! central headers, and the layouts of the records this crate understands.
//!
//! See `extrafld.txt` from the Info-ZIP distribution and the PKWARE appnote,
//! section 4.5.

use std::io::{self, Write};

use byteorder::{WriteBytesExt, LE};
use tracing::trace;
use winnow::{
    binary::{le_i32, le_u16, le_u8},
    seq,
    token::take,
    PResult, Parser, Partial,
};

use crate::checksum::{checksum_of, Crc32};
use crate::error::ExtraFieldError;
use crate::format::NtfsTimestamp;

/// Zip64 extended information (appnote 4.5.3)
pub const TAG_ZIP64: u16 = 0x0001;
/// NTFS timestamps (appnote 4.5.5)
pub const TAG_NTFS: u16 = 0x000a;
/// UNIX extra field (appnote 4.5.7), same layout as [TAG_INFOZIP_UNIX]
pub const TAG_UNIX: u16 = 0x000d;
/// Extended timestamp ("UT")
pub const TAG_EXTENDED_TIMESTAMP: u16 = 0x5455;
/// Info-ZIP UNIX v1 ("UX")
pub const TAG_INFOZIP_UNIX: u16 = 0x5855;
/// Info-ZIP Unicode Path ("up")
pub const TAG_UNICODE_PATH: u16 = 0x7075;
/// Info-ZIP Unicode Comment ("uc")
pub const TAG_UNICODE_COMMENT: u16 = 0x6375;
/// ZipArchive/WinZip code page record ("LZ")
pub const TAG_WINZIP_CODEPAGE: u16 = 0x5a4c;

/// An extra field map: records keyed by u16 tag, kept in insertion order.
///
/// Decoding keeps the first occurrence of a duplicated tag, which is also
/// what most zip tooling does.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct ExtraFields {
    records: Vec<(u16, Vec<u8>)>,
}

impl ExtraFields {
    /// Decode a TLV sequence.
    ///
    /// Fails with [ExtraFieldError::CorruptedData] if a declared length
    /// overruns the buffer or the buffer ends mid-record.
    pub fn parse(data: &[u8]) -> Result<Self, ExtraFieldError> {
        let mut res = Self::default();
        let mut rest = data;
        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(ExtraFieldError::CorruptedData);
            }
            let tag = u16::from_le_bytes([rest[0], rest[1]]);
            let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            rest = &rest[4..];
            if len > rest.len() {
                return Err(ExtraFieldError::CorruptedData);
            }
            if !res.contains(tag) {
                res.records.push((tag, rest[..len].to_vec()));
            } else {
                trace!(tag, "ignoring duplicate extra field");
            }
            rest = &rest[len..];
        }
        Ok(res)
    }

    /// Encode back to the TLV wire form.
    ///
    /// Fails with [ExtraFieldError::FieldSizeLimit] if a record payload
    /// exceeds 65535 bytes, or [ExtraFieldError::BufferSizeLimit] if the
    /// whole sequence would exceed `max_size`.
    pub fn encode(&self, max_size: Option<usize>) -> Result<Vec<u8>, ExtraFieldError> {
        let mut out = Vec::new();
        for (tag, data) in &self.records {
            if data.len() > u16::MAX as usize {
                return Err(ExtraFieldError::FieldSizeLimit {
                    tag: *tag,
                    len: data.len(),
                });
            }
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(data);
            if let Some(max) = max_size {
                if out.len() > max {
                    return Err(ExtraFieldError::BufferSizeLimit {
                        size: out.len(),
                        max,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Payload of the record with the given tag, if any.
    pub fn get(&self, tag: u16) -> Option<&[u8]> {
        self.records
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, d)| d.as_slice())
    }

    /// Insert a record, replacing any previous record with the same tag.
    pub fn insert(&mut self, tag: u16, data: Vec<u8>) {
        match self.records.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, d)) => *d = data,
            None => self.records.push((tag, data)),
        }
    }

    /// Remove the record with the given tag, returning its payload.
    pub fn remove(&mut self, tag: u16) -> Option<Vec<u8>> {
        let pos = self.records.iter().position(|(t, _)| *t == tag)?;
        Some(self.records.remove(pos).1)
    }

    /// Whether a record with this tag is present.
    pub fn contains(&self, tag: u16) -> bool {
        self.records.iter().any(|(t, _)| *t == tag)
    }

    /// Iterate over `(tag, payload)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &[u8])> {
        self.records.iter().map(|(t, d)| (*t, d.as_slice()))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the map holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The zip64 extra field has a fixed field order *but* optional fields:
/// each of its values is only present if the corresponding header field
/// is set to the all-ones sentinel. These settings capture which ones are.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtraFieldSettings {
    /// the header's uncompressed size was 0xFFFF_FFFF
    pub needs_uncompressed_size: bool,
    /// the header's compressed size was 0xFFFF_FFFF
    pub needs_compressed_size: bool,
    /// the header's local header offset was 0xFFFF_FFFF (central only)
    pub needs_header_offset: bool,
}

/// 4.5.3 Zip64 Extended Information Extra Field (0x0001)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraZip64Field {
    /// 64-bit uncompressed size
    pub uncompressed_size: Option<u64>,

    /// 64-bit compressed size
    pub compressed_size: Option<u64>,

    /// 64-bit local header offset
    pub header_offset: Option<u64>,
}

impl ExtraZip64Field {
    /// Parse the payload of a zip64 record, given which fields the header
    /// said would be present.
    pub fn parse(data: &[u8], settings: ExtraFieldSettings) -> Option<Self> {
        let mut res = Self::default();
        let mut rest = data;
        let mut take_u64 = |wanted: bool| -> Option<Option<u64>> {
            if !wanted {
                return Some(None);
            }
            if rest.len() < 8 {
                return None;
            }
            let v = u64::from_le_bytes(rest[..8].try_into().unwrap());
            rest = &rest[8..];
            Some(Some(v))
        };
        res.uncompressed_size = take_u64(settings.needs_uncompressed_size)?;
        res.compressed_size = take_u64(settings.needs_compressed_size)?;
        res.header_offset = take_u64(settings.needs_header_offset)?;
        Some(res)
    }

    /// Serialize the payload (not the TLV envelope).
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for v in [
            self.uncompressed_size,
            self.compressed_size,
            self.header_offset,
        ]
        .into_iter()
        .flatten()
        {
            w.write_u64::<LE>(v)?;
        }
        Ok(())
    }
}

/// 4.5.5 NTFS Extra Field (0x000a), attribute 1: three 100ns-since-1601
/// timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraNtfsField {
    /// modified time
    pub mtime: NtfsTimestamp,

    /// accessed time
    pub atime: NtfsTimestamp,

    /// created time
    pub ctime: NtfsTimestamp,
}

impl ExtraNtfsField {
    const FILE_TIME_TAG: u16 = 0x0001;

    /// Parse the payload of an NTFS record, scanning its attribute list for
    /// attribute 1.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut input = Partial::new(data);
        Self::parser(&mut input).ok()
    }

    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = take(4_usize).parse_next(i)?; // reserved (unused)
        loop {
            let tag = le_u16.parse_next(i)?;
            let payload = winnow::binary::length_take(le_u16).parse_next(i)?;
            if tag != Self::FILE_TIME_TAG {
                continue;
            }
            let (_, attr) = seq! {Self {
                mtime: NtfsTimestamp::parser,
                atime: NtfsTimestamp::parser,
                ctime: NtfsTimestamp::parser,
            }}
            .parse_peek(Partial::new(payload))?;
            return Ok(attr);
        }
    }

    /// Serialize the payload (not the TLV envelope).
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(0)?; // reserved
        w.write_u16::<LE>(Self::FILE_TIME_TAG)?;
        w.write_u16::<LE>(24)?;
        self.mtime.write_to(w)?;
        self.atime.write_to(w)?;
        self.ctime.write_to(w)
    }
}

/// Extended timestamp extra field (0x5455).
///
/// The local record carries every time its flag byte advertises; the
/// central record repeats the flags but carries the modification time only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraTimestampField {
    /// which times the *local* record carries
    pub flags: u8,
    /// modification time, seconds since epoch
    pub mtime: Option<i32>,
    /// access time, seconds since epoch
    pub atime: Option<i32>,
    /// creation time, seconds since epoch
    pub ctime: Option<i32>,
}

impl ExtraTimestampField {
    /// flag bit: modification time present
    pub const MOD_TIME: u8 = 0b001;
    /// flag bit: access time present
    pub const ACC_TIME: u8 = 0b010;
    /// flag bit: creation time present
    pub const CRT_TIME: u8 = 0b100;

    /// Parse a local-half payload: flags, then one i32 per advertised time.
    pub fn parse_local(data: &[u8]) -> Option<Self> {
        let mut input = Partial::new(data);
        let parse = |i: &mut Partial<&[u8]>| -> PResult<Self> {
            let flags = le_u8.parse_next(i)?;
            let mut res = Self {
                flags,
                ..Default::default()
            };
            if flags & Self::MOD_TIME != 0 {
                res.mtime = Some(le_i32.parse_next(i)?);
            }
            if flags & Self::ACC_TIME != 0 {
                res.atime = Some(le_i32.parse_next(i)?);
            }
            if flags & Self::CRT_TIME != 0 {
                res.ctime = Some(le_i32.parse_next(i)?);
            }
            Ok(res)
        };
        parse(&mut input).ok()
    }

    /// Parse a central-half payload: flags, then the modification time if
    /// advertised (other times are never stored centrally).
    pub fn parse_central(data: &[u8]) -> Option<Self> {
        let mut input = Partial::new(data);
        let parse = |i: &mut Partial<&[u8]>| -> PResult<Self> {
            let flags = le_u8.parse_next(i)?;
            let mtime = if flags & Self::MOD_TIME != 0 {
                Some(le_i32.parse_next(i)?)
            } else {
                None
            };
            Ok(Self {
                flags,
                mtime,
                atime: None,
                ctime: None,
            })
        };
        parse(&mut input).ok()
    }

    /// Serialize the local-half payload.
    pub fn write_local<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.flags)?;
        if self.flags & Self::MOD_TIME != 0 {
            w.write_i32::<LE>(self.mtime.unwrap_or_default())?;
        }
        if self.flags & Self::ACC_TIME != 0 {
            w.write_i32::<LE>(self.atime.unwrap_or_default())?;
        }
        if self.flags & Self::CRT_TIME != 0 {
            w.write_i32::<LE>(self.ctime.unwrap_or_default())?;
        }
        Ok(())
    }

    /// Serialize the central-half payload.
    pub fn write_central<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.flags)?;
        if self.flags & Self::MOD_TIME != 0 {
            w.write_i32::<LE>(self.mtime.unwrap_or_default())?;
        }
        Ok(())
    }
}

/// Info-ZIP UNIX v1 extra field (0x5855, also the 0x000d layout):
/// access and modification times, optional uid/gid, then whatever variable
/// data the writer chose to store. For symlink entries that trailing data
/// is the UTF-8 link target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraUnixField {
    /// file last access time, seconds since epoch
    pub atime: i32,
    /// file last modification time, seconds since epoch
    pub mtime: i32,
    /// file user id
    pub uid: Option<u16>,
    /// file group id
    pub gid: Option<u16>,
    /// variable length data field
    pub data: Vec<u8>,
}

impl ExtraUnixField {
    /// Parse the payload of a 0x5855 (or 0x000d) record.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let atime = i32::from_le_bytes(data[0..4].try_into().unwrap());
        let mtime = i32::from_le_bytes(data[4..8].try_into().unwrap());
        let rest = &data[8..];

        let (uid, gid, rest) = if rest.len() >= 4 {
            (
                Some(u16::from_le_bytes(rest[0..2].try_into().unwrap())),
                Some(u16::from_le_bytes(rest[2..4].try_into().unwrap())),
                &rest[4..],
            )
        } else {
            (None, None, rest)
        };

        Some(Self {
            atime,
            mtime,
            uid,
            gid,
            data: rest.to_vec(),
        })
    }

    /// Serialize the payload (not the TLV envelope).
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i32::<LE>(self.atime)?;
        w.write_i32::<LE>(self.mtime)?;
        if self.uid.is_some() || self.gid.is_some() || !self.data.is_empty() {
            w.write_u16::<LE>(self.uid.unwrap_or_default())?;
            w.write_u16::<LE>(self.gid.unwrap_or_default())?;
            w.write_all(&self.data)?;
        }
        Ok(())
    }
}

/// Info-ZIP Unicode Path (0x7075) and Unicode Comment (0x6375) records.
///
/// Both store the UTF-8 form of a legacy-encoded text, gated by a CRC-32
/// of the legacy bytes: if the legacy text was edited by a tool unaware of
/// the record, the CRC mismatches and the record must be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraUnicodeField {
    /// CRC-32 of the legacy-encoded text this record translates
    pub legacy_crc32: u32,
    /// the UTF-8 form
    pub utf8: Vec<u8>,
}

impl ExtraUnicodeField {
    const VERSION: u8 = 1;

    /// Parse the payload of a 0x7075 or 0x6375 record.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 5 || data[0] != Self::VERSION {
            return None;
        }
        let legacy_crc32 = u32::from_le_bytes(data[1..5].try_into().unwrap());
        Some(Self {
            legacy_crc32,
            utf8: data[5..].to_vec(),
        })
    }

    /// Build a record translating `legacy` into `utf8`.
    pub fn new(legacy: &[u8], utf8: Vec<u8>) -> Self {
        Self {
            legacy_crc32: checksum_of::<Crc32>(legacy),
            utf8,
        }
    }

    /// Whether this record applies to the given legacy bytes.
    pub fn applies_to(&self, legacy: &[u8]) -> bool {
        checksum_of::<Crc32>(legacy) == self.legacy_crc32
    }

    /// Serialize the payload (not the TLV envelope).
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(Self::VERSION)?;
        w.write_u32::<LE>(self.legacy_crc32)?;
        w.write_all(&self.utf8)
    }
}

/// The ZipArchive/WinZip code page record (0x5A4C): tags the code pages
/// the legacy file name and comment were encoded with, and can carry the
/// UTF-8 file name inline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraWinZipField {
    /// code page of the legacy file name bytes, if tagged
    pub filename_codepage: Option<u32>,
    /// the UTF-8 file name, stored inline when the legacy bytes could not
    /// represent it
    pub utf8_filename: Option<Vec<u8>>,
    /// code page of the legacy comment bytes, if tagged
    pub comment_codepage: Option<u32>,
}

impl ExtraWinZipField {
    const VERSION: u8 = 1;
    /// flag: the file name code page field is present
    pub const FILENAME_CODEPAGE: u8 = 0x01;
    /// flag: the comment code page field is present
    pub const COMMENT_CODEPAGE: u8 = 0x02;
    /// flag: the UTF-8 encoded file name is stored inline
    pub const ENCODED_FILENAME: u8 = 0x04;

    /// Parse the payload of a 0x5A4C record.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 2 || data[0] != Self::VERSION {
            return None;
        }
        let flags = data[1];
        let mut rest = &data[2..];

        let mut take_u32 = |rest: &mut &[u8]| -> Option<u32> {
            if rest.len() < 4 {
                return None;
            }
            let v = u32::from_le_bytes(rest[..4].try_into().unwrap());
            *rest = &rest[4..];
            Some(v)
        };

        let filename_codepage = if flags & Self::FILENAME_CODEPAGE != 0 {
            Some(take_u32(&mut rest)?)
        } else {
            None
        };

        let utf8_filename = if flags & Self::ENCODED_FILENAME != 0 {
            // the inline name runs to the end of the record, minus the
            // comment code page field if one follows
            let tail = if flags & Self::COMMENT_CODEPAGE != 0 {
                rest.len().checked_sub(4)?
            } else {
                rest.len()
            };
            let name = rest[..tail].to_vec();
            rest = &rest[tail..];
            Some(name)
        } else {
            None
        };

        let comment_codepage = if flags & Self::COMMENT_CODEPAGE != 0 {
            Some(take_u32(&mut rest)?)
        } else {
            None
        };

        Some(Self {
            filename_codepage,
            utf8_filename,
            comment_codepage,
        })
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.filename_codepage.is_some() {
            flags |= Self::FILENAME_CODEPAGE;
        }
        if self.comment_codepage.is_some() {
            flags |= Self::COMMENT_CODEPAGE;
        }
        if self.utf8_filename.is_some() {
            flags |= Self::ENCODED_FILENAME;
        }
        flags
    }

    /// Serialize the payload (not the TLV envelope).
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(Self::VERSION)?;
        w.write_u8(self.flags())?;
        if let Some(cp) = self.filename_codepage {
            w.write_u32::<LE>(cp)?;
        }
        if let Some(name) = &self.utf8_filename {
            w.write_all(name)?;
        }
        if let Some(cp) = self.comment_codepage {
            w.write_u32::<LE>(cp)?;
        }
        Ok(())
    }
}

/// Serialize a record payload into a byte vector.
///
/// The payload writers only fail on the underlying sink, which a Vec never
/// does.
pub(crate) fn payload<F>(f: F) -> Vec<u8>
where
    F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
{
    let mut v = Vec::new();
    f(&mut v).expect("writing to a Vec cannot fail");
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlv_round_trip() {
        let mut fields = ExtraFields::default();
        fields.insert(0x5455, vec![1, 2, 3, 4, 5]);
        fields.insert(0xcafe, vec![]);
        fields.insert(0x0001, vec![0; 16]);

        let encoded = fields.encode(None).unwrap();
        let decoded = ExtraFields::parse(&encoded).unwrap();
        assert_eq!(fields, decoded);
    }

    #[test]
    fn tlv_duplicate_keeps_first() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0x55, 0x54, 2, 0, 0xaa, 0xbb]);
        data.extend_from_slice(&[0x55, 0x54, 1, 0, 0xcc]);
        let fields = ExtraFields::parse(&data).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get(0x5455), Some(&[0xaa, 0xbb][..]));
    }

    #[test]
    fn tlv_overrun_is_corrupted() {
        // declared 8 bytes, only 2 available
        let data = [0x55u8, 0x54, 8, 0, 1, 2];
        assert!(matches!(
            ExtraFields::parse(&data),
            Err(ExtraFieldError::CorruptedData)
        ));

        // truncated record header
        let data = [0x55u8, 0x54, 8];
        assert!(matches!(
            ExtraFields::parse(&data),
            Err(ExtraFieldError::CorruptedData)
        ));
    }

    #[test]
    fn encode_limits() {
        let mut fields = ExtraFields::default();
        fields.insert(0x0001, vec![0u8; 70_000]);
        assert!(matches!(
            fields.encode(None),
            Err(ExtraFieldError::FieldSizeLimit { tag: 0x0001, .. })
        ));

        let mut fields = ExtraFields::default();
        fields.insert(0x0001, vec![0u8; 100]);
        assert!(matches!(
            fields.encode(Some(50)),
            Err(ExtraFieldError::BufferSizeLimit { .. })
        ));
    }

    #[test]
    fn max_size_value_round_trips() {
        let mut fields = ExtraFields::default();
        fields.insert(0xbeef, vec![0x5a; u16::MAX as usize]);
        let encoded = fields.encode(None).unwrap();
        let decoded = ExtraFields::parse(&encoded).unwrap();
        assert_eq!(decoded.get(0xbeef).unwrap().len(), u16::MAX as usize);
    }

    #[test]
    fn zip64_parses_only_requested_fields() {
        let field = ExtraZip64Field {
            uncompressed_size: Some(0x1_0000_0000),
            compressed_size: None,
            header_offset: Some(42),
        };
        let data = payload(|w| field.write_to(w));
        assert_eq!(data.len(), 16);

        let parsed = ExtraZip64Field::parse(
            &data,
            ExtraFieldSettings {
                needs_uncompressed_size: true,
                needs_compressed_size: false,
                needs_header_offset: true,
            },
        )
        .unwrap();
        assert_eq!(parsed, field);
    }

    #[test]
    fn ntfs_round_trip() {
        let field = ExtraNtfsField {
            mtime: NtfsTimestamp {
                timestamp: 0x01d0_0000_0000_0000,
            },
            atime: NtfsTimestamp { timestamp: 1 },
            ctime: NtfsTimestamp { timestamp: 2 },
        };
        let data = payload(|w| field.write_to(w));
        assert_eq!(ExtraNtfsField::parse(&data), Some(field));
    }

    #[test]
    fn ntfs_skips_unknown_attributes() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0; 4]); // reserved
        data.extend_from_slice(&[0x02, 0x00, 0x03, 0x00, 1, 2, 3]); // unknown attr
        data.extend_from_slice(&[0x01, 0x00, 24, 0x00]); // attr 1
        data.extend_from_slice(&[0; 24]);
        let parsed = ExtraNtfsField::parse(&data).unwrap();
        assert_eq!(parsed.mtime.timestamp, 0);
    }

    #[test]
    fn extended_timestamp_halves() {
        let field = ExtraTimestampField {
            flags: ExtraTimestampField::MOD_TIME | ExtraTimestampField::ACC_TIME,
            mtime: Some(1_600_000_000),
            atime: Some(1_600_000_001),
            ctime: None,
        };

        let local = payload(|w| field.write_local(w));
        assert_eq!(local.len(), 9);
        assert_eq!(ExtraTimestampField::parse_local(&local), Some(field.clone()));

        let central = payload(|w| field.write_central(w));
        assert_eq!(central.len(), 5);
        let parsed = ExtraTimestampField::parse_central(&central).unwrap();
        assert_eq!(parsed.mtime, field.mtime);
        assert_eq!(parsed.atime, None);
    }

    #[test]
    fn unix_field_with_symlink_target() {
        let field = ExtraUnixField {
            atime: 1000,
            mtime: 2000,
            uid: Some(501),
            gid: Some(20),
            data: b"target/file.txt".to_vec(),
        };
        let data = payload(|w| field.write_to(w));
        assert_eq!(ExtraUnixField::parse(&data), Some(field));
    }

    #[test]
    fn unix_field_times_only() {
        let data = payload(|w| {
            ExtraUnixField {
                atime: 1,
                mtime: 2,
                ..Default::default()
            }
            .write_to(w)
        });
        assert_eq!(data.len(), 8);
        let parsed = ExtraUnixField::parse(&data).unwrap();
        assert_eq!(parsed.uid, None);
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn unicode_field_crc_gate() {
        let legacy = b"wikipedia.txt";
        let field = ExtraUnicodeField::new(legacy, "викиpedia.txt".as_bytes().to_vec());
        let data = payload(|w| field.write_to(w));
        let parsed = ExtraUnicodeField::parse(&data).unwrap();
        assert!(parsed.applies_to(legacy));
        assert!(!parsed.applies_to(b"renamed.txt"));
    }

    #[test]
    fn unicode_field_bad_version_rejected() {
        let data = [2u8, 0, 0, 0, 0, b'x'];
        assert_eq!(ExtraUnicodeField::parse(&data), None);
    }

    #[test]
    fn winzip_field_all_flags() {
        let field = ExtraWinZipField {
            filename_codepage: Some(65001),
            utf8_filename: Some("ファイル.txt".as_bytes().to_vec()),
            comment_codepage: Some(1251),
        };
        let data = payload(|w| field.write_to(w));
        assert_eq!(ExtraWinZipField::parse(&data), Some(field));
    }

    #[test]
    fn winzip_field_codepages_only() {
        let field = ExtraWinZipField {
            filename_codepage: Some(866),
            utf8_filename: None,
            comment_codepage: Some(866),
        };
        let data = payload(|w| field.write_to(w));
        assert_eq!(ExtraWinZipField::parse(&data), Some(field));
    }
}
