use std::io::{self, Write};

use byteorder::{WriteBytesExt, LE};
use tracing::trace;
use winnow::{
    binary::{le_u16, le_u32, le_u64, length_take},
    seq,
    token::literal,
    PResult, Parser, Partial,
};

use crate::error::{Error, FormatError};

/// 4.3.16  End of central directory record:
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectoryRecord {
    /// number of this disk
    pub disk_nbr: u16,

    /// number of the disk with the start of the central directory
    pub dir_disk_nbr: u16,

    /// total number of entries in the central directory on this disk
    pub dir_records_this_disk: u16,

    /// total number of entries in the central directory
    pub directory_records: u16,

    /// size of the central directory
    pub directory_size: u32,

    /// offset of start of central directory with respect to the starting disk number
    pub directory_offset: u32,

    /// .ZIP file comment
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectoryRecord {
    /// Does not include comment size & comment data
    pub const MIN_LENGTH: usize = 20;
    const SIGNATURE: &'static str = "PK\x05\x06";

    /// Find the end of central directory record in a block of data
    pub fn find_in_block(b: &[u8]) -> Option<Located<Self>> {
        for i in (0..(b.len().saturating_sub(Self::MIN_LENGTH + 1))).rev() {
            let mut input = Partial::new(&b[i..]);
            if let Ok(directory) = Self::parser.parse_next(&mut input) {
                return Some(Located {
                    offset: i as u64,
                    inner: directory,
                });
            }
        }
        None
    }

    /// Parser for the end of central directory record
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = literal(Self::SIGNATURE).parse_next(i)?;
        seq! {Self {
            disk_nbr: le_u16,
            dir_disk_nbr: le_u16,
            dir_records_this_disk: le_u16,
            directory_records: le_u16,
            directory_size: le_u32,
            directory_offset: le_u32,
            comment: length_take(le_u16).map(|s: &[u8]| s.to_vec()),
        }}
        .parse_next(i)
    }

    /// Serialize, mirroring [EndOfCentralDirectoryRecord::parser]
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE.as_bytes())?;
        w.write_u16::<LE>(self.disk_nbr)?;
        w.write_u16::<LE>(self.dir_disk_nbr)?;
        w.write_u16::<LE>(self.dir_records_this_disk)?;
        w.write_u16::<LE>(self.directory_records)?;
        w.write_u32::<LE>(self.directory_size)?;
        w.write_u32::<LE>(self.directory_offset)?;
        w.write_u16::<LE>(self.comment.len() as u16)?;
        w.write_all(&self.comment)
    }
}

/// 4.3.15 Zip64 end of central directory locator
#[derive(Debug, Clone, Copy)]
pub struct EndOfCentralDirectory64Locator {
    /// number of the disk with the start of the zip64 end of central directory
    pub dir_disk_number: u32,
    /// relative offset of the zip64 end of central directory record
    pub directory_offset: u64,
    /// total number of disks
    pub total_disks: u32,
}

impl EndOfCentralDirectory64Locator {
    /// Length of the locator
    pub const LENGTH: usize = 20;
    const SIGNATURE: &'static str = "PK\x06\x07";

    /// Parser for the zip64 end of central directory locator
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        _ = literal(Self::SIGNATURE).parse_next(i)?;
        seq! {Self {
            dir_disk_number: le_u32,
            directory_offset: le_u64,
            total_disks: le_u32,
        }}
        .parse_next(i)
    }

    /// Serialize, mirroring [EndOfCentralDirectory64Locator::parser]
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE.as_bytes())?;
        w.write_u32::<LE>(self.dir_disk_number)?;
        w.write_u64::<LE>(self.directory_offset)?;
        w.write_u32::<LE>(self.total_disks)
    }
}

/// 4.3.14  Zip64 end of central directory record
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory64Record {
    /// size of zip64 end of central directory record
    pub record_size: u64,

    /// version made by
    pub creator_version: u16,

    /// version needed to extract
    pub reader_version: u16,

    /// number of this disk
    pub disk_nbr: u32,

    /// number of the disk with the start of the central directory
    pub dir_disk_nbr: u32,

    /// total number of entries in the central directory on this disk
    pub dir_records_this_disk: u64,

    /// total number of entries in the central directory
    pub directory_records: u64,

    /// size of the central directory
    pub directory_size: u64,

    /// offset of the start of central directory with respect to the
    /// starting disk number
    pub directory_offset: u64,
}

impl EndOfCentralDirectory64Record {
    const SIGNATURE: &'static str = "PK\x06\x06";

    /// Size of the fixed part of the record, after the record_size field.
    pub const CONTENT_SIZE: u64 = 44;

    /// Parser for the zip64 end of central directory record
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        _ = literal(Self::SIGNATURE).parse_next(i)?;
        seq! {Self {
            record_size: le_u64,
            creator_version: le_u16,
            reader_version: le_u16,
            disk_nbr: le_u32,
            dir_disk_nbr: le_u32,
            dir_records_this_disk: le_u64,
            directory_records: le_u64,
            directory_size: le_u64,
            directory_offset: le_u64,
        }}
        .parse_next(i)
    }

    /// Serialize, mirroring [EndOfCentralDirectory64Record::parser]
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE.as_bytes())?;
        w.write_u64::<LE>(self.record_size)?;
        w.write_u16::<LE>(self.creator_version)?;
        w.write_u16::<LE>(self.reader_version)?;
        w.write_u32::<LE>(self.disk_nbr)?;
        w.write_u32::<LE>(self.dir_disk_nbr)?;
        w.write_u64::<LE>(self.dir_records_this_disk)?;
        w.write_u64::<LE>(self.directory_records)?;
        w.write_u64::<LE>(self.directory_size)?;
        w.write_u64::<LE>(self.directory_offset)
    }
}

/// A zip structure and its location in the input file
#[derive(Debug, Clone)]
pub struct Located<T> {
    /// Absolute byte offset from the start of the file
    pub offset: u64,

    /// The structure itself
    pub inner: T,
}

/// Coalesces zip and zip64 "end of central directory" record info
pub struct EndOfCentralDirectory {
    /// The end of central directory record
    pub dir: Located<EndOfCentralDirectoryRecord>,

    /// The zip64 end of central directory record
    pub dir64: Option<Located<EndOfCentralDirectory64Record>>,

    /// Zip files may be prepended by arbitrary data, this is how much
    /// data is at the beginning of the file that isn't part of the zip
    pub global_offset: i64,
}

impl EndOfCentralDirectory {
    pub(crate) fn new(
        size: u64,
        dir: Located<EndOfCentralDirectoryRecord>,
        dir64: Option<Located<EndOfCentralDirectory64Record>>,
    ) -> Result<Self, Error> {
        let mut res = Self {
            dir,
            dir64,
            global_offset: 0,
        };

        //
        // Pure .zip files look like this:
        // ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
        //                     <------directory_size----->
        // [ Data 1 ][ Data 2 ][    Central directory    ][ ??? ]
        // ^                   ^                          ^
        // 0                   directory_offset           directory_end_offset
        // ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
        //
        // But there exist some valid zip archives with padding at the beginning, like so:
        // ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
        // <--global_offset->                    <------directory_size----->
        // [    Padding     ][ Data 1 ][ Data 2 ][    Central directory    ][ ??? ]
        // ^                 ^                   ^                         ^
        // 0                 global_offset       computed_directory_offset directory_end_offset
        // ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
        //
        // (e.g. self-extracting archives are executables with a .zip file appended)
        //
        // `directory_end_offset` is found by scanning the file (so it accounts for padding), but
        // `directory_offset` is found by reading a data structure (so it does not account for padding).
        // If we just trusted `directory_offset`, we'd be reading the central directory at the wrong place.
        let computed_directory_offset = res
            .located_directory_offset()
            .checked_sub(res.directory_size())
            .ok_or(FormatError::DirectoryOffsetPointsOutsideFile)?;

        // did we find a valid offset?
        if (0..size).contains(&computed_directory_offset) {
            // that's different from the recorded one?
            if computed_directory_offset != res.directory_offset() {
                // then assume the whole file is offset
                res.global_offset =
                    computed_directory_offset as i64 - res.directory_offset() as i64;
                res.set_directory_offset(computed_directory_offset);
            }
        }

        // make sure directory_offset points to somewhere in our file
        trace!(
            "directory offset = {}, valid range = 0..{}",
            res.directory_offset(),
            size
        );
        if !(0..size).contains(&res.directory_offset()) {
            return Err(FormatError::DirectoryOffsetPointsOutsideFile.into());
        }

        Ok(res)
    }

    #[inline]
    pub(crate) fn located_directory_offset(&self) -> u64 {
        match self.dir64.as_ref() {
            Some(d64) => d64.offset,
            None => self.dir.offset,
        }
    }

    #[inline]
    pub(crate) fn directory_offset(&self) -> u64 {
        match self.dir64.as_ref() {
            Some(d64) => d64.inner.directory_offset,
            None => self.dir.inner.directory_offset as u64,
        }
    }

    #[inline]
    pub(crate) fn directory_size(&self) -> u64 {
        match self.dir64.as_ref() {
            Some(d64) => d64.inner.directory_size,
            None => self.dir.inner.directory_size as u64,
        }
    }

    #[inline]
    pub(crate) fn set_directory_offset(&mut self, offset: u64) {
        match self.dir64.as_mut() {
            Some(d64) => d64.inner.directory_offset = offset,
            None => self.dir.inner.directory_offset = offset as u32,
        };
    }

    #[inline]
    pub(crate) fn directory_records(&self) -> u64 {
        match self.dir64.as_ref() {
            Some(d64) => d64.inner.directory_records,
            None => self.dir.inner.directory_records as u64,
        }
    }

    #[inline]
    pub(crate) fn comment(&self) -> &[u8] {
        &self.dir.inner.comment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eocd_round_trip() {
        let record = EndOfCentralDirectoryRecord {
            disk_nbr: 0,
            dir_disk_nbr: 0,
            dir_records_this_disk: 3,
            directory_records: 3,
            directory_size: 222,
            directory_offset: 3000,
            comment: b"hello".to_vec(),
        };
        let mut out = Vec::new();
        record.write_to(&mut out).unwrap();
        assert_eq!(out.len(), 22 + 5);

        let parsed = EndOfCentralDirectoryRecord::parser
            .parse_peek(Partial::new(&out[..]))
            .unwrap()
            .1;
        assert_eq!(parsed.directory_records, 3);
        assert_eq!(parsed.comment, b"hello");
    }

    #[test]
    fn find_in_block_scans_backward() {
        let record = EndOfCentralDirectoryRecord {
            disk_nbr: 0,
            dir_disk_nbr: 0,
            dir_records_this_disk: 1,
            directory_records: 1,
            directory_size: 46,
            directory_offset: 100,
            comment: vec![],
        };
        let mut block = vec![0u8; 64];
        record.write_to(&mut block).unwrap();

        let located = EndOfCentralDirectoryRecord::find_in_block(&block).unwrap();
        assert_eq!(located.offset, 64);
        assert_eq!(located.inner.directory_offset, 100);
    }

    #[test]
    fn zip64_records_round_trip() {
        let record = EndOfCentralDirectory64Record {
            record_size: EndOfCentralDirectory64Record::CONTENT_SIZE,
            creator_version: 45,
            reader_version: 45,
            disk_nbr: 0,
            dir_disk_nbr: 0,
            dir_records_this_disk: 1,
            directory_records: 1,
            directory_size: 100,
            directory_offset: u32::MAX as u64 + 1,
        };
        let mut out = Vec::new();
        record.write_to(&mut out).unwrap();
        assert_eq!(out.len(), 56);

        let parsed = EndOfCentralDirectory64Record::parser
            .parse_peek(Partial::new(&out[..]))
            .unwrap()
            .1;
        assert_eq!(parsed.directory_offset, u32::MAX as u64 + 1);

        let locator = EndOfCentralDirectory64Locator {
            dir_disk_number: 0,
            directory_offset: 12345,
            total_disks: 1,
        };
        let mut out = Vec::new();
        locator.write_to(&mut out).unwrap();
        assert_eq!(out.len(), EndOfCentralDirectory64Locator::LENGTH);

        let parsed = EndOfCentralDirectory64Locator::parser
            .parse_peek(Partial::new(&out[..]))
            .unwrap()
            .1;
        assert_eq!(parsed.directory_offset, 12345);
    }
}
