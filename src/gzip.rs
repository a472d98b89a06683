//! Gzip framing over the same deflate machinery: a thin layer over
//! flate2's gzip types that surfaces the header fields (original file
//! name, comment, modification time, extra bytes) the format carries.

use std::io::{self, Read, Write};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};

use crate::format::unix_to_datetime;

/// The fields a gzip member header can carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GzipHeader {
    /// original file name, if recorded
    pub filename: Option<Vec<u8>>,
    /// comment, if recorded
    pub comment: Option<Vec<u8>>,
    /// modification time, if recorded (and representable)
    pub mtime: Option<DateTime<Utc>>,
    /// raw extra field bytes, if recorded
    pub extra: Option<Vec<u8>>,
}

/// Reads a gzip member, decompressing as it goes.
pub struct GzipReader<R: Read> {
    inner: GzDecoder<R>,
}

impl<R: Read> GzipReader<R> {
    /// Wrap a reader positioned at the start of a gzip member.
    pub fn new(inner: R) -> Self {
        Self {
            inner: GzDecoder::new(inner),
        }
    }

    /// The member's header fields. Available once some data was read
    /// (the header is parsed lazily from the first read).
    pub fn header(&self) -> Option<GzipHeader> {
        let h = self.inner.header()?;
        Some(GzipHeader {
            filename: h.filename().map(|f| f.to_vec()),
            comment: h.comment().map(|c| c.to_vec()),
            mtime: match h.mtime() {
                0 => None,
                t => unix_to_datetime(t as i64),
            },
            extra: h.extra().map(|e| e.to_vec()),
        })
    }

    /// Hand back the lower reader.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read> Read for GzipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Writes a gzip member, compressing as it goes.
pub struct GzipWriter<W: Write> {
    inner: GzEncoder<W>,
}

impl<W: Write> GzipWriter<W> {
    /// A writer with an empty header and the default compression level.
    pub fn new(inner: W) -> Self {
        Self::with_header(inner, &GzipHeader::default(), None)
    }

    /// A writer carrying the given header fields.
    pub fn with_header(inner: W, header: &GzipHeader, level: Option<u32>) -> Self {
        let mut builder = GzBuilder::new();
        if let Some(filename) = &header.filename {
            builder = builder.filename(filename.clone());
        }
        if let Some(comment) = &header.comment {
            builder = builder.comment(comment.clone());
        }
        if let Some(mtime) = header.mtime {
            builder = builder.mtime(mtime.timestamp().clamp(0, u32::MAX as i64) as u32);
        }
        if let Some(extra) = &header.extra {
            builder = builder.extra(extra.clone());
        }
        let level = level.map_or_else(Compression::default, Compression::new);
        Self {
            inner: builder.write(inner, level),
        }
    }

    /// Finish the member (trailer included) and hand back the lower
    /// writer.
    pub fn finish(self) -> io::Result<W> {
        self.inner.finish()
    }
}

impl<W: Write> Write for GzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    #[test]
    fn round_trip_with_header_fields() {
        let mtime = Utc.with_ymd_and_hms(2020, 5, 17, 12, 0, 0).single().unwrap();
        let header = GzipHeader {
            filename: Some(b"notes.txt".to_vec()),
            comment: Some(b"weekly notes".to_vec()),
            mtime: Some(mtime),
            extra: None,
        };

        let mut w = GzipWriter::with_header(Vec::new(), &header, Some(6));
        w.write_all(b"gzip me please").unwrap();
        let bytes = w.finish().unwrap();

        let mut r = GzipReader::new(Cursor::new(bytes));
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"gzip me please");

        let parsed = r.header().unwrap();
        assert_eq!(parsed.filename.as_deref(), Some(&b"notes.txt"[..]));
        assert_eq!(parsed.comment.as_deref(), Some(&b"weekly notes"[..]));
        assert_eq!(parsed.mtime, Some(mtime));
    }

    #[test]
    fn empty_header_round_trip() {
        let mut w = GzipWriter::new(Vec::new());
        w.write_all(b"payload").unwrap();
        let bytes = w.finish().unwrap();

        let mut r = GzipReader::new(Cursor::new(bytes));
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
        let header = r.header().unwrap();
        assert_eq!(header.filename, None);
        assert_eq!(header.mtime, None);
    }
}
