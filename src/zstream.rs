//! Streaming deflate pipes over a lower byte stream: [DeflateReader] for
//! inflating, [DeflateWriter] for deflating, both over 32 KiB buffers.
//!
//! The raw-deflate flavor is what zip entry payloads use; the zlib flavor
//! (header + adler32 trailer) is what `.zz` side streams and embedded zlib
//! blobs use. The gzip flavor lives in [crate::gzip], where flate2 already
//! handles the header plumbing.

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use oval::Buffer;
use tracing::trace;

use crate::entry::Method;
use crate::error::{Error, UnsupportedError};

/// Buffer size for both directions of the pipe.
pub(crate) const BUFFER_SIZE: usize = 32 * 1024;

/// Which framing the deflate stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Bare RFC 1951 deflate, as in zip entry payloads.
    Deflate,
    /// RFC 1950: zlib header and adler-32 trailer.
    Zlib,
}

impl Flavor {
    fn zlib_header(self) -> bool {
        matches!(self, Flavor::Zlib)
    }
}

fn decompress_error(e: flate2::DecompressError) -> io::Error {
    let err = if e.needs_dictionary().is_some() {
        Error::Unsupported(UnsupportedError::DictionaryNeeded)
    } else {
        Error::Decompression {
            method: Method::Deflate,
            msg: e.to_string(),
        }
    };
    err.into()
}

fn compress_error(e: flate2::CompressError) -> io::Error {
    Error::Decompression {
        method: Method::Deflate,
        msg: e.to_string(),
    }
    .into()
}

/// Inflates bytes pulled from a lower reader.
///
/// Tracks the logical (uncompressed) position, detects the end of the
/// deflate stream, and remembers how much lower-stream input it read past
/// the stream end, so a seekable lower stream can be repositioned right
/// after the compressed data.
pub struct DeflateReader<R: Read> {
    inner: R,
    decomp: Decompress,
    flavor: Flavor,
    buf: Buffer,
    /// logical position in the uncompressed stream
    pos: u64,
    /// where the compressed data started in the lower stream, for
    /// random-access resets; only tracked for seekable lower streams
    origin: Option<u64>,
    eof: bool,
    at_end: bool,
    poisoned: bool,
}

impl<R: Read> DeflateReader<R> {
    /// A reader over a sequential lower stream.
    pub fn new(inner: R, flavor: Flavor) -> Self {
        Self {
            inner,
            decomp: Decompress::new(flavor.zlib_header()),
            flavor,
            buf: Buffer::with_capacity(BUFFER_SIZE),
            pos: 0,
            origin: None,
            eof: false,
            at_end: false,
            poisoned: false,
        }
    }

    /// Logical position in the uncompressed stream.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Total uncompressed size, known once the stream end was reached.
    pub fn uncompressed_size(&self) -> Option<u64> {
        self.at_end.then_some(self.pos)
    }

    /// Whether the deflate stream has ended.
    pub fn at_end(&self) -> bool {
        self.at_end
    }

    /// Lower-stream bytes read but not consumed by the decompressor.
    pub fn trailing_input(&self) -> usize {
        self.buf.available_data()
    }

    /// Hand back the lower stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Access the lower stream.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    fn fill(&mut self) -> io::Result<()> {
        if self.eof || self.buf.available_data() > 0 {
            return Ok(());
        }
        if self.buf.available_space() == 0 {
            self.buf.shift();
        }
        match self.inner.read(self.buf.space())? {
            0 => self.eof = true,
            n => {
                trace!(n, "deflate reader: filled");
                self.buf.fill(n);
            }
        }
        Ok(())
    }
}

impl<R: Read + Seek> DeflateReader<R> {
    /// A reader over a seekable lower stream, capturing the current
    /// position as the compressed payload origin.
    pub fn new_seekable(mut inner: R, flavor: Flavor) -> io::Result<Self> {
        let origin = inner.stream_position()?;
        let mut res = Self::new(inner, flavor);
        res.origin = Some(origin);
        Ok(res)
    }

    /// Reposition the lower stream to just past the compressed data,
    /// un-reading any buffered tail. Call after the stream end was reached
    /// when the lower stream continues with other records.
    pub fn rewind_trailing(&mut self) -> io::Result<()> {
        let n = self.buf.available_data();
        if n > 0 {
            self.inner.seek(SeekFrom::Current(-(n as i64)))?;
            self.buf.consume(n);
        }
        Ok(())
    }

    /// Seek to a logical (uncompressed) position: forward by inflating and
    /// discarding, backward by resetting the decompressor and re-inflating
    /// from the payload origin.
    pub fn seek_to(&mut self, new_pos: u64) -> io::Result<()> {
        if new_pos < self.pos {
            let origin = self.origin.ok_or_else(|| {
                io::Error::new(io::ErrorKind::Unsupported, "lower stream origin unknown")
            })?;
            self.inner.seek(SeekFrom::Start(origin))?;
            self.decomp.reset(self.flavor.zlib_header());
            let buffered = self.buf.available_data();
            self.buf.consume(buffered);
            self.pos = 0;
            self.eof = false;
            self.at_end = false;
        }

        let mut scratch = [0u8; 4096];
        while self.pos < new_pos {
            let want = ((new_pos - self.pos) as usize).min(scratch.len());
            let n = self.read(&mut scratch[..want])?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for DeflateReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.poisoned {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "deflate stream is poisoned by an earlier error",
            ));
        }
        if self.at_end || buf.is_empty() {
            return Ok(0);
        }

        loop {
            self.fill()?;

            let before_in = self.decomp.total_in();
            let before_out = self.decomp.total_out();
            let res = self
                .decomp
                .decompress(self.buf.data(), buf, FlushDecompress::None);
            let consumed = (self.decomp.total_in() - before_in) as usize;
            let produced = (self.decomp.total_out() - before_out) as usize;
            self.buf.consume(consumed);
            self.pos += produced as u64;

            let status = match res {
                Ok(status) => status,
                Err(e) => {
                    self.poisoned = true;
                    return Err(decompress_error(e));
                }
            };

            match status {
                Status::StreamEnd => {
                    self.at_end = true;
                    return Ok(produced);
                }
                _ if produced > 0 => return Ok(produced),
                Status::BufError | Status::Ok => {
                    if self.eof && self.buf.available_data() == 0 {
                        self.poisoned = true;
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "deflate stream is truncated",
                        ));
                    }
                    // need more input, loop
                }
            }
        }
    }
}

/// Deflates bytes down into a lower writer.
pub struct DeflateWriter<W: Write> {
    inner: W,
    comp: Compress,
    finished: bool,
}

impl<W: Write> DeflateWriter<W> {
    /// A writer compressing at the given level (`None` for the backend
    /// default).
    pub fn new(inner: W, flavor: Flavor, level: Option<u32>) -> Self {
        let level = level.map_or_else(Compression::default, Compression::new);
        Self {
            inner,
            comp: Compress::new(level, flavor.zlib_header()),
            finished: false,
        }
    }

    /// Total bytes fed in so far.
    pub fn total_in(&self) -> u64 {
        self.comp.total_in()
    }

    /// Total compressed bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.comp.total_out()
    }

    /// Change the compression level mid-stream.
    pub fn set_level(&mut self, level: u32) -> io::Result<()> {
        self.comp
            .set_level(Compression::new(level))
            .map_err(compress_error)
    }

    /// Drain the compressor and hand back the lower writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.do_finish()?;
        Ok(self.inner)
    }

    /// Access the lower writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    fn do_finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        let mut chunk = [0u8; BUFFER_SIZE];
        loop {
            let before_out = self.comp.total_out();
            let status = self
                .comp
                .compress(&[], &mut chunk, FlushCompress::Finish)
                .map_err(compress_error)?;
            let produced = (self.comp.total_out() - before_out) as usize;
            self.inner.write_all(&chunk[..produced])?;
            match status {
                Status::StreamEnd => break,
                // BufError here means "give me another output slot"
                Status::Ok | Status::BufError => continue,
            }
        }
        self.finished = true;
        Ok(())
    }
}

impl<W: Write> Write for DeflateWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut chunk = [0u8; BUFFER_SIZE];
        let mut rest = buf;
        while !rest.is_empty() {
            let before_in = self.comp.total_in();
            let before_out = self.comp.total_out();
            self.comp
                .compress(rest, &mut chunk, FlushCompress::None)
                .map_err(compress_error)?;
            let consumed = (self.comp.total_in() - before_in) as usize;
            let produced = (self.comp.total_out() - before_out) as usize;
            self.inner.write_all(&chunk[..produced])?;
            rest = &rest[consumed..];
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; BUFFER_SIZE];
        loop {
            let before_out = self.comp.total_out();
            self.comp
                .compress(&[], &mut chunk, FlushCompress::Sync)
                .map_err(compress_error)?;
            let produced = (self.comp.total_out() - before_out) as usize;
            self.inner.write_all(&chunk[..produced])?;
            if produced == 0 {
                break;
            }
        }
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn deflate(data: &[u8], flavor: Flavor) -> Vec<u8> {
        let mut w = DeflateWriter::new(Vec::new(), flavor, None);
        w.write_all(data).unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn round_trip_both_flavors() {
        let data: Vec<u8> = (0..100_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();
        for flavor in [Flavor::Deflate, Flavor::Zlib] {
            let compressed = deflate(&data, flavor);
            assert!(compressed.len() < data.len());

            let mut r = DeflateReader::new(Cursor::new(&compressed), flavor);
            let mut out = Vec::new();
            r.read_to_end(&mut out).unwrap();
            assert_eq!(out, data);
            assert_eq!(r.uncompressed_size(), Some(data.len() as u64));
        }
    }

    #[test]
    fn seek_forward_and_backward() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 256) as u8).collect();
        let compressed = deflate(&data, Flavor::Deflate);

        let mut r =
            DeflateReader::new_seekable(Cursor::new(&compressed), Flavor::Deflate).unwrap();
        let mut byte = [0u8; 1];

        r.seek_to(40_000).unwrap();
        r.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], data[40_000]);

        // backward: reset and re-inflate
        r.seek_to(10).unwrap();
        r.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], data[10]);
    }

    #[test]
    fn rewind_trailing_repositions_lower_stream() {
        let data = b"stream one payload".to_vec();
        let mut whole = deflate(&data, Flavor::Deflate);
        let compressed_len = whole.len() as u64;
        whole.extend_from_slice(b"TRAILER");

        let mut r = DeflateReader::new_seekable(Cursor::new(&whole), Flavor::Deflate).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);

        r.rewind_trailing().unwrap();
        let mut cursor = r.into_inner();
        assert_eq!(cursor.stream_position().unwrap(), compressed_len);
        let mut tail = Vec::new();
        cursor.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"TRAILER");
    }

    #[test]
    fn truncated_stream_errors_and_poisons() {
        let compressed = deflate(b"some payload to compress", Flavor::Deflate);
        let truncated = &compressed[..compressed.len() / 2];

        let mut r = DeflateReader::new(Cursor::new(truncated), Flavor::Deflate);
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        // poisoned: further reads keep failing
        let mut buf = [0u8; 8];
        assert!(r.read(&mut buf).is_err());
    }

    #[test]
    fn garbage_input_errors() {
        let garbage = vec![0xaa_u8; 64];
        let mut r = DeflateReader::new(Cursor::new(&garbage), Flavor::Zlib);
        let mut out = Vec::new();
        assert!(r.read_to_end(&mut out).is_err());
    }

    #[test]
    fn incompressible_input_grows() {
        // small inputs aren't guaranteed to shrink
        let data = b"Wikipedia";
        let compressed = deflate(data, Flavor::Deflate);
        let mut r = DeflateReader::new(Cursor::new(&compressed), Flavor::Deflate);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(&out, data);
    }
}
