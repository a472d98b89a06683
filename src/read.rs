//! Reading a single entry's payload: a bounded view of the archive
//! stream, optionally decrypted, optionally inflated, with CRC-32 and
//! size verification at the end.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::trace;
use winnow::{Parser, Partial};

use crate::checksum::{Checksum, Crc32};
use crate::crypto::{Cipher, CryptoReader};
use crate::entry::{EntryInfo, Method, ZipOptions};
use crate::error::{Error, FormatError, UnsupportedError};
use crate::format::{DataDescriptorRecord, TAG_ZIP64};
use crate::zstream::{DeflateReader, Flavor};

/// A bounded window over the archive stream: reads are clamped to
/// `[start, start + len)`.
pub(crate) struct SectionReader<'a, R> {
    inner: &'a mut R,
    start: u64,
    len: u64,
    pos: u64,
}

impl<'a, R: Read + Seek> SectionReader<'a, R> {
    pub(crate) fn new(inner: &'a mut R, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            len,
            pos: 0,
        })
    }

    fn restart(&mut self) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(self.start))?;
        self.pos = 0;
        Ok(())
    }

    fn stream_mut(&mut self) -> &mut R {
        self.inner
    }
}

impl<R: Read + Seek> Read for SectionReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.len - self.pos;
        if left == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (left as usize).min(buf.len());
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

enum Pipe<'a, R: Read + Seek> {
    Store(SectionReader<'a, R>),
    StoreCrypto(CryptoReader<SectionReader<'a, R>>),
    Deflate(Box<DeflateReader<SectionReader<'a, R>>>),
    DeflateCrypto(Box<DeflateReader<CryptoReader<SectionReader<'a, R>>>>),
}

impl<'a, R: Read + Seek> Pipe<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Pipe::Store(r) => r.read(buf),
            Pipe::StoreCrypto(r) => r.read(buf),
            Pipe::Deflate(r) => r.read(buf),
            Pipe::DeflateCrypto(r) => r.read(buf),
        }
    }

    fn into_section(self) -> SectionReader<'a, R> {
        match self {
            Pipe::Store(r) => r,
            Pipe::StoreCrypto(r) => r.into_inner(),
            Pipe::Deflate(r) => r.into_inner(),
            Pipe::DeflateCrypto(r) => r.into_inner().into_inner(),
        }
    }

    fn section_mut(&mut self) -> &mut SectionReader<'a, R> {
        match self {
            Pipe::Store(r) => r,
            Pipe::StoreCrypto(r) => r.get_mut(),
            Pipe::Deflate(r) => r.get_mut(),
            Pipe::DeflateCrypto(r) => r.get_mut().get_mut(),
        }
    }
}

/// A byte-stream view over one entry's payload.
///
/// Implements [Read]; decompression, decryption and checksum verification
/// happen transparently. The stored CRC-32 and uncompressed size are
/// verified when the end of the payload is reached; a mismatch surfaces as
/// an error from the final `read`.
///
/// Implements [Seek] over the uncompressed byte stream: seeking forward
/// inflates and discards, seeking backward rewinds to the payload start
/// and re-inflates.
pub struct EntryReader<'a, R: Read + Seek> {
    pipe: Option<Pipe<'a, R>>,
    keys: Option<[u32; 3]>,
    raw: bool,
    expected_crc32: u32,
    expected_size: u64,
    /// stored size of the payload, for cross-checking the descriptor
    compressed_size: u64,
    /// where the payload's stored bytes end (and the descriptor starts)
    data_end: u64,
    has_descriptor: bool,
    descriptor_zip64: bool,
    hasher: Crc32,
    pos: u64,
    validated: bool,
    poisoned: bool,
}

impl<R: Read + Seek> std::fmt::Debug for EntryReader<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader").finish_non_exhaustive()
    }
}

impl<'a, R: Read + Seek> EntryReader<'a, R> {
    /// Open an entry's payload. `data_start` points at the first stored
    /// payload byte (the encryption header, for encrypted entries).
    pub(crate) fn new(
        stream: &'a mut R,
        entry: &EntryInfo,
        data_start: u64,
        keys: Option<[u32; 3]>,
    ) -> Result<Self, Error> {
        if entry.options.has(ZipOptions::STRONG_ENCRYPTION) {
            return Err(UnsupportedError::StrongEncryption.into());
        }

        let raw = entry.raw;
        let data_len = entry.compressed_size as u64;
        let encrypted = entry.is_encrypted() && !raw;

        if !raw && !matches!(entry.method, Method::Store | Method::Deflate) {
            return Err(Error::method_not_supported(entry.method));
        }

        let section = SectionReader::new(stream, data_start, data_len)?;
        let pipe = Self::build_pipe(
            section,
            entry.method,
            encrypted,
            raw,
            keys,
            entry.crc32,
        )?;

        Ok(Self {
            pipe: Some(pipe),
            keys,
            raw,
            expected_crc32: entry.crc32,
            expected_size: if raw {
                data_len
            } else {
                entry.uncompressed_size as u64
            },
            compressed_size: data_len,
            data_end: data_start + data_len,
            has_descriptor: entry.options.has(ZipOptions::DATA_DESCRIPTOR),
            // the descriptor carries 64-bit sizes exactly when the entry
            // went zip64
            descriptor_zip64: entry.local_extra.contains(TAG_ZIP64)
                || entry.central_extra.contains(TAG_ZIP64),
            hasher: Crc32::default(),
            pos: 0,
            validated: false,
            poisoned: false,
        })
    }

    fn build_pipe(
        section: SectionReader<'a, R>,
        method: Method,
        encrypted: bool,
        raw: bool,
        keys: Option<[u32; 3]>,
        declared_crc32: u32,
    ) -> Result<Pipe<'a, R>, Error> {
        if raw {
            return Ok(Pipe::Store(section));
        }

        let pipe = match (method, encrypted) {
            (Method::Store, false) => Pipe::Store(section),
            (Method::Store, true) => {
                let cipher = Cipher::from_keys(keys.ok_or(Error::BadPassword)?);
                Pipe::StoreCrypto(CryptoReader::new(section, cipher, declared_crc32)?)
            }
            (Method::Deflate, false) => {
                Pipe::Deflate(Box::new(DeflateReader::new(section, Flavor::Deflate)))
            }
            (Method::Deflate, true) => {
                let cipher = Cipher::from_keys(keys.ok_or(Error::BadPassword)?);
                let crypto = CryptoReader::new(section, cipher, declared_crc32)?;
                Pipe::DeflateCrypto(Box::new(DeflateReader::new(crypto, Flavor::Deflate)))
            }
            (method, _) => return Err(Error::method_not_supported(method)),
        };
        Ok(pipe)
    }

    /// Size of the byte stream this reader yields: the uncompressed size,
    /// or the stored size when reading raw.
    pub fn size(&self) -> u64 {
        self.expected_size
    }

    /// Logical position in the (uncompressed) payload.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Verify the accumulated CRC-32 and byte count against the stored
    /// values, and the trailing data descriptor when the entry carries
    /// one. Called automatically when the payload is exhausted.
    fn validate(&mut self) -> io::Result<()> {
        if self.validated {
            return Ok(());
        }
        self.validated = true;

        if self.raw {
            return Ok(());
        }

        if self.pos != self.expected_size {
            self.poisoned = true;
            return Err(Error::from(FormatError::WrongSize {
                expected: self.expected_size,
                actual: self.pos,
            })
            .into());
        }

        let actual = self.hasher.value();
        if actual != self.expected_crc32 {
            self.poisoned = true;
            return Err(Error::from(FormatError::WrongChecksum {
                expected: self.expected_crc32,
                actual,
            })
            .into());
        }

        if self.has_descriptor {
            self.check_descriptor(actual)?;
        }

        trace!(crc32 = actual, size = self.pos, "entry payload verified");
        Ok(())
    }

    /// Parse the data descriptor following the payload and make sure it
    /// agrees with what was just verified.
    fn check_descriptor(&mut self, actual_crc32: u32) -> io::Result<()> {
        let stream = self
            .pipe
            .as_mut()
            .expect("pipe is present")
            .section_mut()
            .stream_mut();
        stream.seek(SeekFrom::Start(self.data_end))?;

        // at most: signature + crc + two 64-bit sizes; a short read just
        // means the descriptor (if any) is truncated
        let mut block = [0u8; 28];
        let mut filled = 0;
        while filled < block.len() {
            match stream.read(&mut block[filled..])? {
                0 => break,
                n => filled += n,
            }
        }

        let descriptor = DataDescriptorRecord::mk_parser(self.descriptor_zip64)
            .parse_peek(Partial::new(&block[..filled]))
            .map(|(_, descriptor)| descriptor)
            .map_err(|_| {
                self.poisoned = true;
                io::Error::from(Error::from(FormatError::InvalidDataDescriptor))
            })?;

        if descriptor.crc32 != actual_crc32
            || descriptor.uncompressed_size != self.pos
            || descriptor.compressed_size != self.compressed_size
        {
            self.poisoned = true;
            return Err(Error::from(FormatError::InvalidDataDescriptor).into());
        }

        trace!(?descriptor, "data descriptor verified");
        Ok(())
    }
}

impl<R: Read + Seek> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.poisoned {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "entry stream is poisoned by an earlier error",
            ));
        }
        if self.validated {
            return Ok(0);
        }

        let pipe = self.pipe.as_mut().expect("pipe is present");
        let n = match pipe.read(buf) {
            Ok(n) => n,
            Err(e) => {
                self.poisoned = true;
                return Err(e);
            }
        };

        if n == 0 {
            self.validate()?;
            return Ok(0);
        }

        if !self.raw {
            self.hasher.update(&buf[..n]);
        }
        self.pos += n as u64;

        // catch payloads that inflate past the declared size early
        if !self.raw && self.pos > self.expected_size {
            self.poisoned = true;
            return Err(Error::from(FormatError::WrongSize {
                expected: self.expected_size,
                actual: self.pos,
            })
            .into());
        }

        Ok(n)
    }
}

impl<R: Read + Seek> Seek for EntryReader<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => self.expected_size as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of entry",
            ));
        }
        let target = target as u64;

        if target < self.pos {
            self.rewind_to_start()?;
        }

        let mut scratch = [0u8; 4096];
        while self.pos < target {
            let want = ((target - self.pos) as usize).min(scratch.len());
            if self.read(&mut scratch[..want])? == 0 {
                // seeking past the end parks at the end
                break;
            }
        }
        Ok(self.pos)
    }
}

impl<R: Read + Seek> EntryReader<'_, R> {
    fn rewind_to_start(&mut self) -> io::Result<()> {
        let pipe = self.pipe.take().expect("pipe is present");

        // figure out which shape to rebuild before consuming the pipe
        let shape = match &pipe {
            Pipe::Store(_) => (Method::Store, false),
            Pipe::StoreCrypto(_) => (Method::Store, true),
            Pipe::Deflate(_) => (Method::Deflate, false),
            Pipe::DeflateCrypto(_) => (Method::Deflate, true),
        };

        let mut section = pipe.into_section();
        section.restart()?;

        let rebuilt = Self::build_pipe(
            section,
            shape.0,
            shape.1,
            self.raw,
            self.keys,
            self.expected_crc32,
        )
        .map_err(io::Error::from)?;

        self.pipe = Some(rebuilt);
        self.hasher.reset();
        self.pos = 0;
        self.validated = false;
        self.poisoned = false;
        Ok(())
    }
}
