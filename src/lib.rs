#![warn(missing_docs)]

//! ruzip reads and writes zip archives: zip64 extensions, traditional
//! PKWARE encryption, deflate compression, and the metadata real-world
//! archives carry across Windows, UNIX and DOS toolchains (timestamps,
//! permissions, symlinks, legacy code pages, Unicode extras).
//!
//! Reading starts with [ZipArchive] over anything `Read + Seek`; writing
//! with [ZipWriter] over anything `Write + Seek` (or plain `Write`, with
//! data descriptors). [ZipDirectory] layers directory-style navigation
//! over an open archive.
//!
//! ```no_run
//! use std::io::{Read, Write};
//!
//! # fn main() -> Result<(), ruzip::Error> {
//! let file = std::fs::OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .create(true)
//!     .open("hello.zip")?;
//! let mut writer = ruzip::ZipWriter::create(file)?;
//! let mut entry = writer.open_entry(ruzip::EntryInfo::file("hello.txt"))?;
//! entry.write_all(b"hello from ruzip")?;
//! entry.finish()?;
//! let sink = writer.finish()?;
//!
//! let mut archive = ruzip::ZipArchive::new(sink.into_inner())?;
//! let mut entry = archive.open_entry("hello.txt", Default::default())?;
//! let mut contents = String::new();
//! entry.read_to_string(&mut contents)?;
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod crypto;
pub mod encoding;
mod error;
pub mod format;
pub mod gzip;
pub mod zstream;

mod archive;
mod dir;
mod entry;
mod index;
mod path;
mod read;
mod write;

pub use archive::{ArchiveOptions, Entries, ZipArchive};
pub use dir::{EntryFilters, SortKey, SortSpec, ZipDirectory};
pub use entry::{Compatibility, CompressionQuality, EntryInfo, EntryKind, Method, ZipOptions};
pub use error::{Error, ExtraFieldError, FormatError, UnsupportedError};
pub use index::{CaseSensitivity, Lowercaser};
pub use path::{clean_path, TextCodecs};
pub use read::EntryReader;
pub use write::{EntryWriter, SeekSink, Sink, StreamSink, WriterOptions, ZipWriter};
