//! Winnow parsers and serializers for the wire-level records that make up a
//! zip file: local file headers, central directory headers, the
//! end-of-central-directory family, extra fields and timestamps.
//!
//! All layouts are from the PKWARE appnote.txt. Every record has a `parser`
//! (over [winnow::Partial], so callers can refill buffers on Incomplete) and
//! a `write_to` mirror.

mod raw;
pub use raw::*;

mod version;
pub use version::*;

mod mode;
pub use mode::*;

mod date_time;
pub use date_time::*;

mod extra_field;
pub use extra_field::*;

mod local;
pub use local::*;

mod directory_header;
pub use directory_header::*;

mod eocd;
pub use eocd::*;
