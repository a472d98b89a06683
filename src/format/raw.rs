use std::fmt;
use winnow::{stream::ToUsize, token::take, PResult, Parser, Partial};

/// A raw zip string, with no specific encoding.
///
/// This is used while parsing a zip archive's central directory,
/// before we know what encoding is used.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ZipString(pub Vec<u8>);

impl<'a> From<&'a [u8]> for ZipString {
    fn from(slice: &'a [u8]) -> Self {
        Self(slice.into())
    }
}

impl fmt::Debug for ZipString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "[non-utf8 string: {} bytes]", self.0.len()),
        }
    }
}

impl ZipString {
    pub(crate) fn parser<C>(count: C) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self>
    where
        C: ToUsize,
    {
        let count = count.to_usize();
        move |i| (take(count).map(|slice: &[u8]| Self(slice.into()))).parse_next(i)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

/// A raw u8 slice, with no specific structure.
///
/// This is used while parsing a zip archive, when we want
/// to retain an owned slice to be parsed later.
#[derive(Clone, Default)]
pub struct ZipBytes(pub Vec<u8>);

impl fmt::Debug for ZipBytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl ZipBytes {
    pub(crate) fn parser<C>(count: C) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self>
    where
        C: ToUsize,
    {
        let count = count.to_usize();
        move |i| (take(count).map(|slice: &[u8]| Self(slice.into()))).parse_next(i)
    }
}
