//! Streaming CRC-32 and Adler-32 checksums.
//!
//! Zip archives checksum entry payloads with CRC-32 (ISO-HDLC polynomial);
//! zlib streams carry Adler-32. Both are exposed behind the same trait so
//! callers can checksum byte slices and readers uniformly.

use std::io::Read;

use crate::error::Error;

/// Block size for checksumming data pulled out of a reader.
const READ_BLOCK: usize = 4096;

/// A streaming 32-bit checksum.
pub trait Checksum {
    /// Reset to the initial state.
    fn reset(&mut self);

    /// Feed a slice of bytes.
    fn update(&mut self, data: &[u8]);

    /// The checksum of everything fed so far.
    fn value(&self) -> u32;

    /// Replace the running state with a previously obtained value.
    fn set_value(&mut self, value: u32);

    /// Feed bytes pulled from `r`.
    ///
    /// With `n = Some(count)`, exactly `count` bytes must be available;
    /// a short read is an error. With `n = None`, reads to end of stream.
    /// Returns the number of bytes consumed.
    fn update_from_reader(&mut self, r: &mut dyn Read, n: Option<u64>) -> Result<u64, Error> {
        let mut block = [0u8; READ_BLOCK];
        let mut fed: u64 = 0;
        loop {
            let want = match n {
                Some(n) => {
                    let left = n - fed;
                    if left == 0 {
                        return Ok(fed);
                    }
                    left.min(READ_BLOCK as u64) as usize
                }
                None => READ_BLOCK,
            };
            let got = r.read(&mut block[..want])?;
            if got == 0 {
                return match n {
                    Some(_) => Err(Error::IO(std::io::ErrorKind::UnexpectedEof.into())),
                    None => Ok(fed),
                };
            }
            self.update(&block[..got]);
            fed += got as u64;
        }
    }
}

/// One-shot checksum of a byte slice.
pub fn checksum_of<C: Checksum + Default>(data: &[u8]) -> u32 {
    let mut c = C::default();
    c.update(data);
    c.value()
}

/// CRC-32, ISO-HDLC polynomial, initial state 0.
#[derive(Default, Clone)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Checksum for Crc32 {
    fn reset(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn set_value(&mut self, value: u32) {
        self.hasher = crc32fast::Hasher::new_with_initial(value);
    }
}

/// Adler-32: Fletcher sums modulo 65521, initial state 1.
#[derive(Clone)]
pub struct Adler32 {
    state: adler2::Adler32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self {
            state: adler2::Adler32::new(),
        }
    }
}

impl Checksum for Adler32 {
    fn reset(&mut self) {
        self.state = adler2::Adler32::new();
    }

    fn update(&mut self, data: &[u8]) {
        self.state.write_slice(data);
    }

    fn value(&self) -> u32 {
        self.state.checksum()
    }

    fn set_value(&mut self, value: u32) {
        self.state = adler2::Adler32::from_checksum(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        assert_eq!(checksum_of::<Crc32>(b"Wikipedia"), 0xADAA_C02E);
    }

    #[test]
    fn adler32_known_value() {
        assert_eq!(checksum_of::<Adler32>(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn split_updates_match_one_shot() {
        let mut c = Crc32::default();
        c.update(b"Wiki");
        c.update(b"pedia");
        assert_eq!(c.value(), 0xADAA_C02E);

        c.reset();
        c.update(b"Wikipedia");
        assert_eq!(c.value(), 0xADAA_C02E);
    }

    #[test]
    fn reader_update_counts_bytes() {
        let mut c = Crc32::default();
        let mut r = std::io::Cursor::new(b"Wikipedia".to_vec());
        let n = c.update_from_reader(&mut r, None).unwrap();
        assert_eq!(n, 9);
        assert_eq!(c.value(), 0xADAA_C02E);
    }

    #[test]
    fn reader_update_short_read_fails() {
        let mut c = Crc32::default();
        let mut r = std::io::Cursor::new(b"abc".to_vec());
        assert!(c.update_from_reader(&mut r, Some(9)).is_err());
    }

    #[test]
    fn set_value_resumes() {
        let mut a = Crc32::default();
        a.update(b"Wiki");
        let mid = a.value();

        let mut b = Crc32::default();
        b.set_value(mid);
        b.update(b"pedia");
        assert_eq!(b.value(), 0xADAA_C02E);
    }
}
