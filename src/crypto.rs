//! Traditional PKWARE encryption (appnote 6.1): a stream cipher keyed by
//! three 32-bit words, updated per byte through a CRC-32 schedule.
//!
//! It is weak by modern standards and only suitable for keeping honest
//! people honest; it is implemented here because the wild is full of
//! archives that use it.

use std::io::{self, Read, Write};

use zeroize::Zeroize;

use crate::error::Error;

/// Length of the encryption header prepended to each encrypted payload.
pub const HEADER_LEN: usize = 12;

/// The APPNOTE key schedule constants.
const KEY0: u32 = 0x12345678;
const KEY1: u32 = 0x23456789;
const KEY2: u32 = 0x34567890;

const CRC_POLYNOMIAL: u32 = 0xedb88320;

/// The key schedule feeds single bytes through the raw (uncomplemented)
/// CRC-32 register, so crc32fast's whole-buffer interface doesn't apply.
const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut rem = i as u32;
        let mut bit = 0;
        while bit < 8 {
            rem = if rem & 1 != 0 {
                (rem >> 1) ^ CRC_POLYNOMIAL
            } else {
                rem >> 1
            };
            bit += 1;
        }
        table[i] = rem;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

#[inline]
fn crc32_byte(crc: u32, b: u8) -> u32 {
    CRC_TABLE[((crc ^ b as u32) & 0xff) as usize] ^ (crc >> 8)
}

/// The three-word cipher state, advanced once per plaintext byte.
#[derive(Clone, PartialEq, Eq)]
pub struct Cipher {
    keys: [u32; 3],
}

impl Default for Cipher {
    fn default() -> Self {
        Self {
            keys: [KEY0, KEY1, KEY2],
        }
    }
}

impl Cipher {
    /// A cipher keyed from a password.
    pub fn from_password(password: &[u8]) -> Self {
        let mut cipher = Self::default();
        for &b in password {
            cipher.update(b);
        }
        cipher
    }

    /// A cipher resuming from previously derived keys.
    pub fn from_keys(keys: [u32; 3]) -> Self {
        Self { keys }
    }

    /// The current key words.
    pub fn keys(&self) -> [u32; 3] {
        self.keys
    }

    /// Mix a plaintext byte into the key state.
    #[inline]
    fn update(&mut self, plain: u8) {
        self.keys[0] = crc32_byte(self.keys[0], plain);
        self.keys[1] = self.keys[1].wrapping_add(self.keys[0] & 0xff);
        self.keys[1] = self.keys[1].wrapping_mul(134775813).wrapping_add(1);
        self.keys[2] = crc32_byte(self.keys[2], (self.keys[1] >> 24) as u8);
    }

    /// The next keystream byte; does not advance the state.
    #[inline]
    fn stream_byte(&self) -> u8 {
        let t = (self.keys[2] | 2) & 0xffff;
        ((t.wrapping_mul(t ^ 1)) >> 8) as u8
    }

    #[inline]
    fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let c = plain ^ self.stream_byte();
        self.update(plain);
        c
    }

    #[inline]
    fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let p = cipher ^ self.stream_byte();
        self.update(p);
        p
    }

    fn decrypt_in_place(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.decrypt_byte(*b);
        }
    }
}

impl Drop for Cipher {
    fn drop(&mut self) {
        self.keys.zeroize();
    }
}

/// An incrementally seeded key state with rollback.
///
/// Every password byte pushes a snapshot of the key words, so diagnostic
/// and brute-force callers can test password extensions and [roll them
/// back][KeyState::rollback] byte by byte without re-deriving from
/// scratch. The whole stack is zeroized on drop.
pub struct KeyState {
    stack: Vec<[u32; 3]>,
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            stack: vec![[KEY0, KEY1, KEY2]],
        }
    }
}

impl KeyState {
    /// A key state resuming from previously derived keys.
    pub fn from_keys(keys: [u32; 3]) -> Self {
        Self { stack: vec![keys] }
    }

    /// The current key words.
    pub fn keys(&self) -> [u32; 3] {
        *self.stack.last().expect("stack is never empty")
    }

    /// Reset to the APPNOTE initial state, dropping all snapshots.
    pub fn reset(&mut self) {
        self.stack.zeroize();
        self.stack.clear();
        self.stack.push([KEY0, KEY1, KEY2]);
    }

    /// Feed one password byte, pushing a snapshot.
    pub fn update(&mut self, b: u8) {
        let mut cipher = Cipher::from_keys(self.keys());
        cipher.update(b);
        self.stack.push(cipher.keys());
    }

    /// Feed a whole password.
    pub fn feed_password(&mut self, password: &[u8]) {
        for &b in password {
            self.update(b);
        }
    }

    /// Forget the last `n` fed bytes; at most down to the initial state.
    pub fn rollback(&mut self, n: usize) {
        for _ in 0..n {
            if self.stack.len() <= 1 {
                break;
            }
            let mut popped = self.stack.pop().expect("checked non-empty");
            popped.zeroize();
        }
    }

    /// A cipher picking up from the current keys.
    pub fn cipher(&self) -> Cipher {
        Cipher::from_keys(self.keys())
    }
}

impl Drop for KeyState {
    fn drop(&mut self) {
        self.stack.zeroize();
    }
}

/// Build the 12-byte encryption header for a payload with the given
/// plaintext CRC-32: 10 random bytes, then the high 16 bits of the CRC,
/// all encrypted under the freshly seeded cipher.
pub(crate) fn make_header(cipher: &mut Cipher, crc32: u32) -> io::Result<[u8; HEADER_LEN]> {
    let mut header = [0u8; HEADER_LEN];
    getrandom::getrandom(&mut header[..10])
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    header[10] = (crc32 >> 16) as u8;
    header[11] = (crc32 >> 24) as u8;
    for b in header.iter_mut() {
        *b = cipher.encrypt_byte(*b);
    }
    Ok(header)
}

/// Decrypt and validate an encryption header against the declared CRC-32.
/// The final byte must equal the CRC's top byte; anything else means the
/// password is wrong (with probability 255/256).
pub(crate) fn check_header(
    cipher: &mut Cipher,
    header: &[u8; HEADER_LEN],
    crc32: u32,
) -> Result<(), Error> {
    let mut decrypted = *header;
    cipher.decrypt_in_place(&mut decrypted);
    if decrypted[11] != (crc32 >> 24) as u8 {
        return Err(Error::BadPassword);
    }
    Ok(())
}

/// Decrypts everything read from the underlying reader. The 12-byte header
/// must have been consumed and validated at construction.
pub(crate) struct CryptoReader<R: Read> {
    inner: R,
    cipher: Cipher,
}

impl<R: Read> CryptoReader<R> {
    /// Read and validate the encryption header, then wrap `inner`.
    pub(crate) fn new(mut inner: R, mut cipher: Cipher, declared_crc32: u32) -> Result<Self, Error> {
        let mut header = [0u8; HEADER_LEN];
        inner.read_exact(&mut header)?;
        check_header(&mut cipher, &header, declared_crc32)?;
        Ok(Self { inner, cipher })
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }

    pub(crate) fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for CryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.decrypt_in_place(&mut buf[..n]);
        Ok(n)
    }
}

/// Encrypts everything written to the underlying writer; the header is
/// emitted at construction.
pub(crate) struct CryptoWriter<W: Write> {
    inner: W,
    cipher: Cipher,
}

impl<W: Write> CryptoWriter<W> {
    /// Emit the encryption header and wrap `inner`.
    pub(crate) fn new(mut inner: W, mut cipher: Cipher, crc32: u32) -> io::Result<Self> {
        let header = make_header(&mut cipher, crc32)?;
        inner.write_all(&header)?;
        Ok(Self { inner, cipher })
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }

    pub(crate) fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for CryptoWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut block = [0u8; 4096];
        let n = buf.len().min(block.len());
        for (dst, &src) in block[..n].iter_mut().zip(buf[..n].iter()) {
            *dst = self.cipher.encrypt_byte(src);
        }
        self.inner.write_all(&block[..n])?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_schedule_appnote_constants() {
        let cipher = Cipher::default();
        assert_eq!(cipher.keys(), [0x12345678, 0x23456789, 0x34567890]);
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let plain = b"the quick brown fox jumps over the lazy dog";
        let mut enc = Cipher::from_password(b"hunter2");
        let ciphertext: Vec<u8> = plain.iter().map(|&b| enc.encrypt_byte(b)).collect();
        assert_ne!(&ciphertext[..], &plain[..]);

        let mut dec = Cipher::from_password(b"hunter2");
        let decrypted: Vec<u8> = ciphertext.iter().map(|&b| dec.decrypt_byte(b)).collect();
        assert_eq!(&decrypted[..], &plain[..]);
    }

    #[test]
    fn header_validates_with_right_password() {
        let crc = 0xdeadbeef_u32;
        let mut enc = Cipher::from_password(b"s3cret");
        let header = make_header(&mut enc, crc).unwrap();

        let mut dec = Cipher::from_password(b"s3cret");
        assert!(check_header(&mut dec, &header, crc).is_ok());

        let mut wrong = Cipher::from_password(b"s3cret!");
        assert!(matches!(
            check_header(&mut wrong, &header, crc),
            Err(Error::BadPassword)
        ));
    }

    #[test]
    fn key_state_rollback() {
        let mut state = KeyState::default();
        state.feed_password(b"pass");
        let keys_pass = state.keys();

        state.feed_password(b"word");
        assert_ne!(state.keys(), keys_pass);

        state.rollback(4);
        assert_eq!(state.keys(), keys_pass);

        // rolling back past the start stops at the initial state
        state.rollback(100);
        assert_eq!(state.keys(), [KEY0, KEY1, KEY2]);
    }

    #[test]
    fn key_state_matches_direct_derivation() {
        let mut state = KeyState::default();
        state.feed_password(b"hunter2");
        assert_eq!(state.keys(), Cipher::from_password(b"hunter2").keys());
    }

    #[test]
    fn stream_round_trip_through_io() {
        let plain = b"attack at dawn".to_vec();
        let crc = crate::checksum::checksum_of::<crate::checksum::Crc32>(&plain);

        let mut out = Vec::new();
        let mut w = CryptoWriter::new(&mut out, Cipher::from_password(b"pw"), crc).unwrap();
        w.write_all(&plain).unwrap();
        drop(w);
        assert_eq!(out.len(), HEADER_LEN + plain.len());

        let mut r =
            CryptoReader::new(io::Cursor::new(out), Cipher::from_password(b"pw"), crc).unwrap();
        let mut read_back = Vec::new();
        r.read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, plain);
    }
}
