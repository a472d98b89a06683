//! Character encodings used in ZIP files.
//!
//! ZIP entry paths may be encoded in a variety of character encodings:
//! historically, CP-437 was used, but many modern zip files use UTF-8 with an
//! optional UTF-8 flag.
//!
//! Others use the system's local character encoding, and we have no choice but
//! to make an educated guess thanks to the chardet-ng crate.

use std::fmt;

/// Encodings supported by this crate.
///
/// OEM (DOS) code pages go through `oem_cp`'s tables, everything else
/// through `encoding_rs`. UTF-16 is handled by hand because `encoding_rs`
/// is decode-only for it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Encoding {
    /// [UTF-8](https://en.wikipedia.org/wiki/UTF-8), opt-in for ZIP files.
    Utf8,

    /// UTF-16, little-endian (Windows code page 1200).
    Utf16Le,

    /// UTF-16, big-endian (Windows code page 1201).
    Utf16Be,

    /// A DOS OEM code page, like 437 (the original encoding of the zip
    /// format, also known as OEM-US or PC-8), 850 or 866.
    Oem(u16),

    /// Any encoding `encoding_rs` speaks: the windows-125x family,
    /// ISO-8859-*, Shift-JIS, and friends.
    Rs(&'static encoding_rs::Encoding),
}

/// Code page 437, the fallback when nothing better is known.
pub const CP437: Encoding = Encoding::Oem(437);

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf-8"),
            Encoding::Utf16Le => write!(f, "utf-16le"),
            Encoding::Utf16Be => write!(f, "utf-16be"),
            Encoding::Oem(cp) => write!(f, "cp-{}", cp),
            Encoding::Rs(e) => write!(f, "{}", e.name().to_ascii_lowercase()),
        }
    }
}

/// Errors encountered while converting text to UTF-8.
#[derive(Debug)]
pub enum DecodingError {
    /// Text claimed to be UTF-8, but wasn't (as far as we can tell).
    Utf8Error(std::str::Utf8Error),

    /// Text is too large to be converted.
    ///
    /// In practice, this happens if the text's length is larger than
    /// [usize::MAX], which seems unlikely.
    StringTooLarge,

    /// Text is not valid in the given encoding.
    EncodingError(&'static str),

    /// The code page is not one this crate has tables for.
    UnknownCodePage(u16),
}

impl From<std::str::Utf8Error> for DecodingError {
    fn from(e: std::str::Utf8Error) -> Self {
        DecodingError::Utf8Error(e)
    }
}

impl fmt::Display for DecodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8Error(utf8) => write!(f, "invalid utf-8: {utf8}"),
            Self::StringTooLarge => f.write_str("text too large to be converted"),
            Self::EncodingError(enc) => write!(f, "encoding error: {enc}"),
            Self::UnknownCodePage(cp) => write!(f, "unknown code page: {cp}"),
        }
    }
}

impl std::error::Error for DecodingError {}

impl Encoding {
    /// Decode bytes to a string.
    pub fn decode(&self, i: &[u8]) -> Result<String, DecodingError> {
        match self {
            Encoding::Utf8 => {
                let s = std::str::from_utf8(i)?;
                Ok(s.to_string())
            }
            Encoding::Utf16Le => self.decode_as(i, encoding_rs::UTF_16LE),
            Encoding::Utf16Be => self.decode_as(i, encoding_rs::UTF_16BE),
            Encoding::Oem(cp) => {
                let table = oem_cp::code_table::DECODING_TABLE_CP_MAP
                    .get(cp)
                    .ok_or(DecodingError::UnknownCodePage(*cp))?;
                table
                    .decode_string_checked(i)
                    .ok_or(DecodingError::EncodingError("oem code page"))
            }
            Encoding::Rs(e) => self.decode_as(i, e),
        }
    }

    fn decode_as(
        &self,
        i: &[u8],
        encoding: &'static encoding_rs::Encoding,
    ) -> Result<String, DecodingError> {
        let mut decoder = encoding.new_decoder();
        let len = decoder
            .max_utf8_buffer_length(i.len())
            .ok_or(DecodingError::StringTooLarge)?;
        let mut v = vec![0u8; len];
        let last = true;
        let (_decoder_result, _decoder_read, decoder_written, had_errors) =
            decoder.decode_to_utf8(i, &mut v, last);
        if had_errors {
            return Err(DecodingError::EncodingError(encoding.name()));
        }
        v.resize(decoder_written, 0u8);
        Ok(unsafe { String::from_utf8_unchecked(v) })
    }

    /// Encode a string, returning None if some character has no
    /// representation in this encoding.
    pub fn encode(&self, s: &str) -> Option<Vec<u8>> {
        match self {
            Encoding::Utf8 => Some(s.as_bytes().to_vec()),
            Encoding::Utf16Le => Some(s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()),
            Encoding::Utf16Be => Some(s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()),
            Encoding::Oem(cp) => {
                let table = oem_cp::code_table::ENCODING_TABLE_CP_MAP.get(cp)?;
                oem_cp::encode_string_checked(s, table)
            }
            Encoding::Rs(e) => {
                let (bytes, _, had_errors) = e.encode(s);
                if had_errors {
                    None
                } else {
                    Some(bytes.into_owned())
                }
            }
        }
    }

    /// Whether every character of `s` is representable in this encoding.
    pub fn can_encode(&self, s: &str) -> bool {
        self.encode(s).is_some()
    }

    /// Resolve a Windows code page number, as found in the ZipArchive
    /// 0x5A4C extra field, to an encoding.
    pub fn from_codepage(cp: u32) -> Option<Self> {
        use encoding_rs as rs;
        let cp16 = u16::try_from(cp).ok();
        Some(match cp {
            65001 => Encoding::Utf8,
            1200 => Encoding::Utf16Le,
            1201 => Encoding::Utf16Be,
            // UTF-32 has no sensible mapping here
            12000 | 12001 => return None,
            874 => Encoding::Rs(rs::WINDOWS_874),
            932 => Encoding::Rs(rs::SHIFT_JIS),
            949 | 51949 => Encoding::Rs(rs::EUC_KR),
            950 => Encoding::Rs(rs::BIG5),
            51932 => Encoding::Rs(rs::EUC_JP),
            54936 => Encoding::Rs(rs::GB18030),
            50220 | 50221 | 50222 => Encoding::Rs(rs::ISO_2022_JP),
            10000 => Encoding::Rs(rs::MACINTOSH),
            20866 => Encoding::Rs(rs::KOI8_R),
            21866 => Encoding::Rs(rs::KOI8_U),
            // the WHATWG set folds latin1 and latin5 into their windows
            // supersets
            28591 => Encoding::Rs(rs::WINDOWS_1252),
            28592 => Encoding::Rs(rs::ISO_8859_2),
            28593 => Encoding::Rs(rs::ISO_8859_3),
            28594 => Encoding::Rs(rs::ISO_8859_4),
            28595 => Encoding::Rs(rs::ISO_8859_5),
            28596 => Encoding::Rs(rs::ISO_8859_6),
            28597 => Encoding::Rs(rs::ISO_8859_7),
            28598 => Encoding::Rs(rs::ISO_8859_8),
            28599 => Encoding::Rs(rs::WINDOWS_1254),
            28603 => Encoding::Rs(rs::ISO_8859_13),
            28606 => Encoding::Rs(rs::ISO_8859_16),
            1250 => Encoding::Rs(rs::WINDOWS_1250),
            1251 => Encoding::Rs(rs::WINDOWS_1251),
            1252 => Encoding::Rs(rs::WINDOWS_1252),
            1253 => Encoding::Rs(rs::WINDOWS_1253),
            1254 => Encoding::Rs(rs::WINDOWS_1254),
            1255 => Encoding::Rs(rs::WINDOWS_1255),
            1256 => Encoding::Rs(rs::WINDOWS_1256),
            1257 => Encoding::Rs(rs::WINDOWS_1257),
            1258 => Encoding::Rs(rs::WINDOWS_1258),
            _ => {
                // the remaining OEM pages (437, 850, 866, ...) live in
                // oem_cp's tables
                let cp16 = cp16?;
                if oem_cp::code_table::DECODING_TABLE_CP_MAP.contains_key(&cp16) {
                    Encoding::Oem(cp16)
                } else {
                    return None;
                }
            }
        })
    }

    /// The Windows code page number for this encoding, for tagging text in
    /// the ZipArchive 0x5A4C extra field.
    pub fn codepage(&self) -> Option<u32> {
        use encoding_rs as rs;
        Some(match self {
            Encoding::Utf8 => 65001,
            Encoding::Utf16Le => 1200,
            Encoding::Utf16Be => 1201,
            Encoding::Oem(cp) => *cp as u32,
            Encoding::Rs(e) => match *e {
                e if e == rs::WINDOWS_874 => 874,
                e if e == rs::SHIFT_JIS => 932,
                e if e == rs::EUC_KR => 949,
                e if e == rs::BIG5 => 950,
                e if e == rs::EUC_JP => 51932,
                e if e == rs::GB18030 => 54936,
                e if e == rs::ISO_2022_JP => 50220,
                e if e == rs::MACINTOSH => 10000,
                e if e == rs::KOI8_R => 20866,
                e if e == rs::KOI8_U => 21866,
                e if e == rs::ISO_8859_2 => 28592,
                e if e == rs::ISO_8859_3 => 28593,
                e if e == rs::ISO_8859_4 => 28594,
                e if e == rs::ISO_8859_5 => 28595,
                e if e == rs::ISO_8859_6 => 28596,
                e if e == rs::ISO_8859_7 => 28597,
                e if e == rs::ISO_8859_8 => 28598,
                e if e == rs::ISO_8859_13 => 28603,
                e if e == rs::ISO_8859_16 => 28606,
                e if e == rs::WINDOWS_1250 => 1250,
                e if e == rs::WINDOWS_1251 => 1251,
                e if e == rs::WINDOWS_1252 => 1252,
                e if e == rs::WINDOWS_1253 => 1253,
                e if e == rs::WINDOWS_1254 => 1254,
                e if e == rs::WINDOWS_1255 => 1255,
                e if e == rs::WINDOWS_1256 => 1256,
                e if e == rs::WINDOWS_1257 => 1257,
                e if e == rs::WINDOWS_1258 => 1258,
                _ => return None,
            },
        })
    }

    /// Guess the encoding of legacy bytes, for archives that don't say.
    pub fn guess(i: &[u8]) -> Self {
        let mut detector = chardetng::EncodingDetector::new();
        detector.feed(i, true);
        let guessed = detector.guess(None, true);
        if guessed == encoding_rs::UTF_8 {
            Encoding::Utf8
        } else {
            Encoding::Rs(guessed)
        }
    }
}

/// detect_utf8 reports whether s is a valid UTF-8 string, and whether the string
/// must be considered UTF-8 encoding (i.e., not compatible with CP-437, ASCII,
/// or any other common encoding).
pub(crate) fn detect_utf8(input: &[u8]) -> (bool, bool) {
    match std::str::from_utf8(input) {
        Err(_) => {
            // not valid utf-8
            (false, false)
        }
        Ok(s) => {
            let mut require = false;

            // Officially, ZIP uses CP-437, but many readers use the system's
            // local character encoding. Most encodings are compatible with a large
            // subset of CP-437, which itself is ASCII-like.
            //
            // Forbid 0x7e and 0x5c since EUC-KR and Shift-JIS replace those
            // characters with localized currency and overline characters.
            for c in s.chars() {
                if c < 0x20 as char || c > 0x7d as char || c == 0x5c as char {
                    require = true
                }
            }
            (true, require)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cp437_round_trip() {
        let s = "déjà vu";
        let bytes = CP437.encode(s).unwrap();
        assert_ne!(bytes, s.as_bytes());
        assert_eq!(CP437.decode(&bytes).unwrap(), s);
    }

    #[test]
    fn cp866_cyrillic() {
        let enc = Encoding::from_codepage(866).unwrap();
        assert_eq!(enc, Encoding::Oem(866));
        let bytes = enc.encode("папка").unwrap();
        assert_eq!(bytes.len(), 5);
        assert_eq!(enc.decode(&bytes).unwrap(), "папка");
    }

    #[test]
    fn cp437_cannot_encode_kanji() {
        assert!(!CP437.can_encode("ファイル"));
        assert!(Encoding::Rs(encoding_rs::SHIFT_JIS).can_encode("ファイル"));
    }

    #[test]
    fn utf16_round_trip() {
        let s = "zip ファイル";
        let le = Encoding::Utf16Le.encode(s).unwrap();
        assert_eq!(Encoding::Utf16Le.decode(&le).unwrap(), s);
        let be = Encoding::Utf16Be.encode(s).unwrap();
        assert_eq!(Encoding::Utf16Be.decode(&be).unwrap(), s);
    }

    #[test]
    fn codepage_mapping_round_trips() {
        for cp in [65001u32, 1200, 437, 850, 866, 932, 1251, 28595] {
            let enc = Encoding::from_codepage(cp).expect("known code page");
            assert_eq!(enc.codepage(), Some(cp), "cp {}", cp);
        }
        assert_eq!(Encoding::from_codepage(12000), None);
    }

    #[test]
    fn utf8_flag_detection() {
        assert_eq!(detect_utf8(b"hello.txt"), (true, false));
        assert_eq!(detect_utf8("héllo.txt".as_bytes()), (true, true));
        assert_eq!(detect_utf8(&[0xff, 0xfe, 0x00]), (false, false));
    }
}
