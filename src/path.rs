//! Path and comment text policy: how entry paths are normalized for lookup,
//! decoded from legacy archives, and encoded for storage under the
//! different compatibility profiles.

use tracing::trace;

use crate::checksum::{checksum_of, Crc32};
use crate::encoding::{DecodingError, Encoding, CP437};
use crate::entry::{Compatibility, ZipOptions};
use crate::format::{
    ExtraFields, ExtraUnicodeField, ExtraWinZipField, TAG_UNICODE_COMMENT, TAG_UNICODE_PATH,
    TAG_WINZIP_CODEPAGE,
};

/// Normalize a path for lookups: collapse `//`, drop `.` segments, resolve
/// `..` where possible, and strip any leading `/`. A trailing slash (the
/// directory marker) survives normalization.
pub fn clean_path(path: &str) -> String {
    let is_dir = path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            seg => segments.push(seg),
        }
    }
    let mut cleaned = segments.join("/");
    if is_dir && !cleaned.is_empty() {
        cleaned.push('/');
    }
    cleaned
}

/// Per-archive text codec configuration.
///
/// `None` means "guess": decoding auto-detects the legacy encoding,
/// encoding falls back to CP-437.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodecs {
    /// codec for entry paths
    pub path: Option<Encoding>,
    /// codec for comments
    pub comment: Option<Encoding>,
}

impl TextCodecs {
    fn path_or_guess(&self, raw: &[u8]) -> Encoding {
        self.path.unwrap_or_else(|| Encoding::guess(raw))
    }

    fn comment_or_guess(&self, raw: &[u8]) -> Encoding {
        self.comment.unwrap_or_else(|| Encoding::guess(raw))
    }

    pub(crate) fn path_or_default(&self) -> Encoding {
        self.path.unwrap_or(CP437)
    }

    pub(crate) fn comment_or_default(&self) -> Encoding {
        self.comment.unwrap_or(CP437)
    }
}

/// Decode an entry path from its raw header bytes.
///
/// Resolution order: the Unicode flag wins, then the Info-ZIP Unicode Path
/// extra (0x7075, CRC-gated against the raw bytes), then the ZipArchive
/// code page record (0x5A4C), then the configured codec or an educated
/// guess.
pub(crate) fn decode_path(
    raw: &[u8],
    options: ZipOptions,
    central_extra: &ExtraFields,
    codecs: &TextCodecs,
) -> Result<String, DecodingError> {
    if options.has(ZipOptions::UNICODE) {
        return Encoding::Utf8.decode(raw);
    }

    if let Some(data) = central_extra.get(TAG_UNICODE_PATH) {
        if let Some(field) = ExtraUnicodeField::parse(data) {
            if field.applies_to(raw) {
                match String::from_utf8(field.utf8) {
                    Ok(s) => return Ok(s),
                    Err(_) => trace!("unicode path extra is not valid utf-8, ignoring"),
                }
            } else {
                trace!("unicode path extra crc mismatch, ignoring");
            }
        }
    }

    if let Some(s) = decode_with_winzip_field(raw, central_extra, WinZipText::FileName) {
        return Ok(s);
    }

    codecs.path_or_guess(raw).decode(raw)
}

/// Decode an entry comment; mirrors [decode_path] with the 0x6375 record
/// and the comment code page of the 0x5A4C record.
pub(crate) fn decode_comment(
    raw: &[u8],
    options: ZipOptions,
    central_extra: &ExtraFields,
    codecs: &TextCodecs,
) -> Result<String, DecodingError> {
    if raw.is_empty() {
        return Ok(String::new());
    }

    if options.has(ZipOptions::UNICODE) {
        return Encoding::Utf8.decode(raw);
    }

    if let Some(data) = central_extra.get(TAG_UNICODE_COMMENT) {
        if let Some(field) = ExtraUnicodeField::parse(data) {
            if field.applies_to(raw) {
                if let Ok(s) = String::from_utf8(field.utf8) {
                    return Ok(s);
                }
            }
        }
    }

    if let Some(s) = decode_with_winzip_field(raw, central_extra, WinZipText::Comment) {
        return Ok(s);
    }

    codecs.comment_or_guess(raw).decode(raw)
}

enum WinZipText {
    FileName,
    Comment,
}

fn decode_with_winzip_field(
    raw: &[u8],
    central_extra: &ExtraFields,
    which: WinZipText,
) -> Option<String> {
    let field = ExtraWinZipField::parse(central_extra.get(TAG_WINZIP_CODEPAGE)?)?;
    match which {
        WinZipText::FileName => {
            // an inline name takes precedence over the legacy bytes; a
            // missing code page flag means UTF-8
            let cp = field.filename_codepage.unwrap_or(65001);
            if let Some(utf8) = &field.utf8_filename {
                return Encoding::from_codepage(cp)?.decode(utf8).ok();
            }
            Encoding::from_codepage(cp)?.decode(raw).ok()
        }
        WinZipText::Comment => {
            let cp = field.comment_codepage.unwrap_or(65001);
            Encoding::from_codepage(cp)?.decode(raw).ok()
        }
    }
}

/// Replace path segments that `codec` cannot represent with the CRC-32 of
/// their UTF-16LE stem, in 8 hex digits. The extension is preserved when it
/// is itself representable.
fn substitute_segments(path: &str, codec: Encoding) -> String {
    if codec.can_encode(path) {
        return path.to_string();
    }

    let segments: Vec<String> = path
        .split('/')
        .map(|seg| {
            if seg.is_empty() || codec.can_encode(seg) {
                return seg.to_string();
            }

            let (mut stem, mut ext) = match seg.rfind('.') {
                Some(i) => (&seg[..i], &seg[i..]),
                None => (seg, ""),
            };
            if !ext.is_empty() && !codec.can_encode(ext) {
                stem = seg;
                ext = "";
            }

            let utf16: Vec<u8> = stem
                .encode_utf16()
                .flat_map(|u| u.to_le_bytes())
                .collect();
            let crc = checksum_of::<Crc32>(&utf16);
            format!("{:08x}{}", crc, ext)
        })
        .collect();

    segments.join("/")
}

/// Shorten every path segment to DOS 8.3: stems longer than 8 characters
/// become `first6~1`, dot-included extensions longer than 4 become the dot,
/// one character and `~1`.
fn to_dos_path(path: &[u8]) -> Vec<u8> {
    let segments: Vec<Vec<u8>> = path
        .split(|&b| b == b'/')
        .map(|seg| {
            let (stem, ext) = match seg.iter().rposition(|&b| b == b'.') {
                Some(i) => (&seg[..i], &seg[i..]),
                None => (seg, &seg[..0]),
            };

            let mut stem = stem.to_vec();
            if stem.len() > 8 {
                stem.truncate(6);
                stem.extend_from_slice(b"~1");
            }

            let mut ext = ext.to_vec();
            if ext.len() > 4 {
                ext.truncate(2);
                ext.extend_from_slice(b"~1");
            }

            stem.extend_from_slice(&ext);
            stem
        })
        .collect();

    segments.join(&b'/')
}

/// Everything the writer needs to store an entry's texts: the header
/// bytes, the Unicode flag, and the extra records to attach.
pub(crate) struct StoredText {
    pub name: Vec<u8>,
    pub comment: Vec<u8>,
    pub unicode: bool,
    /// records for the central directory extra field
    pub central: Vec<(u16, Vec<u8>)>,
    /// records for the local header extra field
    pub local: Vec<(u16, Vec<u8>)>,
}

/// Encode an entry path and comment for storage under the given
/// compatibility profile.
pub(crate) fn encode_entry_text(
    path: &str,
    comment: &str,
    compat: Compatibility,
    codecs: &TextCodecs,
) -> StoredText {
    use crate::format::payload;

    let mut out = StoredText {
        name: Vec::new(),
        comment: Vec::new(),
        unicode: false,
        central: Vec::new(),
        local: Vec::new(),
    };

    if compat.is_custom() {
        let path_codec = codecs.path_or_default();
        let comment_codec = codecs.comment_or_default();
        out.name = path_codec
            .encode(&substitute_segments(path, path_codec))
            .expect("substituted path must encode");
        out.comment = comment_codec
            .encode(&substitute_segments(comment, comment_codec))
            .unwrap_or_default();
        out.unicode = path_codec == Encoding::Utf8;
        return out;
    }

    if compat.has(Compatibility::DOS) {
        let legacy = codecs.path_or_default();
        let encoded = legacy
            .encode(&substitute_segments(path, legacy))
            .expect("substituted path must encode");
        out.name = to_dos_path(&encoded);
        out.comment = legacy
            .encode(&substitute_segments(comment, legacy))
            .unwrap_or_default();

        let interop = compat.has(Compatibility::UNIX) || compat.has(Compatibility::WINDOWS);
        if interop && !path.is_ascii() {
            let field = ExtraUnicodeField::new(&out.name, path.as_bytes().to_vec());
            let data = payload(|w| field.write_to(w));
            out.central.push((TAG_UNICODE_PATH, data.clone()));
            out.local.push((TAG_UNICODE_PATH, data));
        }
        if interop && !comment.is_ascii() {
            let field = ExtraUnicodeField::new(&out.comment, comment.as_bytes().to_vec());
            out.central
                .push((TAG_UNICODE_COMMENT, payload(|w| field.write_to(w))));
        }

        if compat.has(Compatibility::WINDOWS) {
            let mut field = ExtraWinZipField::default();
            if path.as_bytes() != out.name.as_slice() {
                field.filename_codepage = Some(65001);
                field.utf8_filename = Some(path.as_bytes().to_vec());
            } else {
                field.filename_codepage = legacy.codepage();
            }
            if !comment.is_empty() {
                field.comment_codepage = legacy.codepage();
            }
            if field.filename_codepage.is_some() || field.comment_codepage.is_some() {
                out.central
                    .push((TAG_WINZIP_CODEPAGE, payload(|w| field.write_to(w))));
            }
        }
        return out;
    }

    // UNIX and/or WINDOWS without DOS: store UTF-8 and say so
    out.name = path.as_bytes().to_vec();
    out.comment = comment.as_bytes().to_vec();
    out.unicode = true;

    if compat.has(Compatibility::WINDOWS) {
        let field = ExtraWinZipField {
            filename_codepage: Some(65001),
            utf8_filename: None,
            comment_codepage: None,
        };
        out.central
            .push((TAG_WINZIP_CODEPAGE, payload(|w| field.write_to(w))));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_basics() {
        assert_eq!(clean_path("a/b/c"), "a/b/c");
        assert_eq!(clean_path("/a//b/./c"), "a/b/c");
        assert_eq!(clean_path("a/b/../c/"), "a/c/");
        assert_eq!(clean_path("./"), "");
    }

    #[test]
    fn dos_path_shortening() {
        assert_eq!(to_dos_path(b"filename.txt"), b"filename.txt".to_vec());
        assert_eq!(
            to_dos_path(b"averylongfilename.txt"),
            b"averyl~1.txt".to_vec()
        );
        assert_eq!(
            to_dos_path(b"file.markdown"),
            b"file.m~1".to_vec()
        );
        assert_eq!(
            to_dos_path(b"dir/longdirectoryname/x"),
            b"dir/longdi~1/x".to_vec()
        );
    }

    #[test]
    fn substitution_keeps_encodable_extension() {
        let out = substitute_segments("わたし.txt", CP437);
        assert_eq!(out.len(), 8 + 4);
        assert!(out.ends_with(".txt"));
        assert!(out[..8].bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn substitution_folds_unencodable_extension() {
        let out = substitute_segments("わたし.ジップ", CP437);
        assert_eq!(out.len(), 8);
        assert!(out.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn unicode_profile_sets_flag() {
        let text = encode_entry_text(
            "わたし.txt",
            "",
            Compatibility::UNIX,
            &TextCodecs::default(),
        );
        assert!(text.unicode);
        assert_eq!(text.name, "わたし.txt".as_bytes());
        assert!(text.central.is_empty());
    }

    #[test]
    fn windows_profile_tags_utf8_codepage() {
        let text = encode_entry_text(
            "file.txt",
            "",
            Compatibility::WINDOWS,
            &TextCodecs::default(),
        );
        assert!(text.unicode);
        let (tag, data) = &text.central[0];
        assert_eq!(*tag, TAG_WINZIP_CODEPAGE);
        let field = ExtraWinZipField::parse(data).unwrap();
        assert_eq!(field.filename_codepage, Some(65001));
    }

    #[test]
    fn dos_only_substitutes_and_stays_quiet() {
        let text = encode_entry_text(
            "папка/わたし.txt",
            "",
            Compatibility::DOS,
            &TextCodecs::default(),
        );
        assert!(!text.unicode);
        assert!(text.central.is_empty());
        let name = String::from_utf8(text.name).unwrap();
        let parts: Vec<&str> = name.split('/').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(parts[1].ends_with(".txt"));
    }

    #[test]
    fn dos_plus_unix_emits_unicode_path_extra() {
        let text = encode_entry_text(
            "わたし.txt",
            "",
            Compatibility::DOS | Compatibility::UNIX,
            &TextCodecs::default(),
        );
        assert!(!text.unicode);
        let (tag, data) = &text.central[0];
        assert_eq!(*tag, TAG_UNICODE_PATH);
        let field = ExtraUnicodeField::parse(data).unwrap();
        assert!(field.applies_to(&text.name));
        assert_eq!(field.utf8, "わたし.txt".as_bytes());
    }

    #[test]
    fn decode_honors_unicode_flag_over_codec() {
        let raw = "わたしはジップファイル.txt".as_bytes();
        let codecs = TextCodecs {
            path: Some(Encoding::Oem(866)),
            comment: None,
        };
        let decoded = decode_path(
            raw,
            ZipOptions::UNICODE,
            &ExtraFields::default(),
            &codecs,
        )
        .unwrap();
        assert_eq!(decoded, "わたしはジップファイル.txt");
    }

    #[test]
    fn decode_via_unicode_path_extra() {
        let legacy = b"watashi.txt";
        let field = ExtraUnicodeField::new(legacy, "わたし.txt".as_bytes().to_vec());
        let mut extra = ExtraFields::default();
        extra.insert(
            TAG_UNICODE_PATH,
            crate::format::payload(|w| field.write_to(w)),
        );

        let decoded = decode_path(
            legacy,
            ZipOptions::default(),
            &extra,
            &TextCodecs::default(),
        )
        .unwrap();
        assert_eq!(decoded, "わたし.txt");
    }

    #[test]
    fn decode_ignores_stale_unicode_extra() {
        let field = ExtraUnicodeField::new(b"original.txt", "оригинал.txt".as_bytes().to_vec());
        let mut extra = ExtraFields::default();
        extra.insert(
            TAG_UNICODE_PATH,
            crate::format::payload(|w| field.write_to(w)),
        );

        // the legacy name was renamed by a tool unaware of the extra
        let decoded = decode_path(
            b"renamed.txt",
            ZipOptions::default(),
            &extra,
            &TextCodecs {
                path: Some(CP437),
                comment: None,
            },
        )
        .unwrap();
        assert_eq!(decoded, "renamed.txt");
    }

    #[test]
    fn decode_via_winzip_codepage() {
        let enc = Encoding::Oem(866);
        let raw = enc.encode("привет.txt").unwrap();
        let field = ExtraWinZipField {
            filename_codepage: Some(866),
            utf8_filename: None,
            comment_codepage: None,
        };
        let mut extra = ExtraFields::default();
        extra.insert(
            TAG_WINZIP_CODEPAGE,
            crate::format::payload(|w| field.write_to(w)),
        );

        let decoded = decode_path(
            &raw,
            ZipOptions::default(),
            &extra,
            &TextCodecs {
                path: Some(CP437),
                comment: None,
            },
        )
        .unwrap();
        assert_eq!(decoded, "привет.txt");
    }
}
