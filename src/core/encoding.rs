// Text encodings: BOM detection, wide-encoding decode, UTF-8 → target encode
//
// Byte-oriented encodings (UTF-8, Latin-1, Unknown) are never transcoded: the
// tokenizer works on their raw bytes and cells keep the source bytes. Only the
// wide encodings (UTF-16/32) are decoded to UTF-8 before tokenizing and
// re-encoded on write. Pure-Rust implementations, no codec tables needed.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Byte encoding of a delimited text stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    Latin1,
    /// No BOM was found; read as a byte-oriented encoding.
    Unknown,
}

/// BOM prefixes, longest first so UTF-32LE wins over UTF-16LE.
const BOMS: [(&[u8], Encoding); 5] = [
    (&[0xFF, 0xFE, 0x00, 0x00], Encoding::Utf32Le),
    (&[0x00, 0x00, 0xFE, 0xFF], Encoding::Utf32Be),
    (&[0xEF, 0xBB, 0xBF], Encoding::Utf8),
    (&[0xFF, 0xFE], Encoding::Utf16Le),
    (&[0xFE, 0xFF], Encoding::Utf16Be),
];

impl Encoding {
    /// Canonical name used in persisted dialects.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le => "UTF-16LE",
            Encoding::Utf16Be => "UTF-16BE",
            Encoding::Utf32Le => "UTF-32LE",
            Encoding::Utf32Be => "UTF-32BE",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Unknown => "Unknown",
        }
    }

    /// Parse a name as written by [`Encoding::name`], plus common aliases.
    pub fn from_name(name: &str) -> Option<Encoding> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "utf8" => Some(Encoding::Utf8),
            "utf16le" => Some(Encoding::Utf16Le),
            "utf16be" => Some(Encoding::Utf16Be),
            "utf32le" => Some(Encoding::Utf32Le),
            "utf32be" => Some(Encoding::Utf32Be),
            "iso88591" | "latin1" => Some(Encoding::Latin1),
            "unknown" => Some(Encoding::Unknown),
            _ => None,
        }
    }

    /// Byte-order mark for this encoding, if it has one.
    pub fn bom(self) -> Option<&'static [u8]> {
        BOMS.iter().find(|(_, enc)| *enc == self).map(|(bom, _)| *bom)
    }

    /// True when every byte below 0x80 is an ASCII character, so a block can be
    /// cut at any row terminator without decoding.
    pub fn is_byte_splittable(self) -> bool {
        matches!(self, Encoding::Utf8 | Encoding::Latin1 | Encoding::Unknown)
    }

    /// True for UTF-16/32, which are decoded to UTF-8 before tokenizing.
    pub fn is_wide(self) -> bool {
        !self.is_byte_splittable()
    }
}

/// Detect a BOM at the start of `input`. Returns the encoding and BOM length.
pub fn detect_bom(input: &[u8]) -> Option<(Encoding, usize)> {
    BOMS.iter()
        .find(|(bom, _)| input.starts_with(bom))
        .map(|(bom, enc)| (*enc, bom.len()))
}

// ==========================================================================
// Decoding: wide encodings → UTF-8
// ==========================================================================

/// Decode `input` (BOM already stripped) to UTF-8.
///
/// Byte-oriented encodings are returned borrowed and untouched. Invalid code
/// units decode to U+FFFD; a truncated trailing code unit is ignored so that a
/// sample cut mid-character still decodes.
pub fn decode_to_utf8(input: &[u8], encoding: Encoding) -> Cow<'_, [u8]> {
    match encoding {
        Encoding::Utf8 | Encoding::Latin1 | Encoding::Unknown => Cow::Borrowed(input),
        Encoding::Utf16Le => Cow::Owned(utf16_to_utf8(input, false)),
        Encoding::Utf16Be => Cow::Owned(utf16_to_utf8(input, true)),
        Encoding::Utf32Le => Cow::Owned(utf32_to_utf8(input, false)),
        Encoding::Utf32Be => Cow::Owned(utf32_to_utf8(input, true)),
    }
}

fn utf16_to_utf8(input: &[u8], big_endian: bool) -> Vec<u8> {
    let units = input.chunks_exact(2).map(|pair| {
        let bytes = [pair[0], pair[1]];
        if big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        }
    });
    let mut out = Vec::with_capacity(input.len());
    let mut buf = [0u8; 4];
    for ch in char::decode_utf16(units) {
        let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
    }
    out
}

fn utf32_to_utf8(input: &[u8], big_endian: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 2);
    let mut buf = [0u8; 4];
    for quad in input.chunks_exact(4) {
        let bytes = [quad[0], quad[1], quad[2], quad[3]];
        let cp = if big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        };
        let ch = char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER);
        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
    }
    out
}

// ==========================================================================
// Encoding: UTF-8 (or raw bytes) → target encoding
// ==========================================================================

/// Append `input` to `out` in the target encoding.
///
/// Byte-oriented encodings are copied as-is (cells already hold source bytes).
/// Wide encodings are re-encoded from UTF-8; invalid UTF-8 passes through.
pub fn encode_extend(out: &mut Vec<u8>, input: &[u8], target: Encoding) {
    match target {
        Encoding::Utf8 | Encoding::Latin1 | Encoding::Unknown => out.extend_from_slice(input),
        Encoding::Utf16Le => extend_utf16(out, input, false),
        Encoding::Utf16Be => extend_utf16(out, input, true),
        Encoding::Utf32Le => extend_utf32(out, input, false),
        Encoding::Utf32Be => extend_utf32(out, input, true),
    }
}

fn extend_utf16(out: &mut Vec<u8>, input: &[u8], big_endian: bool) {
    let s = match std::str::from_utf8(input) {
        Ok(s) => s,
        Err(_) => {
            out.extend_from_slice(input);
            return;
        }
    };
    out.reserve(s.len() * 2);
    for code_unit in s.encode_utf16() {
        let bytes = if big_endian {
            code_unit.to_be_bytes()
        } else {
            code_unit.to_le_bytes()
        };
        out.extend_from_slice(&bytes);
    }
}

fn extend_utf32(out: &mut Vec<u8>, input: &[u8], big_endian: bool) {
    let s = match std::str::from_utf8(input) {
        Ok(s) => s,
        Err(_) => {
            out.extend_from_slice(input);
            return;
        }
    };
    out.reserve(s.len() * 4);
    for ch in s.chars() {
        let cp = ch as u32;
        let bytes = if big_endian {
            cp.to_be_bytes()
        } else {
            cp.to_le_bytes()
        };
        out.extend_from_slice(&bytes);
    }
}

// ==========================================================================
// Tests
// ==========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_bom_longest_prefix() {
        // FF FE 00 00 is UTF-32LE, not UTF-16LE followed by a NUL char
        assert_eq!(
            detect_bom(&[0xFF, 0xFE, 0x00, 0x00, 0x41, 0x00, 0x00, 0x00]),
            Some((Encoding::Utf32Le, 4))
        );
        assert_eq!(detect_bom(&[0xFF, 0xFE, 0x41, 0x00]), Some((Encoding::Utf16Le, 2)));
        assert_eq!(detect_bom(&[0xFE, 0xFF, 0x00, 0x41]), Some((Encoding::Utf16Be, 2)));
        assert_eq!(detect_bom(&[0xEF, 0xBB, 0xBF, b'a']), Some((Encoding::Utf8, 3)));
        assert_eq!(detect_bom(&[0x00, 0x00, 0xFE, 0xFF]), Some((Encoding::Utf32Be, 4)));
        assert_eq!(detect_bom(b"a,b\n"), None);
        assert_eq!(detect_bom(b""), None);
    }

    #[test]
    fn test_names_round_trip() {
        for enc in [
            Encoding::Utf8,
            Encoding::Utf16Le,
            Encoding::Utf16Be,
            Encoding::Utf32Le,
            Encoding::Utf32Be,
            Encoding::Latin1,
            Encoding::Unknown,
        ] {
            assert_eq!(Encoding::from_name(enc.name()), Some(enc));
        }
        assert_eq!(Encoding::from_name("latin1"), Some(Encoding::Latin1));
        assert_eq!(Encoding::from_name("utf_16_le"), Some(Encoding::Utf16Le));
        assert_eq!(Encoding::from_name("ebcdic"), None);
    }

    #[test]
    fn test_splittable() {
        assert!(Encoding::Utf8.is_byte_splittable());
        assert!(Encoding::Latin1.is_byte_splittable());
        assert!(Encoding::Unknown.is_byte_splittable());
        assert!(Encoding::Utf16Le.is_wide());
        assert!(Encoding::Utf32Be.is_wide());
    }

    #[test]
    fn test_decode_byte_encodings_borrowed() {
        let input = b"caf\xe9";
        assert!(matches!(decode_to_utf8(input, Encoding::Latin1), Cow::Borrowed(_)));
        assert!(matches!(decode_to_utf8(input, Encoding::Unknown), Cow::Borrowed(_)));
    }

    #[test]
    fn test_decode_utf16_le_surrogate_pair() {
        // U+1F600 => D83D DE00
        let input = [0x61, 0x00, 0x3D, 0xD8, 0x00, 0xDE];
        let out = decode_to_utf8(&input, Encoding::Utf16Le);
        assert_eq!(out.as_ref(), "a\u{1F600}".as_bytes());
    }

    #[test]
    fn test_decode_utf16_truncated_tail_ignored() {
        let input = [0x00, 0x61, 0x00];
        let out = decode_to_utf8(&input, Encoding::Utf16Be);
        assert_eq!(out.as_ref(), b"a");
    }

    #[test]
    fn test_decode_utf32_invalid_codepoint_replaced() {
        let input = [0x00, 0x00, 0x11, 0x00];
        let out = decode_to_utf8(&input, Encoding::Utf32Le);
        assert_eq!(out.as_ref(), "\u{FFFD}".as_bytes());
    }

    #[test]
    fn test_encode_utf16_be_ascii() {
        let mut out = Vec::new();
        encode_extend(&mut out, b"AB", Encoding::Utf16Be);
        assert_eq!(out, &[0x00, 0x41, 0x00, 0x42]);
    }

    #[test]
    fn test_encode_utf32_le_emoji() {
        let mut out = Vec::new();
        encode_extend(&mut out, "\u{1F600}".as_bytes(), Encoding::Utf32Le);
        assert_eq!(out, &[0x00, 0xF6, 0x01, 0x00]);
    }

    #[test]
    fn test_encode_byte_encodings_copy_raw() {
        let mut out = vec![1];
        encode_extend(&mut out, b"caf\xe9", Encoding::Latin1);
        assert_eq!(out, b"\x01caf\xe9");
    }

    #[test]
    fn test_wide_round_trip() {
        let text = "x,\u{e9}\u{1F600}\n";
        for enc in [Encoding::Utf16Le, Encoding::Utf16Be, Encoding::Utf32Le, Encoding::Utf32Be] {
            let mut encoded = Vec::new();
            encode_extend(&mut encoded, text.as_bytes(), enc);
            assert_eq!(decode_to_utf8(&encoded, enc).as_ref(), text.as_bytes());
        }
    }
}
