// Dialect: the syntax parameters of a delimited text file, how they are
// guessed from a sample, and how they are persisted.

use std::collections::BTreeMap;

use memchr::memmem;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::encoding::{decode_to_utf8, detect_bom, Encoding};
use crate::core::newlines::Eol;
use crate::error::{Error, Result};
use crate::properties::{join_path, Properties};
use crate::source::ByteSource;

/// Bytes read from a source to guess its dialect.
pub const SAMPLE_SIZE: usize = 64 * 1024;

/// Separators tried by [`peek_dialect`], in tie-break order.
const SEPARATOR_CANDIDATES: [u8; 4] = [b',', b'\t', b';', 0x1F];

const KEY_ENCODING: &str = "encoding";
const KEY_SEPARATOR: &str = "separator_char";
const KEY_ENCLOSING: &str = "enclosing_char";
const KEY_EOL: &str = "end_of_line_type";
const KEY_BOM: &str = "bom_writing";
const KEY_PROPERTIES: &str = "properties";

/// Syntax of a delimited text file.
///
/// `None` for `separator` or `enclosing` disables that character: it never
/// matches while tokenizing and is never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialect {
    pub separator: Option<u8>,
    pub enclosing: Option<u8>,
    pub eol: Eol,
    pub encoding: Encoding,
    /// Write a byte-order mark before the first row.
    pub bom_writing: bool,
    /// Free-form settings carried along with the dialect.
    pub properties: BTreeMap<String, String>,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect {
            separator: Some(b','),
            enclosing: Some(b'"'),
            eol: Eol::Lf,
            encoding: Encoding::Utf8,
            bom_writing: false,
            properties: BTreeMap::new(),
        }
    }
}

impl Dialect {
    pub fn with_separator(mut self, separator: Option<u8>) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_enclosing(mut self, enclosing: Option<u8>) -> Self {
        self.enclosing = enclosing;
        self
    }

    pub fn with_eol(mut self, eol: Eol) -> Self {
        self.eol = eol;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_bom_writing(mut self, bom_writing: bool) -> Self {
        self.bom_writing = bom_writing;
        self
    }

    /// Guess the dialect from the first [`SAMPLE_SIZE`] bytes of `source`.
    pub fn detect_from(source: &ByteSource) -> Result<Dialect> {
        let sample = source.sample(SAMPLE_SIZE)?;
        Ok(peek_dialect(&sample))
    }

    /// Write this dialect under `section`.
    pub fn save(&self, props: &mut Properties, section: &str) {
        let key = |name: &str| join_path(section, name);

        props.set(key(KEY_ENCODING), self.encoding.name());
        props.set(
            key(KEY_SEPARATOR),
            self.separator.map(|b| char::from(b).to_string()).unwrap_or_default(),
        );
        match self.enclosing {
            Some(b) => props.set(key(KEY_ENCLOSING), char::from(b).to_string()),
            None => {
                props.remove(&key(KEY_ENCLOSING));
            }
        }
        props.set(
            key(KEY_EOL),
            String::from_utf8_lossy(self.eol.as_bytes()).into_owned(),
        );
        props.set(key(KEY_BOM), if self.bom_writing { "1" } else { "0" });

        let stale: Vec<String> = props
            .section(&key(KEY_PROPERTIES))
            .map(|(k, _)| k.to_string())
            .collect();
        for name in stale {
            props.remove(&join_path(&key(KEY_PROPERTIES), &name));
        }
        for (name, value) in &self.properties {
            props.set(join_path(&key(KEY_PROPERTIES), name), value.clone());
        }
    }

    /// Read a dialect written by [`Dialect::save`]. Missing keys take their
    /// defaults, except `enclosing_char` whose absence disables quoting.
    pub fn load(props: &Properties, section: &str) -> Result<Dialect> {
        let key = |name: &str| join_path(section, name);
        let mut dialect = Dialect::default();

        if let Some(value) = props.get(&key(KEY_ENCODING)) {
            dialect.encoding =
                Encoding::from_name(value).ok_or_else(|| invalid(&key(KEY_ENCODING), value))?;
        }
        if let Some(value) = props.get(&key(KEY_SEPARATOR)) {
            dialect.separator = if value.is_empty() {
                None
            } else {
                Some(single_byte(value).ok_or_else(|| invalid(&key(KEY_SEPARATOR), value))?)
            };
        }
        dialect.enclosing = match props.get(&key(KEY_ENCLOSING)) {
            None => None,
            Some(value) => {
                Some(single_byte(value).ok_or_else(|| invalid(&key(KEY_ENCLOSING), value))?)
            }
        };
        if let Some(value) = props.get(&key(KEY_EOL)) {
            dialect.eol =
                Eol::from_bytes(value.as_bytes()).ok_or_else(|| invalid(&key(KEY_EOL), value))?;
        }
        if let Some(value) = props.get(&key(KEY_BOM)) {
            dialect.bom_writing = match value {
                "0" => false,
                "1" => true,
                _ => return Err(invalid(&key(KEY_BOM), value)),
            };
        }
        dialect.properties = props
            .section(&key(KEY_PROPERTIES))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Ok(dialect)
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// A one-character value naming a single byte.
fn single_byte(value: &str) -> Option<u8> {
    let mut chars = value.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    u8::try_from(c as u32).ok()
}

// ==========================================================================
// Detection
// ==========================================================================

/// Guess the dialect of a file from a sample of its first bytes.
///
/// Never fails. When no separator candidate is used consistently the default
/// `,` is returned.
pub fn peek_dialect(sample: &[u8]) -> Dialect {
    let (encoding, bom_len) = detect_bom(sample).unwrap_or((Encoding::Unknown, 0));
    let text = decode_to_utf8(&sample[bom_len..], encoding);
    let eol = detect_eol(&text);

    let separator = match detect_separator(&text, eol) {
        Some(sep) => sep,
        None => {
            debug!(
                sample_len = sample.len(),
                "no consistent separator in sample, using ','"
            );
            b','
        }
    };

    debug!(
        encoding = encoding.name(),
        separator = separator,
        eol = ?eol,
        bom = bom_len > 0,
        "peeked dialect"
    );

    Dialect {
        separator: Some(separator),
        enclosing: Some(b'"'),
        eol,
        encoding,
        bom_writing: bom_len > 0,
        properties: BTreeMap::new(),
    }
}

fn detect_eol(text: &[u8]) -> Eol {
    if memmem::find(text, b"\r\n").is_some() {
        Eol::CrLf
    } else if memchr::memchr(b'\n', text).is_some() {
        Eol::Lf
    } else if memchr::memchr(b'\r', text).is_some() {
        Eol::Cr
    } else {
        Eol::default()
    }
}

/// Per-record candidate counts outside `"` quotes.
struct RecordCounts {
    counts: [usize; SEPARATOR_CANDIDATES.len()],
    complete: bool,
}

fn count_records(text: &[u8], eol: Eol) -> Vec<RecordCounts> {
    let mut records = Vec::new();
    let mut counts = [0usize; SEPARATOR_CANDIDATES.len()];
    let mut in_quotes = false;
    let mut record_len = 0usize;
    let mut pos = 0;

    while pos < text.len() {
        let byte = text[pos];
        if byte == b'"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            let len = eol.match_at(text, pos, text.len());
            if len > 0 {
                if record_len > 0 {
                    records.push(RecordCounts {
                        counts,
                        complete: true,
                    });
                }
                counts = [0; SEPARATOR_CANDIDATES.len()];
                record_len = 0;
                pos += len;
                continue;
            }
            if let Some(i) = SEPARATOR_CANDIDATES.iter().position(|&c| c == byte) {
                counts[i] += 1;
            }
        }
        record_len += 1;
        pos += 1;
    }
    if record_len > 0 {
        records.push(RecordCounts {
            counts,
            complete: false,
        });
    }
    records
}

fn detect_separator(text: &[u8], eol: Eol) -> Option<u8> {
    let mut records = count_records(text, eol);
    if records.iter().any(|r| r.complete) {
        records.retain(|r| r.complete);
    }
    let first = records.first()?;

    let mut best: Option<(u8, usize)> = None;
    for (i, &candidate) in SEPARATOR_CANDIDATES.iter().enumerate() {
        let count = first.counts[i];
        if count == 0 || records.iter().any(|r| r.counts[i] != count) {
            continue;
        }
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((candidate, count));
        }
    }
    best.map(|(sep, _)| sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_utf8_bom() {
        let d = peek_dialect(&[0xEF, 0xBB, 0xBF, b'a', b',', b'b', b'\n']);
        assert_eq!(d.encoding, Encoding::Utf8);
        assert_eq!(d.separator, Some(b','));
        assert_eq!(d.eol, Eol::Lf);
        assert_eq!(d.enclosing, Some(b'"'));
        assert!(d.bom_writing);
    }

    #[test]
    fn test_peek_without_bom_is_unknown() {
        let d = peek_dialect(b"a;b;c\r\n1;2;3\r\n");
        assert_eq!(d.encoding, Encoding::Unknown);
        assert_eq!(d.separator, Some(b';'));
        assert_eq!(d.eol, Eol::CrLf);
        assert!(!d.bom_writing);
    }

    #[test]
    fn test_peek_tab_beats_inconsistent_comma() {
        let d = peek_dialect(b"a,x\tb\nc\td\ne\tf,g,h\n");
        assert_eq!(d.separator, Some(b'\t'));
    }

    #[test]
    fn test_peek_ignores_quoted_separators() {
        let d = peek_dialect(b"\"a;b\",c\n\"d;e;f\",g\n");
        assert_eq!(d.separator, Some(b','));
    }

    #[test]
    fn test_peek_quoted_newline_stays_in_record() {
        let d = peek_dialect(b"a;\"x\ny,z\";b\nc;d;e\n");
        assert_eq!(d.separator, Some(b';'));
    }

    #[test]
    fn test_peek_truncated_last_record_ignored() {
        let d = peek_dialect(b"a\tb\tc\nd\te\tf\ng\th");
        assert_eq!(d.separator, Some(b'\t'));
    }

    #[test]
    fn test_peek_tie_prefers_earlier_candidate() {
        let d = peek_dialect(b"a,b;c\nd,e;f\n");
        assert_eq!(d.separator, Some(b','));
    }

    #[test]
    fn test_peek_ambiguous_falls_back() {
        assert_eq!(peek_dialect(b"abc\ndef\n").separator, Some(b','));
        assert_eq!(peek_dialect(b"").separator, Some(b','));
        assert_eq!(peek_dialect(b"").eol, Eol::Lf);
    }

    #[test]
    fn test_peek_cr_and_unit_separator() {
        let d = peek_dialect(b"a\x1fb\rc\x1fd\r");
        assert_eq!(d.eol, Eol::Cr);
        assert_eq!(d.separator, Some(0x1F));
    }

    #[test]
    fn test_peek_utf16_sample() {
        let mut sample = vec![0xFF, 0xFE];
        for unit in "x;y\nz;w\n".encode_utf16() {
            sample.extend_from_slice(&unit.to_le_bytes());
        }
        // Cut mid code unit
        sample.push(b'q');
        let d = peek_dialect(&sample);
        assert_eq!(d.encoding, Encoding::Utf16Le);
        assert_eq!(d.separator, Some(b';'));
        assert!(d.bom_writing);
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut dialect = Dialect::default()
            .with_separator(Some(0x1F))
            .with_enclosing(None)
            .with_eol(Eol::CrLf)
            .with_encoding(Encoding::Utf16Be)
            .with_bom_writing(true);
        dialect.properties.insert("origin".into(), "export\tv2".into());

        let mut props = Properties::new();
        dialect.save(&mut props, "dialect");
        assert_eq!(props.get("dialect/separator_char"), Some("\u{1f}"));
        assert!(!props.contains_key("dialect/enclosing_char"));
        assert_eq!(props.get("dialect/bom_writing"), Some("1"));

        let text = props.to_string();
        assert!(text.contains("dialect/separator_char=\\x1F"));
        let reparsed: Properties = text.parse().unwrap();
        assert_eq!(Dialect::load(&reparsed, "dialect").unwrap(), dialect);
    }

    #[test]
    fn test_disabled_separator_round_trip() {
        let dialect = Dialect::default().with_separator(None);
        let mut props = Properties::new();
        dialect.save(&mut props, "");
        assert_eq!(props.get("separator_char"), Some(""));
        assert_eq!(Dialect::load(&props, "").unwrap(), dialect);
    }

    #[test]
    fn test_save_replaces_old_properties() {
        let mut props = Properties::new();
        let mut first = Dialect::default();
        first.properties.insert("old".into(), "1".into());
        first.save(&mut props, "d");
        Dialect::default().save(&mut props, "d");
        assert!(!props.contains_key("d/properties/old"));
    }

    #[test]
    fn test_load_rejects_bad_values() {
        let mut props = Properties::new();
        props.set("d/separator_char", ",;");
        assert!(matches!(
            Dialect::load(&props, "d"),
            Err(Error::InvalidConfig { .. })
        ));

        let mut props = Properties::new();
        props.set("d/end_of_line_type", "\n\r");
        assert!(Dialect::load(&props, "d").is_err());

        let mut props = Properties::new();
        props.set("d/encoding", "EBCDIC");
        assert!(Dialect::load(&props, "d").is_err());
    }
}
