// Row terminators

use serde::{Deserialize, Serialize};

/// Row terminator of a dialect.
///
/// A row ends at exactly this sequence outside quotes; any other CR or LF
/// byte is cell data. `first_byte()` is what the memchr-driven scanners look
/// for before confirming the full match with [`Eol::match_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Eol {
    #[default]
    Lf,
    CrLf,
    Cr,
}

impl Eol {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Eol::Lf => b"\n",
            Eol::CrLf => b"\r\n",
            Eol::Cr => b"\r",
        }
    }

    #[inline]
    pub fn first_byte(self) -> u8 {
        match self {
            Eol::Lf => b'\n',
            Eol::CrLf | Eol::Cr => b'\r',
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Eol> {
        match bytes {
            b"\n" => Some(Eol::Lf),
            b"\r\n" => Some(Eol::CrLf),
            b"\r" => Some(Eol::Cr),
            _ => None,
        }
    }

    /// Returns length of the terminator at `pos`, or 0 if none starts there.
    /// Matches never extend past `end`.
    #[inline]
    pub fn match_at(self, input: &[u8], pos: usize, end: usize) -> usize {
        let pattern = self.as_bytes();
        if pos + pattern.len() <= end && input[pos..].starts_with(pattern) {
            pattern.len()
        } else {
            0
        }
    }
}
