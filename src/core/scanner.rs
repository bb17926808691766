// Byte-level scanning helpers and the quote-aware row splitter.
//
// Splitting is single-threaded and follows exactly the quoting rules of the
// tokenizer, so a split never lands inside a quoted cell and the source row
// index recorded at each split matches what one tokenizer over the whole
// input would have counted.

use memchr::{memchr, memchr2};

use crate::core::newlines::Eol;
use crate::dialect::Dialect;

/// Position of the next byte at or after `from` that can end an unquoted run:
/// the separator or the first byte of the row terminator. Returns `end` when
/// there is none.
#[inline]
pub fn next_unquoted_stop(
    input: &[u8],
    from: usize,
    end: usize,
    separator: Option<u8>,
    eol_first: u8,
) -> usize {
    if from >= end {
        return end;
    }
    let haystack = &input[from..end];
    let found = match separator {
        Some(sep) => memchr2(sep, eol_first, haystack),
        None => memchr(eol_first, haystack),
    };
    found.map_or(end, |i| from + i)
}

/// A row start chosen as a range boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSplit {
    /// Byte offset of the first byte of the row.
    pub offset: usize,
    /// Source row index of that row, counting empty rows.
    pub row: u64,
}

/// Even target offsets for `parts` ranges over `len` bytes, excluding 0.
pub fn split_targets(len: usize, parts: usize) -> Vec<usize> {
    (1..parts.max(1)).map(|k| k * len / parts).collect()
}

/// For each target offset, find the first row start at or after it.
///
/// Targets must be ascending. Several targets landing in the same row
/// produce one split; a row start at the end of input produces none.
pub fn split_rows(input: &[u8], dialect: &Dialect, targets: &[usize]) -> Vec<RowSplit> {
    let end = input.len();
    let separator = dialect.separator;
    let enclosing = dialect.enclosing;
    let eol: Eol = dialect.eol;
    let eol_first = eol.first_byte();

    let mut splits: Vec<RowSplit> = Vec::with_capacity(targets.len());
    let mut next_target = targets.iter().take_while(|&&t| t == 0).count();
    let mut pos = 0;
    let mut row: u64 = 0;
    let mut in_quotes = false;
    let mut cell_started = false;

    while pos < end && next_target < targets.len() {
        if in_quotes {
            let Some(enc) = enclosing else {
                in_quotes = false;
                continue;
            };
            match memchr(enc, &input[pos..end]) {
                Some(i) => {
                    pos += i + 1;
                    if pos < end && input[pos] == enc {
                        pos += 1;
                    } else {
                        in_quotes = false;
                    }
                }
                None => pos = end,
            }
            continue;
        }

        let byte = input[pos];
        if Some(byte) == separator {
            cell_started = false;
            pos += 1;
            continue;
        }
        if byte == eol_first {
            let len = eol.match_at(input, pos, end);
            if len > 0 {
                pos += len;
                row += 1;
                cell_started = false;
                while next_target < targets.len() && targets[next_target] <= pos {
                    next_target += 1;
                    if pos < end && splits.last().map_or(true, |s| s.offset != pos) {
                        splits.push(RowSplit { offset: pos, row });
                    }
                }
                continue;
            }
        }
        if Some(byte) == enclosing && !cell_started {
            cell_started = true;
            in_quotes = true;
            pos += 1;
            continue;
        }
        cell_started = true;
        pos = next_unquoted_stop(input, pos + 1, end, separator, eol_first);
    }

    splits
}
