// Cell content as seen by handlers, and the buffer the tokenizer builds it in
//
// A cell stays a zero-copy span into the input for as long as its content is
// contiguous there. The first discontiguous append (a doubled quote, text
// after a closing quote) copies the span into the scratch buffer and the cell
// continues there.

/// Content of one cell, handed to a [`CellHandler`](crate::CellHandler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellData<'a> {
    /// Unmodified bytes of the tokenized buffer starting at `offset`.
    Input { offset: usize, bytes: &'a [u8] },
    /// Unescaped bytes held in the tokenizer's scratch buffer; only valid for
    /// the duration of the callback.
    Scratch(&'a [u8]),
}

impl<'a> CellData<'a> {
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        match *self {
            CellData::Input { bytes, .. } => bytes,
            CellData::Scratch(bytes) => bytes,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// True when the bytes point into the tokenized buffer.
    #[inline]
    pub fn is_zero_copy(&self) -> bool {
        matches!(self, CellData::Input { .. })
    }
}

/// Accumulates the current cell as a span, promoting to scratch on demand.
#[derive(Debug, Default)]
pub(crate) struct CellBuffer {
    start: usize,
    end: usize,
    owned: bool,
    /// Set once anything (content or an opening quote) belongs to the cell.
    started: bool,
    scratch: Vec<u8>,
}

impl CellBuffer {
    #[inline]
    pub fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
        self.owned = false;
        self.started = false;
        self.scratch.clear();
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[inline]
    pub fn mark_started(&mut self) {
        self.started = true;
    }

    /// Append `input[from..to]` to the cell.
    #[inline]
    pub fn append(&mut self, input: &[u8], from: usize, to: usize) {
        self.started = true;
        if from >= to {
            return;
        }
        if self.owned {
            self.scratch.extend_from_slice(&input[from..to]);
        } else if self.start == self.end {
            self.start = from;
            self.end = to;
        } else if from == self.end {
            self.end = to;
        } else {
            self.scratch.clear();
            self.scratch.extend_from_slice(&input[self.start..self.end]);
            self.scratch.extend_from_slice(&input[from..to]);
            self.owned = true;
        }
    }

    pub fn data<'a>(&'a self, input: &'a [u8]) -> CellData<'a> {
        if self.owned {
            CellData::Scratch(&self.scratch)
        } else {
            CellData::Input {
                offset: self.start,
                bytes: &input[self.start..self.end],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_appends_stay_zero_copy() {
        let input = b"hello world";
        let mut cell = CellBuffer::default();
        cell.append(input, 0, 5);
        cell.append(input, 5, 11);
        let data = cell.data(input);
        assert!(data.is_zero_copy());
        assert_eq!(data, CellData::Input { offset: 0, bytes: b"hello world" });
    }

    #[test]
    fn test_gap_promotes_to_scratch() {
        // "a""b" -> a"b : the first quote of the pair is skipped
        let input = b"\"a\"\"b\"";
        let mut cell = CellBuffer::default();
        cell.append(input, 1, 2);
        cell.append(input, 3, 5);
        let data = cell.data(input);
        assert!(!data.is_zero_copy());
        assert_eq!(data.bytes(), b"a\"b");
    }

    #[test]
    fn test_empty_run_marks_started_only() {
        let input = b"\"\"";
        let mut cell = CellBuffer::default();
        assert!(!cell.is_started());
        cell.append(input, 1, 1);
        assert!(cell.is_started());
        assert!(cell.data(input).is_empty());
    }

    #[test]
    fn test_reset_clears_scratch() {
        let input = b"ab";
        let mut cell = CellBuffer::default();
        cell.append(input, 0, 1);
        cell.append(input, 0, 1);
        assert_eq!(cell.data(input).bytes(), b"aa");
        cell.reset();
        assert!(!cell.is_started());
        cell.append(input, 1, 2);
        assert_eq!(cell.data(input), CellData::Input { offset: 1, bytes: b"b" });
    }
}
