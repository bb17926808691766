// Quote-aware row/column tokenizer
//
// States:
//   Unquoted          separator -> emit cell; EOL -> emit cell (if the row has
//                     content) and row end; enclosing char at cell start -> Quoted
//   Quoted            enclosing char -> QuoteEscapeCheck
//   QuoteEscapeCheck  enclosing char -> literal, back to Quoted;
//                     anything else -> Unquoted, byte re-processed
//
// Runs of plain content are skipped with memchr in both quoted and unquoted
// states. Input ending inside quotes flushes what was buffered as the last
// cell; this is accepted, never reported.

use std::ops::Range;

use memchr::memchr;

use crate::core::field::{CellBuffer, CellData};
use crate::core::newlines::Eol;
use crate::core::scanner::next_unquoted_stop;
use crate::dialect::Dialect;
use crate::error::HandlerError;
use crate::{Index, MAX_INDEX};

/// Returned from [`CellHandler::on_row_end`] to continue or stop tokenizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Consumer of tokenizer events.
///
/// Any error returned stops the tokenizer that owns this handler and nothing
/// else. Handlers that declare `CONCURRENCY_SAFE` are cloned once per
/// ingestion worker; all others force single-threaded ingestion.
pub trait CellHandler {
    /// Static capability: safe to clone and run independently per worker.
    const CONCURRENCY_SAFE: bool = false;

    fn on_cell(&mut self, row: Index, col: Index, data: CellData<'_>) -> Result<(), HandlerError>;

    fn on_row_end(&mut self, _row: Index) -> Result<Control, HandlerError> {
        Ok(Control::Continue)
    }

    fn on_read_done(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Handler that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl CellHandler for NoopHandler {
    const CONCURRENCY_SAFE: bool = true;

    fn on_cell(&mut self, _row: Index, _col: Index, _data: CellData<'_>) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unquoted,
    Quoted,
    QuoteEscapeCheck,
}

/// Outcome of one tokenizer pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenizeSummary {
    /// Rows completed, including empty ones.
    pub rows: u64,
    /// Bytes consumed from the range.
    pub bytes: usize,
    /// True when a handler asked to stop or the row limit was reached.
    pub stopped: bool,
}

pub struct Tokenizer {
    separator: Option<u8>,
    enclosing: Option<u8>,
    eol: Eol,
    first_row: u64,
    max_row: Index,
    max_column: Index,
    cell: CellBuffer,
}

impl Tokenizer {
    pub fn new(dialect: &Dialect) -> Self {
        Tokenizer {
            separator: dialect.separator,
            enclosing: dialect.enclosing,
            eol: dialect.eol,
            first_row: 0,
            max_row: MAX_INDEX,
            max_column: MAX_INDEX,
            cell: CellBuffer::default(),
        }
    }

    /// Number rows starting at `row` instead of 0.
    pub fn with_first_row(mut self, row: u64) -> Self {
        self.first_row = row;
        self
    }

    /// Cells beyond these bounds are dropped; tokenizing stops past `max_row`.
    pub fn with_limits(mut self, max_row: Index, max_column: Index) -> Self {
        self.max_row = max_row;
        self.max_column = max_column;
        self
    }

    pub fn tokenize<H: CellHandler>(
        &mut self,
        input: &[u8],
        handler: &mut H,
    ) -> Result<TokenizeSummary, HandlerError> {
        self.tokenize_range(input, 0..input.len(), handler)
    }

    /// Tokenize `input[range]`. Offsets in emitted [`CellData::Input`] are
    /// relative to the whole of `input`.
    pub fn tokenize_range<H: CellHandler>(
        &mut self,
        input: &[u8],
        range: Range<usize>,
        handler: &mut H,
    ) -> Result<TokenizeSummary, HandlerError> {
        let end = range.end.min(input.len());
        let mut pos = range.start.min(end);
        let mut state = State::Unquoted;
        let mut row = self.first_row;
        let mut col: u64 = 0;
        let mut summary = TokenizeSummary::default();
        let eol_first = self.eol.first_byte();
        self.cell.reset();

        if row > self.max_row as u64 {
            summary.stopped = true;
            handler.on_read_done()?;
            return Ok(summary);
        }

        while pos < end {
            match state {
                State::Unquoted => {
                    let byte = input[pos];

                    if Some(byte) == self.separator {
                        self.emit_cell(input, row, col, handler)?;
                        col += 1;
                        self.cell.reset();
                        pos += 1;
                        continue;
                    }

                    if byte == eol_first {
                        let len = self.eol.match_at(input, pos, end);
                        if len > 0 {
                            if col > 0 || self.cell.is_started() {
                                self.emit_cell(input, row, col, handler)?;
                            }
                            pos += len;
                            summary.rows += 1;
                            let control = handler.on_row_end(row as Index)?;
                            row += 1;
                            col = 0;
                            self.cell.reset();
                            if control == Control::Stop || row > self.max_row as u64 {
                                summary.stopped = true;
                                break;
                            }
                            continue;
                        }
                    }

                    if Some(byte) == self.enclosing && !self.cell.is_started() {
                        self.cell.mark_started();
                        state = State::Quoted;
                        pos += 1;
                        continue;
                    }

                    let stop = next_unquoted_stop(input, pos + 1, end, self.separator, eol_first);
                    self.cell.append(input, pos, stop);
                    pos = stop;
                }
                State::Quoted => {
                    let Some(enclosing) = self.enclosing else {
                        state = State::Unquoted;
                        continue;
                    };
                    match memchr(enclosing, &input[pos..end]) {
                        Some(i) => {
                            self.cell.append(input, pos, pos + i);
                            pos += i + 1;
                            state = State::QuoteEscapeCheck;
                        }
                        None => {
                            self.cell.append(input, pos, end);
                            pos = end;
                        }
                    }
                }
                State::QuoteEscapeCheck => {
                    if Some(input[pos]) == self.enclosing {
                        // Doubled enclosing char: keep one
                        self.cell.append(input, pos, pos + 1);
                        pos += 1;
                        state = State::Quoted;
                    } else {
                        state = State::Unquoted;
                    }
                }
            }
        }

        // Last row without a terminator, or unterminated quoted content
        if !summary.stopped && (col > 0 || self.cell.is_started()) {
            self.emit_cell(input, row, col, handler)?;
            summary.rows += 1;
            if handler.on_row_end(row as Index)? == Control::Stop {
                summary.stopped = true;
            }
        }
        summary.bytes = pos - range.start.min(end);

        handler.on_read_done()?;
        Ok(summary)
    }

    #[inline]
    fn emit_cell<H: CellHandler>(
        &self,
        input: &[u8],
        row: u64,
        col: u64,
        handler: &mut H,
    ) -> Result<(), HandlerError> {
        if col > self.max_column as u64 {
            return Ok(());
        }
        handler.on_cell(row as Index, col as Index, self.cell.data(input))
    }
}
