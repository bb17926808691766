// Cell handler that fills a SparseTable for one ingestion worker
//
// Cells of the current row are buffered until the row ends, because both the
// row filter and the content matcher decide per row. A kept row is first
// handed to the caller's handler, cell by cell, and only stored once the
// handler accepted the whole row.

use bytes::Bytes;

use crate::core::field::CellData;
use crate::core::tokenizer::{CellHandler, Control};
use crate::error::HandlerError;
use crate::filter::FilterPredicate;
use crate::storage::table::SparseTable;
use crate::Index;

#[derive(Debug, Clone, Copy)]
enum Pending {
    /// Span of the source buffer.
    Input { offset: usize, len: usize },
    /// Span of the sink's row scratch buffer.
    Scratch { start: usize, end: usize },
}

#[derive(Debug, Clone, Copy)]
struct PendingCell {
    col: Index,
    data: Pending,
}

#[inline]
fn pending_data<'a>(pending: Pending, source: &'a [u8], scratch: &'a [u8]) -> CellData<'a> {
    match pending {
        Pending::Input { offset, len } => CellData::Input {
            offset,
            bytes: &source[offset..offset + len],
        },
        Pending::Scratch { start, end } => CellData::Scratch(&scratch[start..end]),
    }
}

/// What a sink did besides filling its table.
#[derive(Debug, Default)]
pub(crate) struct SinkReport {
    pub rows_produced: u64,
    pub cells_dropped: u64,
    pub errors: Vec<String>,
}

pub(crate) struct TableSink<'f, H> {
    table: SparseTable,
    handler: H,
    filter: &'f FilterPredicate,
    source: Bytes,
    pending: Vec<PendingCell>,
    scratch: Vec<u8>,
    next_row: u64,
    report: SinkReport,
}

impl<'f, H: CellHandler> TableSink<'f, H> {
    /// `table` must have been created over `source`.
    pub fn new(table: SparseTable, handler: H, filter: &'f FilterPredicate) -> Self {
        let source = table.source().clone();
        TableSink {
            table,
            handler,
            filter,
            source,
            pending: Vec::new(),
            scratch: Vec::new(),
            next_row: 0,
            report: SinkReport::default(),
        }
    }

    pub fn finish(self) -> (SparseTable, SinkReport) {
        let mut report = self.report;
        report.rows_produced = self.next_row;
        (self.table, report)
    }

    fn clear_row(&mut self) {
        self.pending.clear();
        self.scratch.clear();
    }

    fn row_is_kept(&self, source_row: u64) -> bool {
        if !self.filter.includes_row(source_row) {
            return false;
        }
        if !self.filter.has_content_matcher() {
            return true;
        }
        let cells: Vec<&[u8]> = self
            .pending
            .iter()
            .map(|cell| pending_data(cell.data, &self.source, &self.scratch).bytes())
            .collect();
        self.filter.keeps_content(&cells)
    }

    /// Index a kept row will have once every worker is merged. Without a
    /// content matcher the filter alone decides it; otherwise only the local
    /// index is known.
    fn merged_row(&self, source_row: u64) -> u64 {
        if self.filter.has_content_matcher() {
            return self.next_row;
        }
        match self.filter.include_rows() {
            None => source_row,
            Some(rows) => rows.rank(source_row).unwrap_or(self.next_row),
        }
    }
}

impl<H: CellHandler> CellHandler for TableSink<'_, H> {
    fn on_cell(&mut self, _row: Index, col: Index, data: CellData<'_>) -> Result<(), HandlerError> {
        let data = match data {
            CellData::Input { offset, bytes } => Pending::Input {
                offset,
                len: bytes.len(),
            },
            CellData::Scratch(bytes) => {
                let start = self.scratch.len();
                self.scratch.extend_from_slice(bytes);
                Pending::Scratch {
                    start,
                    end: self.scratch.len(),
                }
            }
        };
        self.pending.push(PendingCell { col, data });
        Ok(())
    }

    fn on_row_end(&mut self, row: Index) -> Result<Control, HandlerError> {
        let source_row = row as u64;
        if self.filter.is_past_last_row(source_row) {
            self.clear_row();
            return Ok(Control::Stop);
        }
        if !self.row_is_kept(source_row) {
            self.clear_row();
            return Ok(Control::Continue);
        }

        let local_row = self.next_row;
        let max_row = self.table.max_row() as u64;
        if local_row > max_row || self.merged_row(source_row) > max_row {
            self.clear_row();
            return Ok(Control::Stop);
        }
        let local_row = local_row as Index;
        let block_size = self.table.arena_block_size();
        let max_column = self.table.max_column();

        // The caller's handler sees the row before anything is stored
        for cell in &self.pending {
            match self.filter.column_slot(cell.col) {
                Some(slot) if slot <= max_column => {}
                _ => continue,
            }
            let data = pending_data(cell.data, &self.source, &self.scratch);
            if data.len() > block_size {
                continue;
            }
            self.handler.on_cell(row, cell.col, data)?;
        }
        let control = self.handler.on_row_end(row)?;

        for cell in &self.pending {
            let Some(slot) = self.filter.column_slot(cell.col) else {
                continue;
            };
            let data = pending_data(cell.data, &self.source, &self.scratch);
            if data.len() > block_size {
                self.report.cells_dropped += 1;
                if self.table.allows_block_size_exceptions() {
                    self.report.errors.push(format!(
                        "cell at row {row}, column {} of {} bytes exceeds block size {block_size}",
                        cell.col,
                        data.len()
                    ));
                }
                continue;
            }
            let stored = match cell.data {
                Pending::Input { offset, len } => {
                    self.table.store_borrowed(local_row, slot, offset, len)
                }
                Pending::Scratch { .. } => match self.table.set_element(local_row, slot, data.bytes()) {
                    Ok(stored) => stored,
                    Err(e) => {
                        self.report.errors.push(e.to_string());
                        false
                    }
                },
            };
            if !stored {
                self.report.cells_dropped += 1;
            }
        }
        self.table.touch_row(local_row);
        self.next_row += 1;
        self.clear_row();
        Ok(control)
    }

    fn on_read_done(&mut self) -> Result<(), HandlerError> {
        self.handler.on_read_done()
    }
}
